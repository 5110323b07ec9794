//! Time-indexed viseme schedules.
//!
//! A [`LipSyncSchedule`] covers `[0, total_duration]` with contiguous
//! [`VisemeEvent`]s. Schedules come either from response text
//! ([`build_schedule`]) or from a server-supplied timing list
//! ([`LipSyncSchedule::from_timings`]); both paths produce the same shape.

use serde::{Deserialize, Serialize};

use super::phoneme::word_to_phonemes;
use super::viseme::{VisemeId, phoneme_to_viseme};
use crate::config::LipSyncConfig;

/// Gaps smaller than this are absorbed rather than filled with silence.
const GAP_EPSILON: f64 = 1e-6;

/// One viseme held for a span of time, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeEvent {
    pub viseme: VisemeId,
    #[serde(rename = "start_time")]
    pub start: f64,
    pub duration: f64,
}

impl VisemeEvent {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A phoneme timing as supplied by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeTiming {
    pub phoneme: String,
    pub start_time: f64,
    pub duration: f64,
}

/// Result of resolving a schedule at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    /// Viseme whose span contains the instant.
    pub current: VisemeId,
    /// Viseme that follows; `sil` after the last event.
    pub next: VisemeId,
    /// Fractional progress through the current span, in `[0, 1]`.
    pub t: f32,
}

impl Resolved {
    /// Mouth at rest.
    pub const SILENT: Resolved = Resolved {
        current: VisemeId::Sil,
        next: VisemeId::Sil,
        t: 0.0,
    };
}

/// An ordered, gap-free sequence of viseme events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LipSyncSchedule {
    events: Vec<VisemeEvent>,
    total_duration: f64,
}

impl LipSyncSchedule {
    pub fn events(&self) -> &[VisemeEvent] {
        &self.events
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Normalise a server-supplied timing list into a schedule.
    ///
    /// Entries are sorted by start time, overlaps are clipped, gaps are
    /// filled with `sil`, and the tail is padded with `sil` up to `duration`.
    /// Timings running past a positive `duration` are cut at it.
    pub fn from_timings(timings: &[PhonemeTiming], duration: f64) -> Self {
        let limit = if duration.is_finite() && duration > 0.0 {
            Some(duration)
        } else {
            None
        };

        let mut sorted: Vec<&PhonemeTiming> = timings
            .iter()
            .filter(|t| t.start_time.is_finite() && t.duration.is_finite() && t.duration > 0.0)
            .collect();
        sorted.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        let mut events = Vec::with_capacity(sorted.len());
        let mut cursor = 0.0_f64;
        for timing in sorted {
            let start = timing.start_time.max(cursor);
            let mut end = timing.start_time + timing.duration;
            if let Some(limit) = limit {
                end = end.min(limit);
            }
            if end - start <= GAP_EPSILON {
                continue;
            }
            if start - cursor > GAP_EPSILON {
                events.push(VisemeEvent {
                    viseme: VisemeId::Sil,
                    start: cursor,
                    duration: start - cursor,
                });
            } else if let Some(prev) = events.last_mut() {
                // Absorb a sub-epsilon gap into the previous span.
                prev.duration = start - prev.start;
            }
            let start = if events.is_empty() { 0.0 } else { start };
            events.push(VisemeEvent {
                viseme: phoneme_to_viseme(&timing.phoneme),
                start,
                duration: end - start,
            });
            cursor = end;
        }

        if let Some(limit) = limit
            && limit - cursor > GAP_EPSILON
        {
            events.push(VisemeEvent {
                viseme: VisemeId::Sil,
                start: cursor,
                duration: limit - cursor,
            });
            cursor = limit;
        }

        Self {
            events,
            total_duration: cursor,
        }
    }

    /// Find the viseme pair active at `elapsed` seconds.
    pub fn resolve(&self, elapsed: f64) -> Resolved {
        if self.events.is_empty() || elapsed.is_nan() || elapsed >= self.total_duration {
            return Resolved::SILENT;
        }
        let elapsed = elapsed.max(0.0);
        let idx = self
            .events
            .partition_point(|e| e.start <= elapsed)
            .saturating_sub(1);
        let event = self.events[idx];
        let t = if event.duration > 0.0 {
            ((elapsed - event.start) / event.duration).clamp(0.0, 1.0)
        } else {
            1.0
        };
        Resolved {
            current: event.viseme,
            next: self
                .events
                .get(idx + 1)
                .map_or(VisemeId::Sil, |e| e.viseme),
            t: t as f32,
        }
    }
}

/// Derive a schedule from response text.
///
/// Without a known audio duration the utterance length is estimated from
/// the character count. Each word gets a share of the total proportional to
/// its letters, split evenly across its phonemes with a per-phoneme floor;
/// words are separated by a fixed `sil`. The nominal timeline is then scaled
/// uniformly so the events sum exactly to the requested total.
pub fn build_schedule(
    text: &str,
    known_audio_duration: Option<f64>,
    config: &LipSyncConfig,
) -> LipSyncSchedule {
    let total = match known_audio_duration {
        Some(d) if d.is_finite() => d.max(0.0),
        _ => text.chars().count() as f64 * config.seconds_per_char,
    };
    if total <= 0.0 {
        return LipSyncSchedule::default();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let letters: usize = words.iter().map(|w| w.chars().count()).sum();
    if letters == 0 {
        return LipSyncSchedule {
            events: vec![VisemeEvent {
                viseme: VisemeId::Sil,
                start: 0.0,
                duration: total,
            }],
            total_duration: total,
        };
    }

    let mut nominal: Vec<(VisemeId, f64)> = Vec::with_capacity(letters + words.len());
    for (i, word) in words.iter().enumerate() {
        let phonemes = word_to_phonemes(word);
        if !phonemes.is_empty() {
            let share = total * word.chars().count() as f64 / letters as f64;
            let each = (share / phonemes.len() as f64).max(config.min_phoneme);
            nominal.extend(phonemes.into_iter().map(|p| (phoneme_to_viseme(p), each)));
        }
        if i + 1 < words.len() && config.word_gap > 0.0 {
            nominal.push((VisemeId::Sil, config.word_gap));
        }
    }

    let nominal_total: f64 = nominal.iter().map(|(_, d)| d).sum();
    let scale = total / nominal_total;

    let mut events = Vec::with_capacity(nominal.len());
    let mut cursor = 0.0_f64;
    let last = nominal.len() - 1;
    for (i, (viseme, d)) in nominal.into_iter().enumerate() {
        let duration = if i == last { total - cursor } else { d * scale };
        events.push(VisemeEvent {
            viseme,
            start: cursor,
            duration,
        });
        cursor += duration;
    }

    LipSyncSchedule {
        events,
        total_duration: total,
    }
}

/// Resolve `schedule` at `elapsed` seconds. See [`LipSyncSchedule::resolve`].
pub fn resolve(schedule: &LipSyncSchedule, elapsed: f64) -> Resolved {
    schedule.resolve(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_well_formed(schedule: &LipSyncSchedule, total: f64) {
        let events = schedule.events();
        if total <= 0.0 {
            assert!(events.is_empty());
            return;
        }
        assert!(!events.is_empty());
        assert!(events[0].start.abs() < 1e-12, "first event starts at 0");
        for pair in events.windows(2) {
            assert!(
                (pair[0].end() - pair[1].start).abs() < 1e-9,
                "gap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
        for e in events {
            assert!(e.duration > 0.0, "non-positive span {e:?}");
        }
        let sum: f64 = events.iter().map(|e| e.duration).sum();
        assert!((sum - total).abs() < 1e-3, "sum {sum} vs {total}");
        assert!((schedule.total_duration() - total).abs() < 1e-9);
    }

    #[test]
    fn papa_example() {
        let schedule = build_schedule("papa", Some(0.8), &LipSyncConfig::default());
        let visemes: Vec<VisemeId> = schedule.events().iter().map(|e| e.viseme).collect();
        assert_eq!(
            visemes,
            vec![VisemeId::PP, VisemeId::AA, VisemeId::PP, VisemeId::AA]
        );
        for e in schedule.events() {
            assert!((e.duration - 0.2).abs() < 1e-9);
        }
        assert_well_formed(&schedule, 0.8);
    }

    #[test]
    fn schedule_is_contiguous_for_many_inputs() {
        let config = LipSyncConfig::default();
        let texts = [
            "papa",
            "hello world",
            "Сәлем, қалайсыз?",
            "a",
            "  spaced   out   words  ",
            "numbers 123 and punctuation!!!",
            "the quick brown fox jumps over the lazy dog",
        ];
        let durations = [0.01, 0.3, 0.8, 1.0, 2.5, 17.3];
        for text in texts {
            for d in durations {
                let schedule = build_schedule(text, Some(d), &config);
                assert_well_formed(&schedule, d);
            }
            let estimated = build_schedule(text, None, &config);
            let expected = text.chars().count() as f64 * config.seconds_per_char;
            assert_well_formed(&estimated, expected);
        }
    }

    #[test]
    fn words_are_separated_by_silence() {
        let schedule = build_schedule("ma pa", Some(1.0), &LipSyncConfig::default());
        let visemes: Vec<VisemeId> = schedule.events().iter().map(|e| e.viseme).collect();
        assert_eq!(
            visemes,
            vec![
                VisemeId::PP,
                VisemeId::AA,
                VisemeId::Sil,
                VisemeId::PP,
                VisemeId::AA
            ]
        );
    }

    #[test]
    fn empty_text_is_one_silence() {
        let schedule = build_schedule("   ", Some(1.5), &LipSyncConfig::default());
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.events()[0].viseme, VisemeId::Sil);
        assert_well_formed(&schedule, 1.5);
    }

    #[test]
    fn zero_duration_is_empty() {
        let schedule = build_schedule("papa", Some(0.0), &LipSyncConfig::default());
        assert!(schedule.is_empty());
        assert_eq!(schedule.resolve(0.0), Resolved::SILENT);
    }

    #[test]
    fn resolve_inside_and_between_events() {
        let schedule = build_schedule("papa", Some(0.8), &LipSyncConfig::default());

        let r = schedule.resolve(0.0);
        assert_eq!((r.current, r.next), (VisemeId::PP, VisemeId::AA));
        assert!(r.t.abs() < 1e-6);

        let r = schedule.resolve(0.3);
        assert_eq!((r.current, r.next), (VisemeId::AA, VisemeId::PP));
        assert!((r.t - 0.5).abs() < 1e-4);

        let r = schedule.resolve(0.75);
        assert_eq!((r.current, r.next), (VisemeId::AA, VisemeId::Sil));
    }

    #[test]
    fn resolve_past_end_is_silent() {
        let schedule = build_schedule("papa", Some(0.8), &LipSyncConfig::default());
        assert_eq!(schedule.resolve(0.8), Resolved::SILENT);
        assert_eq!(resolve(&schedule, 12.0), Resolved::SILENT);
        assert_eq!(schedule.resolve(f64::NAN), Resolved::SILENT);
    }

    #[test]
    fn resolve_before_start_clamps_to_first() {
        let schedule = build_schedule("papa", Some(0.8), &LipSyncConfig::default());
        let r = schedule.resolve(-1.0);
        assert_eq!(r.current, VisemeId::PP);
        assert!(r.t.abs() < 1e-6);
    }

    fn timing(phoneme: &str, start_time: f64, duration: f64) -> PhonemeTiming {
        PhonemeTiming {
            phoneme: phoneme.into(),
            start_time,
            duration,
        }
    }

    #[test]
    fn timings_fill_gaps_and_pad() {
        let schedule = LipSyncSchedule::from_timings(
            &[timing("aa", 0.2, 0.1), timing("PP", 0.0, 0.1)],
            0.5,
        );
        let visemes: Vec<VisemeId> = schedule.events().iter().map(|e| e.viseme).collect();
        assert_eq!(
            visemes,
            vec![VisemeId::PP, VisemeId::Sil, VisemeId::AA, VisemeId::Sil]
        );
        assert_well_formed(&schedule, 0.5);
    }

    #[test]
    fn timings_clip_overlap_and_overrun() {
        let schedule = LipSyncSchedule::from_timings(
            &[
                timing("p", 0.0, 0.3),
                timing("a", 0.2, 0.3),
                timing("m", 0.5, 1.0),
            ],
            0.6,
        );
        let events = schedule.events();
        assert_eq!(events.len(), 3);
        assert!((events[1].start - 0.3).abs() < 1e-9);
        assert!((events[2].end() - 0.6).abs() < 1e-9);
        assert_well_formed(&schedule, 0.6);
    }

    #[test]
    fn timings_without_duration_use_last_end() {
        let schedule = LipSyncSchedule::from_timings(&[timing("O", 0.0, 0.4)], 0.0);
        assert!((schedule.total_duration() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn event_serializes_with_wire_names() {
        let e = VisemeEvent {
            viseme: VisemeId::AA,
            start: 0.5,
            duration: 0.1,
        };
        let json = serde_json::to_string(&e).unwrap_or_default();
        assert!(json.contains("\"viseme\":\"aa\""));
        assert!(json.contains("\"start_time\":0.5"));
    }
}
