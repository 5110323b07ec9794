//! Wire encoding of audio: outbound chunks as base64 WAV, inbound responses
//! decoded with symphonia.

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{EngineError, Result};

/// Decoded mono audio ready for playback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encode mono samples as 16-bit PCM WAV bytes.
///
/// # Errors
///
/// Returns [`EngineError::Device`] if the WAV writer fails.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
            .map_err(|e| EngineError::Device(format!("failed to create wav writer: {e}")))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer
                .write_sample(v)
                .map_err(|e| EngineError::Device(format!("WAV write error: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| EngineError::Device(format!("WAV finalize error: {e}")))?;
    }
    Ok(bytes)
}

/// Encode mono samples as base64 WAV, the `audio_chunk` payload.
///
/// # Errors
///
/// Returns an error if WAV encoding fails.
pub fn encode_wav_base64(samples: &[f32], sample_rate: u32) -> Result<String> {
    Ok(BASE64.encode(encode_wav(samples, sample_rate)?))
}

/// Decode a base64 payload.
///
/// # Errors
///
/// Returns [`EngineError::Playback`] on invalid base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data.trim())
        .map_err(|e| EngineError::Playback(format!("invalid base64 audio: {e}")))
}

/// Decode compressed or PCM audio bytes to a mono clip.
///
/// `format` (`mp3`, `wav`, `m4a`, ...) is only a probe hint; the container
/// is sniffed regardless.
///
/// # Errors
///
/// Returns [`EngineError::Playback`] if the data cannot be probed or decoded.
pub fn decode_audio(bytes: Vec<u8>, format: Option<&str>) -> Result<AudioClip> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = format {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::Playback(format!("failed to probe audio: {e}")))?;

    let mut reader = probed.format;
    let track = reader
        .default_track()
        .ok_or_else(|| EngineError::Playback("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| EngineError::Playback("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::Playback(format!("failed to create decoder: {e}")))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(EngineError::Playback(format!("audio read error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(EngineError::Playback(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;
        let required = (frames as usize).saturating_mul(channels);

        let reuse = sample_buf
            .as_ref()
            .is_some_and(|b| b.capacity() >= required);
        if !reuse {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.clear();
        buf.copy_interleaved_ref(decoded);

        let data = buf.samples();
        if channels <= 1 {
            out.extend_from_slice(data);
        } else {
            out.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    Ok(AudioClip::new(out, sample_rate))
}

/// Decode a base64 response payload. Empty payloads yield `None`.
///
/// # Errors
///
/// Returns [`EngineError::Playback`] on invalid base64 or undecodable audio.
pub fn decode_response_audio(data: &str, format: Option<&str>) -> Result<Option<AudioClip>> {
    if data.trim().is_empty() {
        return Ok(None);
    }
    let bytes = decode_base64(data)?;
    decode_audio(bytes, format).map(Some)
}
