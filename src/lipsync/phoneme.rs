//! Spelling → phoneme lookup.
//!
//! Scripts are supported purely through the tables below: adding a script
//! means adding rows, never code. Characters without a row become `sil`.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Symbol used for characters that make no mouth shape.
pub const SILENCE: &str = "sil";

/// Two-letter spellings that produce one phoneme. Checked before [`LETTERS`].
const DIGRAPHS: &[(char, char, &str)] = &[
    ('c', 'h', "tʃ"),
    ('q', 'h', "tʃ"),
    ('s', 'h', "ʃ"),
    ('t', 'h', "θ"),
];

/// Single letters, lowercase.
const LETTERS: &[(char, &str)] = &[
    // Latin vowels
    ('a', "a"),
    ('e', "e"),
    ('i', "i"),
    ('o', "o"),
    ('u', "u"),
    // Latin consonants
    ('p', "p"),
    ('b', "b"),
    ('m', "m"),
    ('f', "f"),
    ('v', "v"),
    ('t', "t"),
    ('d', "d"),
    ('k', "k"),
    ('g', "g"),
    ('c', "k"),
    ('q', "k"),
    ('x', "k"),
    ('s', "s"),
    ('z', "z"),
    ('n', "n"),
    ('l', "l"),
    ('r', "r"),
    ('w', "w"),
    ('y', "j"),
    ('j', "dʒ"),
    ('h', "h"),
    // Cyrillic vowels (Russian and Kazakh)
    ('а', "a"),
    ('ә', "æ"),
    ('я', "a"),
    ('е', "e"),
    ('э', "e"),
    ('и', "i"),
    ('ы', "ɯ"),
    ('і', "ɪ"),
    ('о', "o"),
    ('ё', "o"),
    ('ө', "ø"),
    ('у', "u"),
    ('ю', "u"),
    ('ұ', "ʊ"),
    ('ү', "y"),
    // Cyrillic consonants
    ('п', "p"),
    ('б', "b"),
    ('м', "m"),
    ('ф', "f"),
    ('в', "v"),
    ('т', "t"),
    ('д', "d"),
    ('к', "k"),
    ('г', "g"),
    ('қ', "q"),
    ('ғ', "ɣ"),
    ('с', "s"),
    ('з', "z"),
    ('ц', "ts"),
    ('н', "n"),
    ('ң', "ŋ"),
    ('л', "l"),
    ('р', "r"),
    ('ш', "ʃ"),
    ('щ', "ɕ"),
    ('ч', "tʃ"),
    ('ж', "ʒ"),
    ('х', "χ"),
    ('һ', "h"),
    ('й', "j"),
];

static LETTER_MAP: LazyLock<HashMap<char, &'static str>> =
    LazyLock::new(|| LETTERS.iter().copied().collect());

/// Phoneme for a single (lowercase) character, or [`SILENCE`].
pub fn letter_phoneme(c: char) -> &'static str {
    LETTER_MAP.get(&c).copied().unwrap_or(SILENCE)
}

/// Split one word into phoneme symbols, one per letter except digraphs.
pub fn word_to_phonemes(word: &str) -> Vec<&'static str> {
    let chars: Vec<char> = word.chars().flat_map(char::to_lowercase).collect();
    let mut phonemes = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(&next) = chars.get(i + 1)
            && let Some((_, _, p)) = DIGRAPHS.iter().find(|(a, b, _)| *a == c && *b == next)
        {
            phonemes.push(*p);
            i += 2;
            continue;
        }
        phonemes.push(letter_phoneme(c));
        i += 1;
    }
    phonemes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lipsync::viseme::{VisemeId, phoneme_to_viseme};

    fn visemes(word: &str) -> Vec<VisemeId> {
        word_to_phonemes(word)
            .into_iter()
            .map(phoneme_to_viseme)
            .collect()
    }

    #[test]
    fn latin_word() {
        assert_eq!(
            visemes("papa"),
            vec![VisemeId::PP, VisemeId::AA, VisemeId::PP, VisemeId::AA]
        );
    }

    #[test]
    fn digraphs_consume_two_letters() {
        assert_eq!(word_to_phonemes("ship"), vec!["ʃ", "i", "p"]);
        assert_eq!(
            visemes("think"),
            vec![VisemeId::TH, VisemeId::I, VisemeId::NN, VisemeId::KK]
        );
        assert_eq!(visemes("ch"), vec![VisemeId::CH]);
    }

    #[test]
    fn uppercase_is_folded() {
        assert_eq!(visemes("MAMA"), visemes("mama"));
    }

    #[test]
    fn kazakh_cyrillic_word() {
        // сәлем
        assert_eq!(
            visemes("сәлем"),
            vec![
                VisemeId::SS,
                VisemeId::AA,
                VisemeId::NN,
                VisemeId::E,
                VisemeId::PP
            ]
        );
        assert_eq!(visemes("қөң"), vec![VisemeId::KK, VisemeId::O, VisemeId::NN]);
    }

    #[test]
    fn unknown_characters_are_silence() {
        assert_eq!(word_to_phonemes("a,1"), vec!["a", SILENCE, SILENCE]);
    }

    #[test]
    fn every_letter_has_a_mouth_shape() {
        for (c, p) in LETTERS {
            assert_ne!(
                phoneme_to_viseme(p),
                VisemeId::Sil,
                "letter {c} maps to silent phoneme {p}"
            );
        }
    }
}
