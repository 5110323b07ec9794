//! Viseme identifiers and the phoneme→viseme table.
//!
//! A viseme is a visual mouth shape that corresponds to one or more
//! phonemes. Phoneme symbols produced by [`super::phoneme`] (or supplied by
//! the server in a precomputed timing list) collapse onto the fifteen
//! Oculus visemes below.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Oculus viseme IDs (standard for lip-sync).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum VisemeId {
    /// Silence (mouth closed)
    #[default]
    #[serde(rename = "sil")]
    Sil = 0,
    /// /p/, /b/, /m/ (lips pressed together)
    PP = 1,
    /// /f/, /v/ (teeth on lip)
    FF = 2,
    /// /θ/, /ð/ (tongue between teeth)
    TH = 3,
    /// /t/, /d/ (tongue at ridge)
    DD = 4,
    /// /k/, /g/, /q/ (back of tongue up)
    #[serde(rename = "kk")]
    KK = 5,
    /// /tʃ/, /ʃ/, /ʒ/ (lips forward)
    CH = 6,
    /// /s/, /z/ (teeth together)
    SS = 7,
    /// /n/, /ŋ/, /l/ (tongue at roof)
    #[serde(rename = "nn")]
    NN = 8,
    /// /r/ (tongue curled)
    RR = 9,
    /// /a/ (mouth open wide)
    #[serde(rename = "aa")]
    AA = 10,
    /// /e/ (mouth medium)
    E = 11,
    /// /i/ (mouth wide, teeth apart)
    I = 12,
    /// /o/ (rounded, medium)
    O = 13,
    /// /u/ (rounded, small)
    U = 14,
}

impl VisemeId {
    /// Every viseme, in id order.
    pub const ALL: [VisemeId; 15] = [
        VisemeId::Sil,
        VisemeId::PP,
        VisemeId::FF,
        VisemeId::TH,
        VisemeId::DD,
        VisemeId::KK,
        VisemeId::CH,
        VisemeId::SS,
        VisemeId::NN,
        VisemeId::RR,
        VisemeId::AA,
        VisemeId::E,
        VisemeId::I,
        VisemeId::O,
        VisemeId::U,
    ];

    /// Canonical short name (`sil`, `PP`, `kk`, `aa`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            VisemeId::Sil => "sil",
            VisemeId::PP => "PP",
            VisemeId::FF => "FF",
            VisemeId::TH => "TH",
            VisemeId::DD => "DD",
            VisemeId::KK => "kk",
            VisemeId::CH => "CH",
            VisemeId::SS => "SS",
            VisemeId::NN => "nn",
            VisemeId::RR => "RR",
            VisemeId::AA => "aa",
            VisemeId::E => "E",
            VisemeId::I => "I",
            VisemeId::O => "O",
            VisemeId::U => "U",
        }
    }

    /// Look up a viseme by its canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == name)
    }
}

impl fmt::Display for VisemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a phoneme symbol to its viseme.
///
/// Accepts the symbols emitted by the character table as well as canonical
/// viseme names, so server-side timings expressed either way resolve.
/// Anything unrecognised is silence.
pub fn phoneme_to_viseme(phoneme: &str) -> VisemeId {
    match phoneme {
        "" | "sil" | "sp" => VisemeId::Sil,

        // Bilabial
        "p" | "b" | "m" => VisemeId::PP,

        // Labiodental
        "f" | "v" => VisemeId::FF,

        // Dental
        "θ" | "ð" => VisemeId::TH,

        // Alveolar stops
        "t" | "d" => VisemeId::DD,

        // Velar / uvular
        "k" | "g" | "q" | "ɣ" => VisemeId::KK,

        // Postalveolar
        "tʃ" | "dʒ" | "ʃ" | "ʒ" | "ɕ" => VisemeId::CH,

        // Sibilants
        "s" | "z" | "ts" => VisemeId::SS,

        // Nasals and laterals
        "n" | "ŋ" | "l" => VisemeId::NN,

        "r" => VisemeId::RR,

        // Vowels, and the open-mouth fricatives
        "a" | "æ" | "h" | "χ" => VisemeId::AA,
        "e" => VisemeId::E,
        "i" | "ɪ" | "ɯ" | "j" => VisemeId::I,
        "o" | "ø" => VisemeId::O,
        "u" | "ʊ" | "y" | "w" => VisemeId::U,

        other => VisemeId::from_name(other).unwrap_or(VisemeId::Sil),
    }
}
