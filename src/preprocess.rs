use serde::{Deserialize, Serialize};
use unicode_normalization::char::canonical_combining_class;
use unicode_normalization::UnicodeNormalization;

/// Pure text transform applied to a raw text before generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Preprocessor {
    /// Takes the text as is, minus leading and trailing whitespace.
    Basic,
    /// Removes diacritics: NFKD decomposition, then every character with a
    /// non-zero canonical combining class is dropped.
    StripDiacritics,
}

impl Preprocessor {
    pub const ALL: [Preprocessor; 2] = [Preprocessor::Basic, Preprocessor::StripDiacritics];

    pub fn key(&self) -> &'static str {
        match self {
            Preprocessor::Basic => "BASIC",
            Preprocessor::StripDiacritics => "STRIP_DIACRITICS",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Preprocessor::Basic => "Strips leading and trailing whitespace",
            Preprocessor::StripDiacritics => "Strips diacritics from the input text",
        }
    }

    pub fn preprocess(&self, input: &str) -> String {
        match self {
            Preprocessor::Basic => input.trim().to_string(),
            Preprocessor::StripDiacritics => strip_diacritics(input),
        }
    }
}

pub fn strip_diacritics(input: &str) -> String {
    input
        .nfkd()
        .filter(|c| canonical_combining_class(*c) == 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_romanian_diacritics() {
        assert_eq!(strip_diacritics("ăĂâÂîÎșȘțȚ"), "aAaAiIsStT");
        assert_eq!(
            strip_diacritics("Aveți vreo întrebare?"),
            "Aveti vreo intrebare?"
        );
    }

    #[test]
    fn test_strip_mixed_case() {
        assert_eq!(strip_diacritics("ĂvĂțĂrĂ vRȘ"), "AvAtArA vRS");
    }

    #[test]
    fn test_strip_other_languages() {
        assert_eq!(strip_diacritics("áéíóúüñ"), "aeiouun");
        assert_eq!(strip_diacritics("àâçéèêëîïôûùüÿ"), "aaceeeeiiouuuy");
        assert_eq!(strip_diacritics("äöüß"), "aouß");
    }

    #[test]
    fn test_strip_passthrough() {
        assert_eq!(strip_diacritics(""), "");
        assert_eq!(strip_diacritics("Hello, World!"), "Hello, World!");
    }

    #[test]
    fn test_basic_trims() {
        assert_eq!(Preprocessor::Basic.preprocess("  Mâine  \n"), "Mâine");
    }

    #[test]
    fn test_keys_roundtrip_through_serde() {
        for p in Preprocessor::ALL {
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{}\"", p.key()));
        }
    }
}
