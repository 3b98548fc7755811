//! Text normalization for catalog matching.

use unicode_normalization::UnicodeNormalization;

/// Combining Diacritical Marks block; dropped after canonical decomposition.
const COMBINING_MARKS: std::ops::RangeInclusive<char> = '\u{0300}'..='\u{036F}';

/// Lowercase, decompose (NFD) and drop combining marks, replace anything
/// outside `[a-z0-9]` and whitespace with a space, then collapse runs of
/// whitespace.
pub fn normalize(text: &str) -> String {
    let lowered: String = text.chars().flat_map(char::to_lowercase).collect();
    let folded: String = lowered
        .nfd()
        .filter(|c| !COMBINING_MARKS.contains(c))
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_portuguese_accents() {
        assert_eq!(normalize("Relatório de Análise"), "relatorio de analise");
        assert_eq!(normalize("AÇÃO çedilha"), "acao cedilha");
    }

    #[test]
    fn strips_punctuation_and_collapses_space() {
        assert_eq!(normalize("  Hello,   world!!\n(code)  "), "hello world code");
        assert_eq!(normalize("e-mail/api_v2"), "e mail api v2");
    }

    #[test]
    fn non_latin_becomes_space() {
        assert_eq!(normalize("rust 🦀 é ótimo"), "rust e otimo");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn decomposes_beyond_latin_1() {
        assert_eq!(normalize("Tiếng Việt"), "tieng viet");
        assert_eq!(normalize("İstanbul"), "istanbul");
        assert_eq!(normalize("Română: ș ț"), "romana s t");
        assert_eq!(normalize("Ǎ"), "a");
    }

    #[test]
    fn marks_outside_the_combining_block_split_words() {
        // U+1DC0 lies outside U+0300..=U+036F and is not stripped.
        assert_eq!(normalize("a\u{1DC0}b"), "a b");
    }
}
