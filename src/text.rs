//! Word-boundary helpers shared by extraction, scoring and evaluation.

/// True if `needle` occurs in `haystack` delimited by non-alphanumeric characters.
/// Comparison is ASCII case-insensitive. Multi-word needles are matched as phrases.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    count_word(haystack, needle) > 0
}

/// Number of non-overlapping word-bounded occurrences of `needle`, ASCII case-insensitive.
pub fn count_word(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    let hay = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    let bytes = hay.as_bytes();
    let mut count = 0;
    let mut start = 0;

    while let Some(pos) = hay[start..].find(&needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = begin == 0 || !is_word_byte(bytes[begin - 1]);
        let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            count += 1;
            start = end;
        } else {
            start = begin + needle.chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        }
        if start >= hay.len() {
            break;
        }
    }
    count
}

/// True if any of the needles is present as a word
pub fn contains_any_word(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| contains_word(haystack, n))
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundaries() {
        assert!(contains_word("top 10 prescribers", "top"));
        assert!(!contains_word("stop here", "top"));
        assert!(contains_word("New York", "new york"));
        assert!(!contains_word("ORDER BY x", "OR"));
    }

    #[test]
    fn test_count_word() {
        assert_eq!(count_word("a JOIN b LEFT JOIN c", "JOIN"), 2);
        assert_eq!(count_word("x AND y ANDROID", "AND"), 1);
        assert_eq!(count_word("", "AND"), 0);
        assert_eq!(count_word("anything", ""), 0);
    }
}
