use regex_lite::{Regex, RegexBuilder};
use super::ZipFsError;

/// A compiled wildcard pattern for resolving requested file names.
///
/// `*` matches zero or more characters and `?` matches exactly one
/// character; any other character matches itself literally. Matching is
/// anchored at both ends and ignores case, so a pattern must describe the
/// whole entry name.
///
/// # Example
/// ```
/// # use parcel_zipfs::NamePattern;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pattern = NamePattern::new("readme.*")?;
///
/// assert!( pattern.matches("README.TXT"));
/// assert!( pattern.matches("readme.md"));
/// assert!(!pattern.matches("docs/readme.md"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// Compiles a wildcard pattern.
    ///
    /// # Errors
    /// Returns `ZipFsError::InvalidPattern` if the translated expression
    /// cannot be compiled (only possible for patterns exceeding the regex
    /// size limit).
    pub fn new(pattern: &str) -> Result<Self, ZipFsError> {
        let regex = RegexBuilder::new(&Self::translate(pattern))
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .map_err(|err| ZipFsError::InvalidPattern(format!("{pattern}: {err}")))?;

        Ok(Self { source: pattern.to_owned(), regex })
    }

    /// Checks whether `name` matches the whole pattern.
    #[inline]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The pattern as originally written.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Translates wildcards to an anchored regular expression.
    ///
    /// `regex-lite` only folds ASCII case, so every other cased character is
    /// spelled out as a class of its single-character case variants.
    fn translate(pattern: &str) -> String {
        let mut out = String::with_capacity(pattern.len() * 2 + 2);
        out.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                _ => push_literal(&mut out, ch),
            }
        }
        out.push('$');
        out
    }
}

/// Appends `ch` as a literal, widened to its case variants when it has any
/// outside ASCII.
fn push_literal(out: &mut String, ch: char) {
    let mut variants = vec![ch];
    if !ch.is_ascii() {
        for variant in [single_char(ch.to_lowercase()), single_char(ch.to_uppercase())] {
            if let Some(v) = variant.filter(|v| !variants.contains(v)) {
                variants.push(v);
            }
        }
    }

    if variants.len() == 1 {
        out.push_str(&regex_lite::escape(ch.encode_utf8(&mut [0; 4])));
        return;
    }
    out.push('[');
    for v in variants {
        out.push_str(&regex_lite::escape(v.encode_utf8(&mut [0; 4])));
    }
    out.push(']');
}

/// The mapped character, when a case mapping yields exactly one.
fn single_char(mut mapped: impl Iterator<Item = char>) -> Option<char> {
    let first = mapped.next()?;
    mapped.next().is_none().then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, name: &str) -> bool {
        NamePattern::new(pattern).unwrap().matches(name)
    }

    #[test]
    fn star_matches_any_run() {
        assert!(matches("x*.log", "x1.log"));
        assert!(matches("x*.log", "x.log"));
        assert!(matches("x*.log", "xdir/nested.log"));
        assert!(!matches("x*.log", "y.log"));
    }

    #[test]
    fn question_mark_matches_exactly_one() {
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "ac"));
        assert!(!matches("a?c", "abbc"));
    }

    #[test]
    fn dot_is_literal() {
        assert!(matches("a.tx?", "a.txt"));
        assert!(!matches("a.tx?", "axtxt"));
    }

    #[test]
    fn anchored_at_both_ends() {
        assert!(!matches("*.txt", "a.txtx"));
        assert!(!matches("a*", "ba"));
    }

    #[test]
    fn case_insensitive() {
        assert!(matches("readme.*", "README.TXT"));
        assert!(matches("*.XML", "sheet1.xml"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(matches("[a]+(b)|c$*", "[A]+(B)|c$.txt"));
        assert!(!matches("[ab]*", "a.txt"));
        assert!(matches("^*", "^anything"));
    }

    #[test]
    fn case_folding_covers_non_ascii_letters() {
        assert!(matches("été.*", "ÉTÉ.txt"));
        assert!(matches("ΣΟΦΙΑ?", "σοφια1"));
        assert!(!matches("été.*", "ete.txt"));
    }

    #[test]
    fn multi_char_case_mappings_stay_literal() {
        // 'ß' upper-cases to "SS"; only the exact character matches.
        assert!(matches("stra*ße", "STRASSE straße"));
        assert!(!matches("straße", "STRASSE"));
    }

    #[test]
    fn only_wildcards_match_everything() {
        assert!(matches("*", ""));
        assert!(matches("*", "any/thing"));
        assert!(matches("?*", "x"));
        assert!(!matches("?*", ""));
    }
}
