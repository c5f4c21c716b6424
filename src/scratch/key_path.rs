use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Longest file name produced for a key; well under the usual 255 byte limit.
pub const MAX_NAME_LEN: usize = 200;

/// Readable prefix kept in front of the digest when a name is shortened.
const SHORT_PREFIX_LEN: usize = MAX_NAME_LEN - 1 - 64;

/// Returns `true` if `b` can appear verbatim in an on-disk key file name.
#[inline]
fn is_plain_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

/// Maps a store key to a single flat file name.
///
/// Bytes outside `[A-Za-z0-9._-]` are written as `%XX`, as is a leading `.`,
/// so that keys such as `"extracted_xl/workbook.xml"` never create
/// subdirectories and `"."`/`".."` never name a real directory entry. `%`
/// itself is always escaped.
///
/// Names longer than [`MAX_NAME_LEN`] are cut to a readable prefix followed
/// by `~` and the SHA-256 of the whole key. `~` never survives escaping, so
/// shortened names cannot collide with plain ones.
///
/// The result is borrowed when the key needs no escaping.
pub fn escape_key(key: &str) -> Cow<'_, str> {
    let needs_escape = key.starts_with('.') || key.bytes().any(|b| !is_plain_byte(b));
    if !needs_escape && !key.is_empty() && key.len() <= MAX_NAME_LEN {
        return key.into();
    }

    let mut out = String::with_capacity(key.len() + 8);
    if key.is_empty() {
        out.push('%');
        return out.into();
    }
    for (i, b) in key.bytes().enumerate() {
        if is_plain_byte(b) && !(i == 0 && b == b'.') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }

    if out.len() > MAX_NAME_LEN {
        // Escaped names are pure ASCII, so any byte index is a char boundary.
        out.truncate(SHORT_PREFIX_LEN);
        out.push('~');
        out.push_str(&hex::encode(Sha256::digest(key.as_bytes())));
    }
    out.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_keys_are_borrowed() {
        assert!(matches!(escape_key("original"), Cow::Borrowed("original")));
        assert_eq!(escape_key("extracted_a.txt"), "extracted_a.txt");
    }

    #[test]
    fn separators_and_percent_are_escaped() {
        assert_eq!(escape_key("extracted_xl/a b.xml"), "extracted_xl%2Fa%20b.xml");
        assert_eq!(escape_key("50%"), "50%25");
        assert_eq!(escape_key("a~b"), "a%7Eb");
        assert_ne!(escape_key("a/b"), escape_key("a%2Fb"));
    }

    #[test]
    fn dot_names_never_escape_the_root() {
        assert_eq!(escape_key(".."), "%2E.");
        assert_eq!(escape_key("."), "%2E");
        assert_eq!(escape_key(""), "%");
    }

    #[test]
    fn long_keys_are_shortened_with_digest() {
        let long = format!("extracted_{}.txt", "a".repeat(250));
        let name = escape_key(&long);

        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.starts_with("extracted_aaa"));
        assert_eq!(name, escape_key(&long));

        let other = format!("extracted_{}.txx", "a".repeat(250));
        assert_ne!(name, escape_key(&other));
    }

    #[test]
    fn heavily_escaped_keys_are_shortened() {
        let key = format!("extracted_{}", "/".repeat(80));
        let name = escape_key(&key);
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.starts_with("extracted_%2F"));
        assert!(!name.contains('/'));
    }

    #[test]
    fn names_at_the_limit_are_kept() {
        let key = "k".repeat(MAX_NAME_LEN);
        assert_eq!(escape_key(&key), key.as_str());
    }
}
