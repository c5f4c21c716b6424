/// Scratch key holding the archive container itself.
pub const ORIGINAL_KEY: &str = "original";

/// Prefix of the scratch keys holding extracted entries.
pub const EXTRACTED_PREFIX: &str = "extracted_";

/// Returns the scratch key under which the bytes of entry `name` are cached.
///
/// The key layout (`"original"`, `"extracted_" + name`) is relied upon by
/// other tools inspecting a scratch store, so it must not change.
#[inline]
pub fn extracted_key(name: &str) -> String {
    format!("{EXTRACTED_PREFIX}{name}")
}

/// Checks whether a requested file name is a wildcard pattern.
///
/// Only `*` and `?` are wildcard metacharacters; everything else, including
/// `[`, `{` and `.`, is part of a literal name.
#[inline]
pub fn has_wildcards(name: &str) -> bool {
    name.contains(['*', '?'])
}
