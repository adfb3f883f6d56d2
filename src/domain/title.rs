//! Title normalization.
//!
//! Every title entering the cache — from a page path, an `index.php` query,
//! or a purge request — passes through [`normalize`] so that one logical
//! page maps to exactly one cache key per variant.

use percent_encoding::percent_decode_str;

/// Normalize a raw title into its canonical cache form.
///
/// Percent-decodes (keeping the raw form when the bytes are not valid
/// UTF-8), maps ASCII spaces to underscores, then lexically cleans the
/// rooted path so `.`/`..` segments and duplicate slashes collapse. The
/// result carries no leading slash; an empty result marks an invalid title.
/// Normalization is idempotent.
pub fn normalize(raw: &str) -> String {
    let decoded = match percent_decode_str(raw).decode_utf8() {
        Ok(value) => value.into_owned(),
        Err(_) => raw.to_string(),
    };
    let underscored = decoded.replace(' ', "_");
    let cleaned = clean_rooted(&format!("/{underscored}"));
    cleaned.trim_start_matches('/').to_string()
}

/// Whether a normalized title addresses the wiki's `Special:` namespace.
pub fn is_special_page(title: &str) -> bool {
    title.to_lowercase().starts_with("special:")
}

/// Lexical clean of a rooted path: drops empty and `.` segments and lets
/// `..` consume the previous segment, never escaping the root.
fn clean_rooted(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut cleaned = String::with_capacity(path.len());
    cleaned.push('/');
    cleaned.push_str(&segments.join("/"));
    cleaned
}
