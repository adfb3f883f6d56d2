//! Script-variant selection.
//!
//! The origin renders every logical title in three scripts. Anonymous
//! requests pick one through `Accept-Language` content negotiation; the
//! explicit `/zh*` path prefixes bypass negotiation entirely.

use std::fmt;

/// One of the three renderings the origin can produce for a logical title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// The untransformed rendering, served under `/zh/`.
    Generic,
    /// Simplified script, served under `/zh-hans/`.
    Simplified,
    /// Traditional script, served under `/zh-hant/`.
    Traditional,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Generic, Variant::Simplified, Variant::Traditional];

    /// Wire tag used in cache keys and origin paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Generic => "zh",
            Variant::Simplified => "zh-hans",
            Variant::Traditional => "zh-hant",
        }
    }

    /// Origin path serving `title` in this variant.
    pub fn page_path(self, title: &str) -> String {
        format!("/{}/{}", self.as_str(), title)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SIMPLIFIED_TAGS: [&str; 4] = ["zh-cn", "zh-hans", "zh-sg", "zh-my"];
const TRADITIONAL_TAGS: [&str; 4] = ["zh-hk", "zh-tw", "zh-mo", "zh-hant"];

/// Select a variant from a raw `Accept-Language` header value.
///
/// Tracks the maximum q-value seen for each script family and lets the
/// higher one win; ties and headers naming neither family fall back to the
/// generic rendering.
pub fn from_accept_language(header: &str) -> Variant {
    let header = header.trim();
    if header.is_empty() {
        return Variant::Generic;
    }

    let mut max_hans = -1.0_f64;
    let mut max_hant = -1.0_f64;

    for part in header.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (tag, q) = parse_language_range(part);
        if tag.is_empty() {
            continue;
        }

        if SIMPLIFIED_TAGS.contains(&tag.as_str()) {
            if q > max_hans {
                max_hans = q;
            }
            continue;
        }
        if TRADITIONAL_TAGS.contains(&tag.as_str()) && q > max_hant {
            max_hant = q;
        }
    }

    let has_hans = max_hans >= 0.0;
    let has_hant = max_hant >= 0.0;

    match (has_hans, has_hant) {
        (true, false) => Variant::Simplified,
        (false, true) => Variant::Traditional,
        (true, true) if max_hans > max_hant => Variant::Simplified,
        (true, true) if max_hant > max_hans => Variant::Traditional,
        _ => Variant::Generic,
    }
}

/// Split one language-range into its lowercased tag and q-value.
///
/// A missing or malformed `q` parameter counts as 1.0.
fn parse_language_range(part: &str) -> (String, f64) {
    let mut tag = part;
    let mut q = 1.0_f64;

    if let Some(idx) = part.find(';') {
        tag = part[..idx].trim();
        for param in part[idx + 1..].split(';') {
            let param = param.trim();
            if param.to_ascii_lowercase().starts_with("q=") {
                if let Ok(value) = param[2..].trim().parse::<f64>() {
                    q = value;
                }
            }
        }
    }

    (tag.trim().to_ascii_lowercase(), q)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_header_is_generic() {
        assert_eq!(from_accept_language(""), Variant::Generic);
        assert_eq!(from_accept_language("   "), Variant::Generic);
    }

    #[test]
    fn unrelated_tags_are_generic() {
        assert_eq!(from_accept_language("en-US,en;q=0.9"), Variant::Generic);
        assert_eq!(from_accept_language("ja,fr;q=0.5"), Variant::Generic);
    }

    #[test]
    fn simplified_only_selects_simplified() {
        assert_eq!(from_accept_language("zh-CN"), Variant::Simplified);
        assert_eq!(
            from_accept_language("en;q=0.9, zh-Hans;q=0.3"),
            Variant::Simplified
        );
    }

    #[test]
    fn traditional_only_selects_traditional() {
        assert_eq!(from_accept_language("zh-TW"), Variant::Traditional);
        assert_eq!(from_accept_language("zh-MO;q=0.2"), Variant::Traditional);
    }

    #[test]
    fn higher_q_wins_between_families() {
        assert_eq!(
            from_accept_language("zh-TW;q=0.9, zh-CN;q=0.8"),
            Variant::Traditional
        );
        assert_eq!(
            from_accept_language("zh-CN;q=0.9, zh-HK;q=0.8"),
            Variant::Simplified
        );
    }

    #[test]
    fn equal_q_between_families_is_generic() {
        assert_eq!(
            from_accept_language("zh-CN;q=0.8, zh-TW;q=0.8"),
            Variant::Generic
        );
        assert_eq!(from_accept_language("zh-hans, zh-hant"), Variant::Generic);
    }

    #[test]
    fn max_q_within_a_family_is_tracked() {
        // zh-SG raises the simplified max above the traditional one.
        assert_eq!(
            from_accept_language("zh-CN;q=0.5, zh-SG;q=0.95, zh-TW;q=0.9"),
            Variant::Simplified
        );
    }

    #[test]
    fn malformed_q_defaults_to_one() {
        assert_eq!(
            from_accept_language("zh-TW;q=abc, zh-CN;q=0.9"),
            Variant::Traditional
        );
    }

    #[test]
    fn tags_are_case_insensitive() {
        assert_eq!(from_accept_language("ZH-HANS"), Variant::Simplified);
        assert_eq!(from_accept_language("Zh-Tw;Q=0.7"), Variant::Traditional);
    }

    #[test]
    fn selection_is_deterministic() {
        let header = "zh-CN;q=0.8, zh-TW;q=0.9, en;q=1.0";
        let first = from_accept_language(header);
        for _ in 0..10 {
            assert_eq!(from_accept_language(header), first);
        }
    }

    #[test]
    fn page_path_prefixes_the_wire_tag() {
        assert_eq!(Variant::Generic.page_path("Pikachu"), "/zh/Pikachu");
        assert_eq!(Variant::Simplified.page_path("Pikachu"), "/zh-hans/Pikachu");
        assert_eq!(
            Variant::Traditional.page_path("Pikachu"),
            "/zh-hant/Pikachu"
        );
    }
}
