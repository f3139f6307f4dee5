//! Tolerant semantic-version comparison for catalog version strings.
//!
//! Catalog entries are written by hand, so the comparator accepts a
//! leading `v`, missing minor/patch components, and prerelease/build
//! suffixes. Strings that still fail to parse fall back to a plain
//! lexicographic compare instead of erroring out.

use std::cmp::Ordering;

use semver::Version;

/// Returns the highest version string, or `None` for an empty input.
pub fn latest_of<'a, I>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .max_by(|a, b| compare(a, b))
        .map(|v| v.to_string())
}

/// Total order over version strings. Parseable inputs follow SemVer
/// precedence (prerelease below release, build metadata ignored);
/// anything else compares lexicographically.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse_tolerant(a), parse_tolerant(b)) {
        (Some(va), Some(vb)) => va.cmp_precedence(&vb),
        _ => a.cmp(b),
    }
}

fn parse_tolerant(input: &str) -> Option<Version> {
    let s = input.trim();
    let s = s.strip_prefix(['v', 'V']).unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }

    // Pad a bare "8" or "8.0" out to three components, keeping any
    // prerelease/build suffix attached to the last one.
    let (core, rest) = match s.find(['-', '+']) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    };
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut padded = parts.clone();
    while padded.len() < 3 {
        padded.push("0");
    }
    let candidate = format!("{}.{}.{}{}", padded[0], padded[1], padded[2], rest);
    Version::parse(&candidate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_release() {
        let versions = ["8.0.4", "8.0.5", "7.9.9"];
        assert_eq!(latest_of(versions.iter().copied()).as_deref(), Some("8.0.5"));
    }

    #[test]
    fn tolerates_leading_v_and_short_versions() {
        assert_eq!(compare("v1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare("8", "7.9.9"), Ordering::Greater);
        assert_eq!(compare("8.1", "8.0.5"), Ordering::Greater);
    }

    #[test]
    fn prerelease_orders_below_release() {
        assert_eq!(compare("1.0.0-rc.1", "1.0.0"), Ordering::Less);
        assert_eq!(compare("1.0.0-alpha", "1.0.0-beta"), Ordering::Less);
    }

    #[test]
    fn build_metadata_is_ignored() {
        assert_eq!(compare("1.0.0+build.5", "1.0.0+build.9"), Ordering::Equal);
    }

    #[test]
    fn unparseable_falls_back_to_lexicographic() {
        assert_eq!(compare("nightly-b", "nightly-a"), Ordering::Greater);
        assert_eq!(
            latest_of(["snapshot", "release"].iter().copied()).as_deref(),
            Some("snapshot")
        );
    }

    #[test]
    fn total_order_on_mixed_list() {
        let mut versions = vec!["1.0.0", "v2.0", "2.0.0-rc.1", "0.9"];
        versions.sort_by(|a, b| compare(a, b));
        assert_eq!(versions, vec!["0.9", "1.0.0", "2.0.0-rc.1", "v2.0"]);
    }
}
