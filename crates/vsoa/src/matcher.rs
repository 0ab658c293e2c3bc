// SPDX-License-Identifier: Apache-2.0 OR MIT

//! URL-prefix matching shared by publish fan-out (does subscriber `S` want
//! publish `P`?) and RPC listener lookup (which listener, if any, owns
//! request URL `P`?).

/// `true` iff a publish/request to `candidate` should be delivered to a
/// subscriber/listener registered under `pattern`.
///
/// - `pattern == "/"` matches everything (the default/catch-all).
/// - A `pattern` not ending in `/` matches only on exact equality.
/// - A `pattern` ending in `/` matches any `candidate` that starts with the
///   pattern minus its trailing slash, provided the next candidate byte
///   (if any) is itself `/` — i.e. `/tele/` matches `/tele/speed` and
///   `/tele` but not `/telemetry`.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    if pattern == "/" {
        return true;
    }
    match pattern.strip_suffix('/') {
        None => pattern == candidate,
        Some(prefix) => {
            candidate.starts_with(prefix)
                && (candidate.len() == prefix.len() || candidate.as_bytes()[prefix.len()] == b'/')
        }
    }
}

/// `true` iff `url` declares itself a prefix pattern (ends in `/`, length > 1
/// so the lone `"/"` default listener is not mistaken for a prefix entry of
/// itself).
pub fn is_prefix_pattern(url: &str) -> bool {
    url.len() > 1 && url.ends_with('/')
}

/// `true` iff `url` is the default/catch-all pattern.
pub fn is_default_pattern(url: &str) -> bool {
    url == "/"
}

/// Cheap hash for the exact-match bucket table: sum of every other byte,
/// modulo the bucket count. Mirrors the source's bucketing cost profile
/// (no cryptographic or even well-distributed hash is required — collisions
/// just chain within a bucket).
pub fn exact_bucket_hash(url: &str, bucket_count: usize) -> usize {
    let sum: u32 = url
        .as_bytes()
        .iter()
        .step_by(2)
        .map(|&b| b as u32)
        .sum();
    (sum as usize) % bucket_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pattern_matches_anything() {
        assert!(matches("/", "/a/b/c"));
        assert!(matches("/", "/"));
    }

    #[test]
    fn exact_pattern_requires_equality() {
        assert!(matches("/tele/speed", "/tele/speed"));
        assert!(!matches("/tele/speed", "/tele/speeds"));
        assert!(!matches("/tele/speed", "/tele/spee"));
    }

    #[test]
    fn prefix_pattern_matches_self_and_children_only() {
        assert!(matches("/tele/", "/tele/speed"));
        assert!(matches("/tele/", "/tele"));
        assert!(!matches("/tele/", "/telemetry"));
        assert!(!matches("/tele/", "/tel"));
    }

    #[test]
    fn prefix_detection() {
        assert!(is_prefix_pattern("/tele/"));
        assert!(!is_prefix_pattern("/"));
        assert!(!is_prefix_pattern("/tele"));
    }

    #[test]
    fn default_detection() {
        assert!(is_default_pattern("/"));
        assert!(!is_default_pattern("/tele/"));
    }

    #[test]
    fn bucket_hash_is_stable_and_in_range() {
        let a = exact_bucket_hash("/x/y", 32);
        let b = exact_bucket_hash("/x/y", 32);
        assert_eq!(a, b);
        assert!(a < 32);
    }
}
