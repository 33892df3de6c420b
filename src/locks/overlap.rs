//! File-pattern overlap semantics for workspace locks.
//!
//! Two pattern sets overlap iff any pair matches by one of three rules:
//! exact equality, directory-prefix containment (a pattern ending in `/`
//! covers anything under it), or a single-star glob where `*` matches any
//! run of non-slash characters. The empty set denotes the whole repo and
//! overlaps everything — including another empty set.

use glob::Pattern;

/// Do two pattern sets overlap at all?
///
/// Symmetric; an empty set overlaps everything.
#[must_use]
pub fn overlaps(a: &[String], b: &[String]) -> bool {
    if a.is_empty() || b.is_empty() {
        return true;
    }
    !overlapping_patterns(a, b).is_empty()
}

/// The concrete patterns from `b` that collide with `a` (for conflict
/// reporting). When either side is the whole repo, the other side's
/// patterns are returned verbatim.
#[must_use]
pub fn overlapping_patterns(a: &[String], b: &[String]) -> Vec<String> {
    if a.is_empty() {
        return b.to_vec();
    }
    if b.is_empty() {
        return a.to_vec();
    }
    let mut hits = Vec::new();
    for q in b {
        if a.iter().any(|p| pair_matches(p, q)) && !hits.contains(q) {
            hits.push(q.clone());
        }
    }
    hits
}

/// One pattern pair, checked by all three rules in both directions.
fn pair_matches(p: &str, q: &str) -> bool {
    if p == q {
        return true;
    }
    if dir_covers(p, q) || dir_covers(q, p) {
        return true;
    }
    glob_covers(p, q) || glob_covers(q, p)
}

/// `dir/` covers `dir/anything` (and `dir/` itself).
fn dir_covers(dir: &str, entry: &str) -> bool {
    dir.ends_with('/') && entry.starts_with(dir)
}

/// Single-star glob: `*` matches a run of non-slash characters.
fn glob_covers(pattern: &str, entry: &str) -> bool {
    if !pattern.contains('*') {
        return false;
    }
    Pattern::new(pattern).is_ok_and(|p| p.matches(entry))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn exact_equality_overlaps() {
        assert!(overlaps(&set(&["src/db.rs"]), &set(&["src/db.rs"])));
        assert!(!overlaps(&set(&["src/db.rs"]), &set(&["src/cli.rs"])));
    }

    #[test]
    fn directory_prefix_covers_entries() {
        assert!(overlaps(&set(&["src/"]), &set(&["src/db.rs"])));
        // Either direction.
        assert!(overlaps(&set(&["src/db/inner.rs"]), &set(&["src/db/"])));
        // Sibling directory is disjoint.
        assert!(!overlaps(&set(&["src/"]), &set(&["docs/readme.md"])));
    }

    #[test]
    fn star_glob_matches_within_a_segment() {
        assert!(overlaps(&set(&["src/*.rs"]), &set(&["src/db.rs"])));
        // Star does not cross slashes.
        assert!(!overlaps(&set(&["src/*.rs"]), &set(&["src/db/inner.rs"])));
    }

    #[test]
    fn empty_set_is_whole_repo() {
        assert!(overlaps(&[], &set(&["anything"])));
        assert!(overlaps(&set(&["anything"]), &[]));
        assert!(overlaps(&[], &[]));
    }

    #[test]
    fn overlapping_patterns_reports_the_collisions() {
        let a = set(&["src/db/", "Cargo.toml"]);
        let b = set(&["src/db/schema.rs", "README.md", "Cargo.toml"]);
        assert_eq!(
            overlapping_patterns(&a, &b),
            set(&["src/db/schema.rs", "Cargo.toml"])
        );
    }

    #[test]
    fn whole_repo_reports_other_side() {
        let b = set(&["src/a.rs", "src/b.rs"]);
        assert_eq!(overlapping_patterns(&[], &b), b);
        assert_eq!(overlapping_patterns(&b, &[]), b);
        assert!(overlapping_patterns(&[], &[]).is_empty());
    }

    #[test]
    fn symmetry_on_mixed_sets() {
        let a = set(&["src/", "docs/*.md"]);
        let b = set(&["src/main.rs", "docs/intro.md", "LICENSE"]);
        assert_eq!(overlaps(&a, &b), overlaps(&b, &a));
        assert_eq!(
            overlapping_patterns(&a, &b).is_empty(),
            overlapping_patterns(&b, &a).is_empty()
        );
    }
}
