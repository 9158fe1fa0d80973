//! Unified diffs between a trusted base body and the current file body.

use similar::ChangeTag;
use similar::TextDiff;

/// Inputs larger than this never enter the diff pipeline.
pub const MAX_DIFF_INPUT_BYTES: u64 = 2 * 1024 * 1024;

/// Inputs with more lines than this never enter the diff pipeline.
pub const MAX_DIFF_INPUT_LINES: u32 = 12_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    /// Unified diff body including the `--- a/` / `+++ b/` header lines.
    pub text: String,
    /// Modified-line count: paired delete/insert lines count once.
    pub changed_lines: u32,
}

/// Diff `base` against `current`, or `None` when the bodies produce no
/// hunks.
pub fn unified_diff(display_path: &str, base: &str, current: &str) -> Option<UnifiedDiff> {
    let diff = TextDiff::from_lines(base, current);

    let mut deletions: u32 = 0;
    let mut insertions: u32 = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Insert => insertions += 1,
            ChangeTag::Equal => {}
        }
    }
    let changed_lines = deletions.max(insertions);
    if changed_lines == 0 {
        return None;
    }

    let text = diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{display_path}"), &format!("b/{display_path}"))
        .to_string();
    Some(UnifiedDiff {
        text,
        changed_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn body(lines: u32, mutate: Option<u32>) -> String {
        let mut out = String::new();
        for n in 1..=lines {
            if Some(n) == mutate {
                out.push_str(&format!("line {n} :: changed text payload\n"));
            } else {
                out.push_str(&format!("line {n} :: original text payload\n"));
            }
        }
        out
    }

    #[test]
    fn single_line_replacement_counts_once() {
        let base = body(300, None);
        let current = body(300, Some(200));
        let Some(diff) = unified_diff("b.txt", &base, &current) else {
            panic!("expected hunks");
        };
        assert_eq!(diff.changed_lines, 1);
        assert!(diff.text.starts_with("--- a/b.txt\n+++ b/b.txt\n"));
        assert!(diff.text.contains("-line 200 :: original text payload"));
        assert!(diff.text.contains("+line 200 :: changed text payload"));
    }

    #[test]
    fn pure_insertions_count_each_new_line() {
        let base = "one\ntwo\n";
        let current = "one\nadded a\nadded b\ntwo\n";
        let Some(diff) = unified_diff("x", base, current) else {
            panic!("expected hunks");
        };
        assert_eq!(diff.changed_lines, 2);
    }

    #[test]
    fn identical_bodies_produce_no_diff() {
        let base = body(10, None);
        assert_eq!(unified_diff("x", &base, &base), None);
    }
}
