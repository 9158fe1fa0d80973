//! Line arithmetic shared by the baseline reader, the decision engine, and
//! the diff gates.
//!
//! Line numbers are 1-based and inclusive throughout. A trailing newline
//! does not open a new line: `"alpha\n"` is one line, `"alpha\nbeta"` is
//! two, and the empty file counts as a single empty line so that every file
//! has at least one addressable line.

/// Number of lines in `text` under the conventions above.
pub fn total_lines(text: &str) -> u32 {
    let newlines = text.bytes().filter(|&b| b == b'\n').count() as u32;
    if text.is_empty() || !text.ends_with('\n') {
        newlines + 1
    } else {
        newlines
    }
}

/// The lines of `text`, without terminators, under the same conventions as
/// [`total_lines`].
pub fn lines_of(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// The inclusive 1-based slice `[start..=end]` of `text`, clamped to the
/// available lines and joined with `\n`.
pub fn slice_lines(text: &str, start: u32, end: u32) -> String {
    let lines = lines_of(text);
    if start == 0 || lines.is_empty() {
        return String::new();
    }
    let from = (start as usize - 1).min(lines.len());
    let to = (end as usize).min(lines.len());
    if from >= to {
        return String::new();
    }
    lines[from..to].join("\n")
}
