#![expect(clippy::unwrap_used)]

//! End-to-end walks through the decision engine against real files, an
//! object store on disk, and a replayable session.

mod common;

use common::Harness;
use common::mode;
use pretty_assertions::assert_eq;
use readcache_core::SessionView;
use readcache_core::tools::RefreshToolArgs;
use readcache_core::tools::handle_refresh_tool;
use readcache_protocol::EntryBody;
use readcache_protocol::ReadMode;
use readcache_protocol::SessionEntry;

#[tokio::test]
async fn unchanged_full_read_collapses_to_a_marker() {
    let mut h = Harness::new();
    h.write_file("a.txt", "alpha\nbeta\ngamma");

    let first = h.read("a.txt").await;
    assert_eq!(mode(&first), ReadMode::Full);
    assert_eq!(first.text(), "alpha\nbeta\ngamma");

    let second = h.read("a.txt").await;
    assert_eq!(mode(&second), ReadMode::Unchanged);
    assert_eq!(second.text(), "[readcache: unchanged, 3 lines]");
}

#[tokio::test]
async fn single_line_edit_is_served_as_a_diff() {
    let mut h = Harness::new();
    h.numbered_file("b.txt", 300, |n| format!("line {n} :: original text payload"));

    let first = h.read("b.txt").await;
    assert_eq!(mode(&first), ReadMode::Full);

    h.numbered_file("b.txt", 300, |n| {
        if n == 200 {
            format!("line {n} :: changed text payload")
        } else {
            format!("line {n} :: original text payload")
        }
    });

    let second = h.read("b.txt").await;
    assert_eq!(mode(&second), ReadMode::Diff);
    let text = second.text();
    assert!(
        text.starts_with("[readcache: 1 lines changed of 300]\n"),
        "unexpected diff header: {text}"
    );
    assert!(text.contains("-line 200 :: original text payload"));
    assert!(text.contains("+line 200 :: changed text payload"));
}

#[tokio::test]
async fn edits_outside_a_range_keep_the_range_marker() {
    let mut h = Harness::new();
    h.numbered_file("c.txt", 400, |n| format!("line {n}"));

    assert_eq!(mode(&h.read("c.txt").await), ReadMode::Full);

    let ranged = h.read("c.txt:160-249").await;
    assert_eq!(mode(&ranged), ReadMode::UnchangedRange);
    assert_eq!(
        ranged.text(),
        "[readcache: unchanged in lines 160-249 of 400]"
    );

    h.numbered_file("c.txt", 400, |n| {
        if n == 300 {
            "line 300 updated".to_string()
        } else {
            format!("line {n}")
        }
    });

    let ranged = h.read("c.txt:160-249").await;
    assert_eq!(mode(&ranged), ReadMode::UnchangedRange);
    assert!(ranged.text().contains("changes exist outside this range"));

    let covering = h.read("c.txt:100-349").await;
    assert_eq!(mode(&covering), ReadMode::BaselineFallback);
    assert!(covering.text().contains("line 300 updated"));
}

#[tokio::test]
async fn shifted_line_numbers_invalidate_range_reuse() {
    let mut h = Harness::new();
    let path = h.numbered_file("d.txt", 200, |n| format!("line {n}"));

    assert_eq!(mode(&h.read("d.txt").await), ReadMode::Full);

    let original = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, format!("inserted header line\n{original}")).unwrap();

    let outcome = h.read("d.txt:100-120").await;
    assert_eq!(mode(&outcome), ReadMode::BaselineFallback);
    assert!(outcome.text().contains("line 99"));
}

#[tokio::test]
async fn compaction_severs_trust_in_pre_barrier_anchors() {
    let mut h = Harness::new();
    h.write_file("e.txt", "stable content\n");

    assert_eq!(mode(&h.read("e.txt").await), ReadMode::Full);
    assert_eq!(mode(&h.read("e.txt").await), ReadMode::Unchanged);

    h.session
        .append_entry(EntryBody::Compaction {
            first_kept_entry_id: None,
        })
        .unwrap();

    // A pre-compaction anchor exists, but the barrier is strict: the next
    // read must emit content again.
    let outcome = h.read("e.txt").await;
    assert!(matches!(
        mode(&outcome),
        ReadMode::Full | ReadMode::BaselineFallback
    ));
    assert_eq!(outcome.text(), "stable content");
}

#[tokio::test]
async fn refresh_survives_session_restart() {
    let mut h = Harness::with_persisted_session();
    h.write_file("f.txt", "fn main() {}\n");

    assert_eq!(mode(&h.read("f.txt").await), ReadMode::Full);
    assert_eq!(mode(&h.read("f.txt").await), ReadMode::Unchanged);

    handle_refresh_tool(
        &h.runtime,
        &mut h.session,
        h.dir.path(),
        RefreshToolArgs {
            path: "f.txt".to_string(),
            offset: None,
            limit: None,
        },
    )
    .await
    .unwrap();

    // The turn carrying this read never flushes; only the overlay saw it.
    assert_eq!(mode(&h.read_unflushed("f.txt").await), ReadMode::Full);

    // Reopen the session from disk, as after a restart.
    let log_path = h.session.file_path().unwrap().to_path_buf();
    h.session = readcache_core::SessionLog::open(&log_path).unwrap();
    h.runtime.session_switch();

    // The invalidation replays from the persisted entries.
    assert_eq!(mode(&h.read("f.txt").await), ReadMode::Full);
    assert_eq!(mode(&h.read("f.txt").await), ReadMode::Unchanged);
}

#[tokio::test]
async fn missing_base_object_degrades_to_baseline() {
    let mut h = Harness::new();
    h.write_file("g.txt", "original body\n");

    let first = h.read("g.txt").await;
    assert_eq!(mode(&first), ReadMode::Full);
    let served_hash = first.meta.as_ref().unwrap().served_hash.clone();

    std::fs::remove_file(h.object_path(&served_hash)).unwrap();
    h.write_file("g.txt", "mutated body\n");

    let second = h.read("g.txt").await;
    assert_eq!(mode(&second), ReadMode::BaselineFallback);
    assert!(second.text().contains("mutated body"));
}

#[tokio::test]
async fn replayed_entries_survive_in_order() {
    // The metadata records round-trip through real session entries: what
    // the harness appended is what replay sees.
    let mut h = Harness::new();
    h.write_file("a.txt", "alpha\n");
    h.read("a.txt").await;
    h.read("a.txt").await;

    let entries: Vec<SessionEntry> = h.session.branch_entries();
    let modes: Vec<ReadMode> = entries
        .iter()
        .filter_map(|entry| entry.read_meta().map(|meta| meta.mode))
        .collect();
    assert_eq!(modes, vec![ReadMode::Full, ReadMode::Unchanged]);
}
