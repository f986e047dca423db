#[path = "common/mod.rs"]
mod common;

use common::*;
use taskvault::{
    decode_result, encode_result, render, ExportFormat, FixtureApi, ItemFilters, OrphanPolicy, RenderOptions,
    TaskLists,
};
use time::macros::datetime;

fn exported(policy: OrphanPolicy) -> TaskLists {
    let mut notes = child("n", "a");
    notes.notes = Some("line one, \"quoted\"".into());
    notes.due = Some(datetime!(2012-02-01 00:00:00 UTC));
    let items = vec![root("a"), notes, child("stray", "missing"), root("b").completed_at(T0)];
    let api = ScriptedApi::new(FixtureApi::new(vec![list("L1", "Home", items)]));
    let h = harness(&api, creds_for(USER), test_options().with_orphan_policy(policy));
    h.service.start_job(USER, ItemFilters { include_completed: true, ..ItemFilters::default() }).unwrap();
    h.worker.run(USER).unwrap();
    h.service.get_result(USER).unwrap()
}

/// CSV: one header, one quoted row per kept item; invalid rows only on request.
#[test]
fn csv_rows_and_quoting() {
    let lists = exported(OrphanPolicy::Flag);
    let csv = render(&lists, ExportFormat::Csv, RenderOptions::default()).unwrap();
    let rows: Vec<&str> = csv.split("\r\n").filter(|r| !r.is_empty()).collect();
    assert_eq!(rows[0], "list,title,notes,status,due,completed,deleted,hidden,depth");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[2], "Home,task n,\"line one, \"\"quoted\"\"\",needsAction,2012-02-01,,false,false,1");
    assert!(rows[3].starts_with("Home,task b,,completed,,2012-01-28T07:30:00Z,"));

    let all = render(&lists, ExportFormat::Csv, RenderOptions { show_invalid: true }).unwrap();
    assert!(all.contains("task stray"));
    assert!(all.contains(",-99\r\n"));
}

/// Outline: two spaces per depth level, flagged orphans marked with `!`.
#[test]
fn outline_indents_by_depth() {
    let lists = exported(OrphanPolicy::Flag);
    let text = render(&lists, ExportFormat::Outline, RenderOptions { show_invalid: true }).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "# Home");
    assert_eq!(lines[1], "[ ] task a");
    assert_eq!(lines[2], "  [ ] task n (due 2012-02-01)");
    assert_eq!(lines[3], "![ ] task stray");
    assert_eq!(lines[4], "[x] task b");

    let hidden = render(&lists, ExportFormat::Outline, RenderOptions::default()).unwrap();
    assert!(!hidden.contains("stray"));
}

/// JSON drops invalid items unless asked; raw keeps the stored structure as is.
#[test]
fn json_and_raw() {
    let lists = exported(OrphanPolicy::Flag);
    let pretty = render(&lists, ExportFormat::Json, RenderOptions::default()).unwrap();
    let parsed: TaskLists = serde_json::from_str(&pretty).unwrap();
    assert_eq!(parsed.lists[0].items.len(), 3);

    let raw = render(&lists, ExportFormat::Raw, RenderOptions::default()).unwrap();
    let parsed: TaskLists = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed, lists);
    assert!(!raw.contains('\n'));
}

/// With the remove policy the orphan never reaches storage.
#[test]
fn remove_policy_drops_orphans_before_storage() {
    let lists = exported(OrphanPolicy::Remove);
    let ids: Vec<&str> = lists.lists[0].items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "n", "b"]);
}

/// Stored payloads decode whether or not they were compressed.
#[test]
fn payload_codec_accepts_both_encodings() {
    let lists = exported(OrphanPolicy::Flag);
    let packed = encode_result(&lists, true).unwrap();
    let plain = encode_result(&lists, false).unwrap();
    assert_eq!(&packed[..4], &[0x28, 0xB5, 0x2F, 0xFD]);
    assert_eq!(plain[0], b'{');
    assert_eq!(decode_result(&packed).unwrap(), lists);
    assert_eq!(decode_result(&plain).unwrap(), lists);
}
