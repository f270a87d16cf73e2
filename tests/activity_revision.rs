//! Activity extraction end to end: a rule re-triggered by changing screen
//! content revises the same entry id rather than minting a new one.

use orbitmesh::activity::{Emit, Extract, Extractor, Identity, Profile, Rule, TriggerRegion, UpdateWindow};
use orbitmesh::activity::extractor::entry_id_for;
use orbitmesh::activity::ActivityOutput;

fn file_edit_profile() -> Profile {
    Profile {
        command_pattern: regex::Regex::new("claude").unwrap(),
        args_pattern: regex::Regex::new(".*").unwrap(),
        rules: vec![Rule {
            id: "file_edit".into(),
            enabled: true,
            trigger_region: TriggerRegion { top: 0, bottom: 1, left: None, right: None },
            extract: Extract::RegionText {
                region: TriggerRegion { top: 0, bottom: 1, left: None, right: None },
            },
            emit: Emit {
                kind: "file_edit".into(),
                update_window: UpdateWindow::Always,
                finalize: false,
                open: None,
            },
            identity: Identity::Static(Some("src/main.rs".into())),
        }],
    }
}

#[test]
fn second_snapshot_revises_the_same_entry_after_content_changes() {
    let mut extractor = Extractor::new(file_edit_profile(), 40, 1, 8);

    let first = extractor.apply_snapshot(vec!["editing src/main.rs".into()], "s1");
    let first_entry = first
        .iter()
        .find_map(|o| match o {
            ActivityOutput::Upsert(e) => Some(e.clone()),
            _ => None,
        })
        .expect("first snapshot should emit an upsert");
    assert_eq!(first_entry.rev, 1);
    assert!(first_entry.open);

    let second = extractor.apply_snapshot(vec!["saved src/main.rs".into()], "s1");
    let second_entry = second
        .iter()
        .find_map(|o| match o {
            ActivityOutput::Upsert(e) => Some(e.clone()),
            _ => None,
        })
        .expect("second snapshot should emit an upsert");

    assert_eq!(second_entry.id, first_entry.id);
    assert_eq!(second_entry.rev, 2);
    assert_eq!(second_entry.id, entry_id_for("file_edit", "src/main.rs"));
    assert_ne!(second_entry.data, first_entry.data);
}

#[test]
fn distinct_identities_never_collide_on_entry_id() {
    let a = entry_id_for("file_edit", "src/main.rs");
    let b = entry_id_for("file_edit", "src/lib.rs");
    assert_ne!(a, b);
}
