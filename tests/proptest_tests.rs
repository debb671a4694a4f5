//! Property tests for snapshot diffing and change validation

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use trewind::models::{ChangeType, NewFileChange};
use trewind::tracker::{diff, hash_bytes, FileState, Snapshot};

fn snapshot_from(entries: &BTreeMap<String, Vec<u8>>) -> Snapshot {
    Snapshot {
        files: entries
            .iter()
            .map(|(name, content)| {
                (
                    PathBuf::from("/work").join(name),
                    FileState {
                        hash: hash_bytes(content),
                        size: content.len() as u64,
                    },
                )
            })
            .collect(),
        warnings: Vec::new(),
    }
}

fn file_map() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map("[a-z]{1,6}(\\.txt)?", prop::collection::vec(any::<u8>(), 0..32), 0..12)
}

proptest! {
    #[test]
    fn test_identical_snapshots_have_no_changes(files in file_map()) {
        let snapshot = snapshot_from(&files);
        prop_assert!(diff(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_diff_classifies_every_path(before in file_map(), after in file_map()) {
        let changes = diff(&snapshot_from(&before), &snapshot_from(&after));

        for change in &changes {
            let name = change.path.file_name().unwrap().to_string_lossy().to_string();
            match change.change_type {
                ChangeType::Created => {
                    prop_assert!(!before.contains_key(&name));
                    prop_assert!(change.old_hash.is_none());
                    let expected = hash_bytes(&after[&name]);
                    prop_assert_eq!(change.new_hash.as_deref(), Some(expected.as_str()));
                }
                ChangeType::Deleted => {
                    prop_assert!(!after.contains_key(&name));
                    prop_assert!(change.new_hash.is_none());
                    prop_assert_eq!(change.old_size, Some(before[&name].len() as u64));
                }
                ChangeType::Modified => {
                    prop_assert_ne!(&before[&name], &after[&name]);
                    prop_assert_ne!(&change.old_hash, &change.new_hash);
                }
            }
        }

        // Every path whose state differs shows up exactly once
        let expected = before
            .keys()
            .chain(after.keys())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .filter(|name| before.get(*name) != after.get(*name))
            .count();
        prop_assert_eq!(changes.len(), expected);
    }

    #[test]
    fn test_diff_output_is_sorted_by_path(before in file_map(), after in file_map()) {
        let changes = diff(&snapshot_from(&before), &snapshot_from(&after));
        prop_assert!(changes
            .windows(2)
            .all(|w| w[0].path.as_os_str() < w[1].path.as_os_str()));
    }

    #[test]
    fn test_hash_is_stable_hex(content in prop::collection::vec(any::<u8>(), 0..256)) {
        let hash = hash_bytes(&content);
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        prop_assert_eq!(hash, hash_bytes(&content));
    }

    #[test]
    fn test_created_change_with_old_hash_is_rejected(hash in "[0-9a-f]{64}") {
        let change = NewFileChange {
            file_path: PathBuf::from("/work/new.txt"),
            change_type: ChangeType::Created,
            old_hash: Some(hash.clone()),
            new_hash: Some(hash),
            old_size: None,
            new_size: Some(1),
            backup_path: None,
            warning: None,
        };
        prop_assert!(change.validate().is_err());
    }
}
