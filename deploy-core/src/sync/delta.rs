//! Delta computation between two snapshots.
//!
//! Content hash equality is the only criterion for "unchanged": size and
//! modification-time differences are ignored when the hashes match, so a
//! touch without an edit never triggers a redeploy.

use crate::sync::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Added / Modified / Deleted partition between two snapshots.
///
/// Each list is sorted and the three lists are pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSet {
    /// Present in current, absent in previous
    pub added: Vec<String>,
    /// Present in both with a different hash
    pub modified: Vec<String>,
    /// Present in previous, absent in current
    pub deleted: Vec<String>,
}

impl DeltaSet {
    /// Delta for a first deploy: everything in `current` is added.
    pub fn all_added(current: &Snapshot) -> Self {
        Self {
            added: current.paths().into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    /// Nothing to deploy.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Paths whose content has to be shipped (Added ∪ Modified), sorted.
    pub fn files_to_package(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .added
            .iter()
            .chain(self.modified.iter())
            .cloned()
            .collect();
        files.sort();
        files
    }
}

/// Compare `current` against `previous`.
pub fn diff(current: &Snapshot, previous: &Snapshot) -> DeltaSet {
    let previous_index: HashMap<&str, &str> = previous
        .files()
        .iter()
        .map(|r| (r.path.as_str(), r.hash.as_str()))
        .collect();

    let mut delta = DeltaSet::default();

    for record in current.files() {
        match previous_index.get(record.path.as_str()) {
            None => delta.added.push(record.path.clone()),
            Some(hash) if *hash != record.hash => delta.modified.push(record.path.clone()),
            Some(_) => {}
        }
    }

    for record in previous.files() {
        if current.get(&record.path).is_none() {
            delta.deleted.push(record.path.clone());
        }
    }

    // Snapshots keep their records sorted, so the lists already are; sort
    // anyway so the guarantee does not depend on that detail.
    delta.added.sort();
    delta.modified.sort();
    delta.deleted.sort();
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::walker::fingerprint;
    use crate::sync::snapshot::FileRecord;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn snapshot(entries: &[(&str, &str)]) -> Snapshot {
        Snapshot::new(
            entries
                .iter()
                .map(|(path, hash)| FileRecord {
                    path: path.to_string(),
                    hash: hash.to_string(),
                    size: hash.len() as u64,
                    modified: Utc::now(),
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_identical_snapshots_produce_empty_delta() {
        let snap = snapshot(&[("a.txt", "1"), ("b/c.txt", "2")]);
        let delta = diff(&snap, &snap);
        assert!(delta.is_empty());
        assert_eq!(delta.len(), 0);
    }

    #[test]
    fn test_added_modified_deleted() {
        let previous = snapshot(&[("a.txt", "1"), ("b/c.txt", "2")]);
        let current = snapshot(&[("a.txt", "9"), ("d.txt", "3")]);

        let delta = diff(&current, &previous);
        assert_eq!(delta.added, vec!["d.txt"]);
        assert_eq!(delta.modified, vec!["a.txt"]);
        assert_eq!(delta.deleted, vec!["b/c.txt"]);
        assert_eq!(delta.files_to_package(), vec!["a.txt", "d.txt"]);
    }

    #[test]
    fn test_first_deploy_marks_everything_added() {
        let current = snapshot(&[("a.txt", "1"), ("b/c.txt", "2")]);
        let delta = diff(&current, &Snapshot::empty());
        assert_eq!(delta, DeltaSet::all_added(&current));
    }

    #[test]
    fn test_metadata_only_change_is_ignored() {
        let previous = snapshot(&[("a.txt", "1")]);
        let mut touched = previous.files().to_vec();
        touched[0].modified = touched[0].modified + Duration::hours(3);
        touched[0].size = 999;
        let current = Snapshot::new(touched).unwrap();

        assert!(diff(&current, &previous).is_empty());
    }

    #[test]
    fn test_unchanged_directory_yields_empty_delta() -> crate::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("assets/img"))?;
        fs::write(dir.path().join("index.html"), b"<h1>hi</h1>")?;
        fs::write(dir.path().join("assets/img/logo.svg"), b"<svg/>")?;

        let first = fingerprint(dir.path())?;
        let second = fingerprint(dir.path())?;
        assert!(diff(&second, &first).is_empty());
        Ok(())
    }

    #[test]
    fn test_touch_without_edit_is_not_modified() -> crate::Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("a.txt");
        fs::write(&file, b"same")?;
        let before = fingerprint(dir.path())?;

        // Rewrite identical bytes later so only the mtime moves.
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&file, b"same")?;
        let after = fingerprint(dir.path())?;

        assert!(diff(&after, &before).modified.is_empty());
        Ok(())
    }

    fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
        prop::collection::btree_map("[a-e]{1,2}", 0u8..3, 0..12).prop_map(|entries| {
            Snapshot::new(
                entries
                    .into_iter()
                    .map(|(path, hash)| FileRecord {
                        path,
                        hash: hash.to_string(),
                        size: 0,
                        modified: Utc::now(),
                    })
                    .collect(),
            )
            .unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_delta_partitions_both_snapshots(current in arb_snapshot(), previous in arb_snapshot()) {
            let delta = diff(&current, &previous);
            let added: BTreeSet<&str> = delta.added.iter().map(String::as_str).collect();
            let modified: BTreeSet<&str> = delta.modified.iter().map(String::as_str).collect();
            let deleted: BTreeSet<&str> = delta.deleted.iter().map(String::as_str).collect();

            prop_assert!(added.is_disjoint(&modified));
            prop_assert!(added.is_disjoint(&deleted));
            prop_assert!(modified.is_disjoint(&deleted));

            let current_paths: BTreeSet<&str> = current.paths().into_iter().collect();
            let previous_paths: BTreeSet<&str> = previous.paths().into_iter().collect();
            let unchanged: BTreeSet<&str> = current_paths
                .iter()
                .copied()
                .filter(|p| !added.contains(p) && !modified.contains(p))
                .collect();

            let lhs: BTreeSet<&str> = added.union(&modified).copied().chain(unchanged.iter().copied()).collect();
            prop_assert_eq!(lhs, current_paths.clone());

            let rhs: BTreeSet<&str> = deleted.union(&unchanged).copied().collect();
            prop_assert_eq!(rhs, previous_paths);

            // Unchanged paths really carry equal hashes on both sides.
            for path in &unchanged {
                prop_assert_eq!(
                    current.get(path).map(|r| &r.hash),
                    previous.get(path).map(|r| &r.hash)
                );
            }
        }
    }
}
