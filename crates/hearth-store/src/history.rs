//! ---
//! hearth_section: "03-persistence-logging"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Persistence abstractions and storage bindings."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
//! Rolling manifest history kept per app for revert.
//!
//! Backups are named by a zero-padded sequence number so lexical order equals
//! creation order.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::fsutil::{children, write_atomic};
use crate::Result;

const BACKUP_EXT: &str = "yaml";

fn sequence_of(path: &Path) -> Option<u64> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(BACKUP_EXT) {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Backups in `dir`, oldest first.
pub(crate) fn entries(dir: &Path) -> Vec<(u64, PathBuf)> {
    let mut entries: Vec<(u64, PathBuf)> = children(dir)
        .into_iter()
        .filter_map(|path| sequence_of(&path).map(|seq| (seq, path)))
        .collect();
    entries.sort_by_key(|(seq, _)| *seq);
    entries
}

/// Store `contents` as the newest backup and prune down to `retain` entries.
pub(crate) fn push(dir: &Path, contents: &[u8], retain: usize) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let next = entries(dir).last().map(|(seq, _)| seq + 1).unwrap_or(1);
    let path = dir.join(format!("{:08}.{}", next, BACKUP_EXT));
    write_atomic(&path, contents)?;
    prune(dir, retain);
    Ok(path)
}

pub(crate) fn latest(dir: &Path) -> Option<PathBuf> {
    entries(dir).pop().map(|(_, path)| path)
}

fn prune(dir: &Path, retain: usize) {
    let entries = entries(dir);
    if entries.len() <= retain {
        return;
    }
    let excess = entries.len() - retain;
    for (_, path) in entries.into_iter().take(excess) {
        if let Err(err) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %err, "failed pruning manifest backup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keeps_only_newest_backups() {
        let dir = tempdir().unwrap();
        for body in ["one", "two", "three", "four"] {
            push(dir.path(), body.as_bytes(), 2).unwrap();
        }
        let kept = entries(dir.path());
        assert_eq!(kept.iter().map(|(seq, _)| *seq).collect::<Vec<_>>(), vec![3, 4]);
        let newest = latest(dir.path()).unwrap();
        assert_eq!(fs::read_to_string(newest).unwrap(), "four");
    }
}
