//! ---
//! hearth_section: "03-persistence-logging"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Persistence abstractions and storage bindings."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::debug;

use crate::fsutil::{children, remove_if_exists, write_atomic};
use crate::Result;

/// Boot-enablement index: one empty marker file per enabled app.
#[derive(Debug)]
pub(crate) struct EnabledIndex {
    dir: PathBuf,
    names: RwLock<BTreeSet<String>>,
}

impl EnabledIndex {
    pub(crate) fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let names = children(&dir)
            .into_iter()
            .filter(|path| path.is_file())
            .filter_map(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_owned)
            })
            .collect::<BTreeSet<_>>();
        debug!(dir = %dir.display(), enabled = names.len(), "enablement index loaded");
        Ok(Self {
            dir,
            names: RwLock::new(names),
        })
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub(crate) fn insert(&self, name: &str) -> Result<()> {
        let mut names = self.names.write();
        write_atomic(&self.marker(name), b"")?;
        names.insert(name.to_owned());
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> Result<bool> {
        let mut names = self.names.write();
        remove_if_exists(&self.marker(name))?;
        Ok(names.remove(name))
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.names.read().contains(name)
    }

    pub(crate) fn list(&self) -> Vec<String> {
        self.names.read().iter().cloned().collect()
    }

    /// Drop markers whose app is no longer present.
    pub(crate) fn retain(&self, keep: impl Fn(&str) -> bool) -> Result<Vec<String>> {
        let mut names = self.names.write();
        let stale: Vec<String> = names.iter().filter(|n| !keep(n.as_str())).cloned().collect();
        for name in &stale {
            remove_if_exists(&self.marker(name))?;
            names.remove(name);
        }
        Ok(stale)
    }

    #[cfg(test)]
    pub(crate) fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}
