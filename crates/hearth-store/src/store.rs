//! ---
//! hearth_section: "03-persistence-logging"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Persistence abstractions and storage bindings."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use hearth_common::app::{AppDefinition, AppInstance, AppStatus};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::enablement::EnabledIndex;
use crate::fsutil::{children, remove_if_exists, write_atomic};
use crate::{history, Result, StoreError};

/// Manifest file name inside each app directory.
pub const MANIFEST_FILE: &str = "manifest.yaml";
/// Runtime metadata file name inside each app directory.
pub const METADATA_FILE: &str = "metadata.json";
const HISTORY_DIR: &str = "history";
const APPS_DIR: &str = "apps";
const ENABLED_DIR: &str = "enabled";

/// Manifest and runtime projection of one app, always stored together.
#[derive(Debug, Clone, PartialEq)]
pub struct AppRecord {
    /// Manifest as authored (after defaults).
    pub definition: AppDefinition,
    /// Runtime metadata owned by the orchestrator.
    pub instance: AppInstance,
}

/// Directory-backed app store with a read cache.
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
    apps_dir: PathBuf,
    history_depth: usize,
    records: RwLock<BTreeMap<String, AppRecord>>,
    enabled: EnabledIndex,
}

impl StateStore {
    /// Open (or create) a store under `root` and rebuild the cache from disk.
    pub fn open(root: impl Into<PathBuf>, history_depth: usize) -> Result<Self> {
        let root = root.into();
        let apps_dir = root.join(APPS_DIR);
        fs::create_dir_all(&apps_dir)?;

        let mut records = BTreeMap::new();
        for dir in children(&apps_dir).into_iter().filter(|path| path.is_dir()) {
            match load_record(&dir) {
                Ok(record) => {
                    records.insert(record.definition.name.clone(), record);
                }
                Err(err) => {
                    warn!(path = %dir.display(), error = %err, "skipping unreadable app record");
                }
            }
        }

        let enabled = EnabledIndex::open(root.join(ENABLED_DIR))?;
        let stale = enabled.retain(|name| records.contains_key(name))?;
        if !stale.is_empty() {
            warn!(apps = ?stale, "removed enablement markers for missing apps");
        }

        info!(
            root = %root.display(),
            apps = records.len(),
            enabled = enabled.list().len(),
            "state store opened"
        );
        Ok(Self {
            root,
            apps_dir,
            history_depth: history_depth.max(1),
            records: RwLock::new(records),
            enabled,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files for `name`.
    pub fn app_dir(&self, name: &str) -> PathBuf {
        self.apps_dir.join(name)
    }

    /// Persist a new app. Fails when the name is already taken.
    pub fn insert(&self, definition: &AppDefinition, instance: &AppInstance) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&definition.name) {
            return Err(StoreError::AlreadyExists(definition.name.clone()));
        }
        self.write_record(definition, instance)?;
        records.insert(
            definition.name.clone(),
            AppRecord {
                definition: definition.clone(),
                instance: instance.clone(),
            },
        );
        debug!(app = %definition.name, "app record inserted");
        Ok(())
    }

    /// Create or replace an app's manifest and metadata together.
    pub fn put(&self, definition: &AppDefinition, instance: &AppInstance) -> Result<()> {
        let mut records = self.records.write();
        self.write_record(definition, instance)?;
        records.insert(
            definition.name.clone(),
            AppRecord {
                definition: definition.clone(),
                instance: instance.clone(),
            },
        );
        debug!(app = %definition.name, status = %instance.status, "app record stored");
        Ok(())
    }

    /// Cached record for `name`.
    pub fn get(&self, name: &str) -> Option<AppRecord> {
        self.records.read().get(name).cloned()
    }

    /// Cached manifest for `name`.
    pub fn definition(&self, name: &str) -> Option<AppDefinition> {
        self.records
            .read()
            .get(name)
            .map(|record| record.definition.clone())
    }

    /// Cached runtime metadata for `name`.
    pub fn instance(&self, name: &str) -> Option<AppInstance> {
        self.records
            .read()
            .get(name)
            .map(|record| record.instance.clone())
    }

    /// Every stored app, ordered by name.
    pub fn list(&self) -> Vec<AppRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Whether an app named `name` is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.records.read().contains_key(name)
    }

    /// Mutate the runtime metadata of `name` and persist it.
    pub fn update_instance<F>(&self, name: &str, update: F) -> Result<AppInstance>
    where
        F: FnOnce(&mut AppInstance),
    {
        let mut records = self.records.write();
        let record = records
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;
        let mut instance = record.instance.clone();
        update(&mut instance);
        instance.touch();
        let bytes = serde_json::to_vec_pretty(&instance)?;
        write_atomic(&self.app_dir(name).join(METADATA_FILE), &bytes)?;
        record.instance = instance.clone();
        Ok(instance)
    }

    /// Record a new lifecycle status for `name`.
    pub fn update_status(&self, name: &str, status: AppStatus) -> Result<AppInstance> {
        let instance = self.update_instance(name, |instance| instance.status = status)?;
        debug!(app = name, status = %status, "app status updated");
        Ok(instance)
    }

    /// Delete an app's directory, history and enablement marker.
    pub fn remove(&self, name: &str) -> Result<AppRecord> {
        let mut records = self.records.write();
        if !records.contains_key(name) {
            return Err(StoreError::NotFound(name.to_owned()));
        }
        remove_if_exists(&self.app_dir(name))?;
        self.enabled.remove(name)?;
        let record = records
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;
        info!(app = name, "app record removed");
        Ok(record)
    }

    /// Mark `name` to start at boot.
    pub fn enable(&self, name: &str) -> Result<()> {
        self.require(name)?;
        self.enabled.insert(name)
    }

    /// Clear the boot mark for `name`.
    pub fn disable(&self, name: &str) -> Result<()> {
        self.require(name)?;
        self.enabled.remove(name).map(|_| ())
    }

    /// Whether `name` starts at boot.
    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        self.require(name)?;
        Ok(self.enabled.contains(name))
    }

    /// Names of every app marked to start at boot.
    pub fn list_enabled(&self) -> Vec<String> {
        self.enabled.list()
    }

    /// Snapshot the current manifest into the app's rolling history.
    pub fn backup_manifest(&self, name: &str) -> Result<PathBuf> {
        let definition = self
            .definition(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;
        let yaml = serde_yaml::to_string(&definition)?;
        let path = history::push(
            &self.app_dir(name).join(HISTORY_DIR),
            yaml.as_bytes(),
            self.history_depth,
        )?;
        debug!(app = name, backup = %path.display(), "manifest backed up");
        Ok(path)
    }

    /// Most recent manifest backup, if any.
    pub fn previous_manifest(&self, name: &str) -> Result<Option<AppDefinition>> {
        self.require(name)?;
        let Some(path) = history::latest(&self.app_dir(name).join(HISTORY_DIR)) else {
            return Ok(None);
        };
        let contents = fs::read_to_string(&path)?;
        let definition: AppDefinition = serde_yaml::from_str(&contents)?;
        Ok(Some(definition))
    }

    /// Backup files for `name`, oldest first.
    pub fn manifest_history(&self, name: &str) -> Result<Vec<PathBuf>> {
        self.require(name)?;
        Ok(history::entries(&self.app_dir(name).join(HISTORY_DIR))
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    fn require(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(StoreError::NotFound(name.to_owned()))
        }
    }

    fn write_record(&self, definition: &AppDefinition, instance: &AppInstance) -> Result<()> {
        let dir = self.app_dir(&definition.name);
        fs::create_dir_all(&dir)?;
        let manifest = serde_yaml::to_string(definition)?;
        write_atomic(&dir.join(MANIFEST_FILE), manifest.as_bytes())?;
        let metadata = serde_json::to_vec_pretty(instance)?;
        write_atomic(&dir.join(METADATA_FILE), &metadata)?;
        Ok(())
    }
}

fn load_record(dir: &Path) -> Result<AppRecord> {
    let manifest = fs::read_to_string(dir.join(MANIFEST_FILE))?;
    let definition: AppDefinition = serde_yaml::from_str(&manifest)?;
    let metadata = fs::read(dir.join(METADATA_FILE))?;
    let instance: AppInstance = serde_json::from_slice(&metadata)?;

    let dir_name = dir.file_name().and_then(|name| name.to_str()).unwrap_or_default();
    if definition.name != dir_name || instance.name != dir_name {
        return Err(StoreError::Corrupt {
            path: dir.to_path_buf(),
            reason: format!(
                "directory '{}' holds manifest '{}' and metadata '{}'",
                dir_name, definition.name, instance.name
            ),
        });
    }
    Ok(AppRecord {
        definition,
        instance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_common::app::Listener;
    use tempfile::tempdir;

    fn record(name: &str) -> (AppDefinition, AppInstance) {
        let mut def = AppDefinition::new(name, "alpine:3.18").with_listener(Listener::new("web", 80));
        def.apply_defaults();
        let instance = AppInstance::new(&def, format!("ctr-{name}"), Vec::new());
        (def, instance)
    }

    #[test]
    fn insert_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), 5).unwrap();
        let (def, instance) = record("demoapp");
        store.insert(&def, &instance).unwrap();
        assert!(matches!(
            store.insert(&def, &instance),
            Err(StoreError::AlreadyExists(name)) if name == "demoapp"
        ));
        assert!(store.app_dir("demoapp").join(MANIFEST_FILE).is_file());
        assert!(store.app_dir("demoapp").join(METADATA_FILE).is_file());
    }

    #[test]
    fn status_update_bumps_timestamp_and_persists() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), 5).unwrap();
        let (def, instance) = record("demoapp");
        store.insert(&def, &instance).unwrap();

        let updated = store.update_status("demoapp", AppStatus::Running).unwrap();
        assert_eq!(updated.status, AppStatus::Running);
        assert!(updated.updated_at >= instance.updated_at);
        assert_eq!(updated.created_at, instance.created_at);

        let reopened = StateStore::open(dir.path(), 5).unwrap();
        assert_eq!(reopened.instance("demoapp").unwrap().status, AppStatus::Running);
    }

    #[test]
    fn enablement_requires_existing_app() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), 5).unwrap();
        assert!(matches!(store.enable("ghost"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.is_enabled("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn remove_clears_enablement_and_files() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), 5).unwrap();
        let (def, instance) = record("demoapp");
        store.insert(&def, &instance).unwrap();
        store.enable("demoapp").unwrap();

        store.remove("demoapp").unwrap();
        assert!(!store.contains("demoapp"));
        assert!(store.list_enabled().is_empty());
        assert!(!store.app_dir("demoapp").exists());
        assert!(matches!(store.remove("demoapp"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn mismatched_directory_is_skipped_on_open() {
        let dir = tempdir().unwrap();
        {
            let store = StateStore::open(dir.path(), 5).unwrap();
            let (def, instance) = record("demoapp");
            store.insert(&def, &instance).unwrap();
        }
        fs::rename(
            dir.path().join(APPS_DIR).join("demoapp"),
            dir.path().join(APPS_DIR).join("renamed"),
        )
        .unwrap();
        let store = StateStore::open(dir.path(), 5).unwrap();
        assert!(store.list().is_empty());
    }
}
