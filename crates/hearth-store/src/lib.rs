//! ---
//! hearth_section: "03-persistence-logging"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Persistence abstractions and storage bindings."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
//! Durable state store for installed apps.
//!
//! Each app lives in its own directory holding the manifest as authored and a
//! runtime metadata file. A presence-based index records which apps start at
//! boot, and a small rolling history of manifests backs revert. Reads are
//! served from an in-memory cache rebuilt from disk on [`StateStore::open`].
#![warn(missing_docs)]

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors encountered while reading/writing store files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for manifest (YAML) serialization issues.
    #[error("manifest serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Wrapper for metadata (JSON) serialization issues.
    #[error("metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The named app is not present in the store.
    #[error("app '{0}' not found")]
    NotFound(String),
    /// An app with this name is already stored.
    #[error("app '{0}' already exists")]
    AlreadyExists(String),
    /// A record on disk is inconsistent with its location.
    #[error("corrupt record at {path}: {reason}")]
    Corrupt {
        /// Offending file or directory.
        path: std::path::PathBuf,
        /// What was wrong with it.
        reason: String,
    },
}

mod enablement;
mod fsutil;
mod history;
pub mod store;

pub use store::{AppRecord, StateStore, MANIFEST_FILE, METADATA_FILE};
