//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Declarative application manifests and their runtime projection."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
//! Structural validation of [`AppDefinition`] manifests. Validation is pure:
//! it never touches disk or the container runtime.

use std::collections::HashSet;
use std::path::{Component, Path};

use thiserror::Error;

use crate::app::{AppDefinition, Flow};

/// Names an app may not take because they collide with node-level routes.
pub const RESERVED_NAMES: &[&str] = &[
    "admin",
    "all",
    "api",
    "default",
    "hearth",
    "host",
    "localhost",
    "none",
    "root",
    "system",
];

const MAX_NAME_LEN: usize = 63;

pub const MEMORY_MB_RANGE: (u64, u64) = (16, 65_536);
pub const CPU_SHARES_RANGE: (u64, u64) = (2, 262_144);
pub const PIDS_RANGE: (u64, u64) = (1, 32_768);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid app name '{0}': must match [a-z][a-z0-9-]* (max 63 chars, no trailing '-')")]
    InvalidName(String),
    #[error("app name '{0}' is reserved")]
    ReservedName(String),
    #[error("exactly one of image or build must be set")]
    ImageBuildConflict,
    #[error("image reference must not be empty")]
    EmptyImage,
    #[error("app '{0}' has no image reference")]
    MissingImage(String),
    #[error("invalid listener '{name}': {reason}")]
    InvalidListener { name: String, reason: String },
    #[error("invalid environment variable '{0}'")]
    InvalidEnv(String),
    #[error("resource limit {field}={value} outside {min}..={max}")]
    ResourceOutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("invalid capability '{0}'")]
    InvalidCapability(String),
    #[error("invalid storage mount '{path}': {reason}")]
    InvalidStorage { path: String, reason: String },
    #[error("manifest is for app '{found}', expected '{expected}'")]
    NameMismatch { expected: String, found: String },
}

/// Label check shared by app names and listener names.
fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    let Some(first) = bytes.first() else {
        return false;
    };
    bytes.len() <= MAX_NAME_LEN
        && first.is_ascii_lowercase()
        && !value.ends_with('-')
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

pub fn validate_app_name(name: &str) -> Result<(), ValidationError> {
    if !is_dns_label(name) {
        return Err(ValidationError::InvalidName(name.to_owned()));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(ValidationError::ReservedName(name.to_owned()));
    }
    Ok(())
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_clean_absolute(path: &Path) -> bool {
    path.is_absolute()
        && !path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::CurDir))
}

fn check_range(
    field: &'static str,
    value: Option<u64>,
    range: (u64, u64),
) -> Result<(), ValidationError> {
    match value {
        Some(value) if value < range.0 || value > range.1 => {
            Err(ValidationError::ResourceOutOfRange {
                field,
                value,
                min: range.0,
                max: range.1,
            })
        }
        _ => Ok(()),
    }
}

impl AppDefinition {
    /// Validate structural invariants of the manifest.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_app_name(&self.name)?;

        match (&self.image, &self.build) {
            (Some(_), Some(_)) | (None, None) => return Err(ValidationError::ImageBuildConflict),
            (Some(image), None) if image.trim().is_empty() => {
                return Err(ValidationError::EmptyImage)
            }
            _ => {}
        }

        let mut listener_names = HashSet::new();
        let mut guest_ports: HashSet<(u16, Flow)> = HashSet::new();
        for listener in &self.listeners {
            let invalid = |reason: &str| ValidationError::InvalidListener {
                name: listener.name.clone(),
                reason: reason.to_owned(),
            };
            if !is_dns_label(&listener.name) {
                return Err(invalid("name must be a lowercase DNS label"));
            }
            if listener.port == 0 {
                return Err(invalid("port must be within 1..=65535"));
            }
            if !listener_names.insert(listener.name.as_str()) {
                return Err(invalid("duplicate listener name"));
            }
            if !guest_ports.insert((listener.port, listener.flow)) {
                return Err(invalid("guest port already declared by another listener"));
            }
        }

        if let Some(key) = self.env.keys().find(|key| !is_env_key(key)) {
            return Err(ValidationError::InvalidEnv(key.clone()));
        }

        check_range("memory_mb", self.resources.memory_mb, MEMORY_MB_RANGE)?;
        check_range("cpu_shares", self.resources.cpu_shares, CPU_SHARES_RANGE)?;
        check_range("pids", self.resources.pids, PIDS_RANGE)?;

        if let Some(cap) = self.permissions.capabilities.iter().find(|cap| {
            cap.is_empty()
                || cap.starts_with("CAP_")
                || !cap.chars().all(|c| c.is_ascii_uppercase() || c == '_')
        }) {
            return Err(ValidationError::InvalidCapability(cap.clone()));
        }

        let mut container_paths = HashSet::new();
        for mount in &self.storage {
            let path = mount.container_path.display().to_string();
            let invalid = |reason: &str| ValidationError::InvalidStorage {
                path: path.clone(),
                reason: reason.to_owned(),
            };
            if !is_clean_absolute(&mount.container_path) {
                return Err(invalid("container_path must be absolute without '.' or '..'"));
            }
            if mount.container_path == Path::new("/") {
                return Err(invalid("container_path must not be the container root"));
            }
            if let Some(host) = &mount.host_path {
                if !is_clean_absolute(host) {
                    return Err(invalid("host_path must be absolute without '.' or '..'"));
                }
            }
            if mount.size_limit_mb == Some(0) {
                return Err(invalid("size_limit_mb must be positive"));
            }
            if !container_paths.insert(mount.container_path.clone()) {
                return Err(invalid("duplicate container_path"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::app::{BuildSource, Listener, StorageKind, StorageMount};

    fn demo() -> AppDefinition {
        AppDefinition::new("demoapp", "alpine:3.18").with_listener(Listener::new("web", 80))
    }

    #[test]
    fn accepts_minimal_manifest() {
        demo().validate().expect("valid manifest");
    }

    #[test]
    fn rejects_bad_and_reserved_names() {
        let too_long = "a".repeat(64);
        for name in ["", "Demo", "9lives", "trailing-", "has_underscore", too_long.as_str()] {
            let def = AppDefinition { name: name.to_owned(), ..demo() };
            assert!(
                matches!(def.validate(), Err(ValidationError::InvalidName(_))),
                "expected {name:?} to be rejected"
            );
        }
        let def = AppDefinition { name: "admin".into(), ..demo() };
        assert_eq!(def.validate(), Err(ValidationError::ReservedName("admin".into())));
    }

    #[test]
    fn image_and_build_are_mutually_exclusive() {
        let both = AppDefinition {
            build: Some(BuildSource {
                context: PathBuf::from("/src"),
                containerfile: None,
            }),
            ..demo()
        };
        assert_eq!(both.validate(), Err(ValidationError::ImageBuildConflict));

        let neither = AppDefinition { image: None, ..demo() };
        assert_eq!(neither.validate(), Err(ValidationError::ImageBuildConflict));
    }

    #[test]
    fn rejects_listener_problems() {
        let zero = demo().with_listener(Listener::new("admin-ui", 0));
        assert!(matches!(zero.validate(), Err(ValidationError::InvalidListener { .. })));

        let duplicate = demo().with_listener(Listener::new("web", 8080));
        assert!(matches!(duplicate.validate(), Err(ValidationError::InvalidListener { .. })));

        let same_port = demo().with_listener(Listener::new("alt", 80));
        assert!(matches!(same_port.validate(), Err(ValidationError::InvalidListener { .. })));

        let udp_same_port = demo().with_listener(Listener::new("dns", 80).with_flow(Flow::Udp));
        udp_same_port.validate().expect("tcp and udp may share a guest port");
    }

    #[test]
    fn rejects_out_of_range_limits() {
        let mut def = demo();
        def.resources.memory_mb = Some(8);
        assert!(matches!(
            def.validate(),
            Err(ValidationError::ResourceOutOfRange { field: "memory_mb", .. })
        ));
        def.resources.memory_mb = Some(512);
        def.resources.pids = Some(0);
        assert!(matches!(
            def.validate(),
            Err(ValidationError::ResourceOutOfRange { field: "pids", .. })
        ));
    }

    #[test]
    fn rejects_relative_or_escaping_storage_paths() {
        let mut def = demo();
        def.storage.push(StorageMount {
            kind: StorageKind::Persistent,
            container_path: PathBuf::from("data"),
            host_path: None,
            size_limit_mb: None,
        });
        assert!(matches!(def.validate(), Err(ValidationError::InvalidStorage { .. })));

        def.storage[0].container_path = PathBuf::from("/data");
        def.storage[0].host_path = Some(PathBuf::from("/srv/../etc"));
        assert!(matches!(def.validate(), Err(ValidationError::InvalidStorage { .. })));

        def.storage[0].host_path = None;
        def.validate().expect("clean storage mount");
    }

    #[test]
    fn rejects_invalid_env_keys_and_capabilities() {
        let def = demo().with_env("1BAD", "x");
        assert_eq!(def.validate(), Err(ValidationError::InvalidEnv("1BAD".into())));

        let mut def = demo();
        def.permissions.capabilities.push("CAP_NET_ADMIN".into());
        assert!(matches!(def.validate(), Err(ValidationError::InvalidCapability(_))));
    }
}
