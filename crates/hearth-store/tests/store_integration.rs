//! ---
//! hearth_section: "03-persistence-logging"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Persistence abstractions and storage bindings."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::net::{IpAddr, Ipv4Addr};

use hearth_common::app::{
    AppDefinition, AppInstance, AppProtocol, AppStatus, Flow, Listener, ServiceEndpoint,
};
use hearth_store::{StateStore, StoreError};
use tempfile::tempdir;

fn demo_definition() -> AppDefinition {
    let mut def = AppDefinition::new("demoapp", "alpine:3.18")
        .with_listener(Listener::new("web", 80))
        .with_env("GREETING", "hello");
    def.apply_defaults();
    def
}

fn endpoint(port: u16) -> ServiceEndpoint {
    ServiceEndpoint {
        app: "demoapp".into(),
        listener: "web".into(),
        host_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        host_port: port,
        guest_port: 80,
        flow: Flow::Tcp,
        protocol: AppProtocol::Http,
    }
}

#[test]
fn fresh_store_observes_previous_state() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let def = demo_definition();
    let instance = AppInstance::new(&def, "c0ffee", vec![endpoint(20000)]);
    {
        let store = StateStore::open(dir.path(), 3)?;
        store.insert(&def, &instance)?;
        store.enable("demoapp")?;
        store.update_status("demoapp", AppStatus::Running)?;
    }

    let store = StateStore::open(dir.path(), 3)?;
    let record = store.get("demoapp").expect("record survives reopen");
    assert_eq!(record.definition, def);
    assert_eq!(record.instance.status, AppStatus::Running);
    assert_eq!(record.instance.container_id, "c0ffee");
    assert_eq!(record.instance.created_at, instance.created_at);
    assert_eq!(record.instance.env.get("GREETING").map(String::as_str), Some("hello"));
    assert_eq!(record.instance.endpoints, vec![endpoint(20000)]);
    assert!(store.is_enabled("demoapp")?);
    assert_eq!(store.list_enabled(), vec!["demoapp".to_owned()]);
    Ok(())
}

#[test]
fn manifest_history_rolls_and_returns_newest() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = StateStore::open(dir.path(), 2)?;
    let mut def = demo_definition();
    let instance = AppInstance::new(&def, "c0ffee", Vec::new());
    store.insert(&def, &instance)?;

    assert_eq!(store.previous_manifest("demoapp")?, None);

    for tag in ["3.19", "3.20", "3.21"] {
        store.backup_manifest("demoapp")?;
        def.image = Some(format!("alpine:{tag}"));
        store.put(&def, &instance)?;
    }

    assert_eq!(store.manifest_history("demoapp")?.len(), 2);
    let previous = store.previous_manifest("demoapp")?.expect("backup present");
    assert_eq!(previous.image.as_deref(), Some("alpine:3.20"));
    Ok(())
}

#[test]
fn history_requires_existing_app() {
    let dir = tempdir().unwrap();
    let store = StateStore::open(dir.path(), 2).unwrap();
    assert!(matches!(
        store.previous_manifest("ghost"),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.backup_manifest("ghost"),
        Err(StoreError::NotFound(_))
    ));
}
