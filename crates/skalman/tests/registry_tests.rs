//! Integration tests for loading policies into a registry.

use std::io::Write;
use std::sync::Arc;

use skalman::{
    AccessMode, Backoff, Dispatcher, Error, JsonPolicySource, MethodId, PolicyDescriptor,
    PolicyRegistry, PolicySource, Propagation, Value,
};
use skalman_resource::backends::MemoryResourceManager;
use tempfile::NamedTempFile;

const POLICIES: &str = r#"{
  "policies": [
    {
      "method": "accounts::update",
      "propagation": "required",
      "access_mode": "write",
      "retry": {
        "enabled": true,
        "max_retries": 2,
        "backoff": { "type": "fixed", "delay_ms": 5 }
      }
    },
    {
      "method": "accounts::find",
      "propagation": "supports",
      "cache": { "enabled": true, "depends_on": ["accounts::update"] }
    },
    { "method": "accounts::ping" }
  ]
}"#;

fn write_policies(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(json.as_bytes()).expect("failed to write policies");
    file.flush().expect("failed to flush policies");
    file
}

#[test]
fn test_load_registry_from_file() {
    let file = write_policies(POLICIES);

    let registry =
        PolicyRegistry::load(&JsonPolicySource::from_path(file.path())).expect("load policies");

    assert_eq!(registry.len(), 3);
    let update = registry.resolve("accounts::update").expect("update registered");
    assert_eq!(update.propagation, Some(Propagation::Required));
    assert_eq!(update.access_mode, Some(AccessMode::Write));
    assert_eq!(update.max_retries(), 2);
    assert_eq!(update.retry.backoff, Backoff::Fixed { delay: std::time::Duration::from_millis(5) });

    let find = registry.resolve("accounts::find").expect("find registered");
    assert!(find.cache_enabled());
    assert_eq!(registry.dependents_of("accounts::update"), &[MethodId::new("accounts::find")]);

    let ping = registry.resolve("accounts::ping").expect("ping registered");
    assert_eq!(ping, &PolicyDescriptor::new());
}

#[test]
fn test_loaded_registry_drives_dispatch() {
    let file = write_policies(POLICIES);
    let registry =
        PolicyRegistry::load(&JsonPolicySource::from_path(file.path())).expect("load policies");
    let dispatcher = Dispatcher::new(registry, Arc::new(MemoryResourceManager::new()));

    let mut calls = 0;
    for _ in 0..3 {
        dispatcher
            .invoke("accounts::find", &[Value::Int(1)], |_| {
                calls += 1;
                Ok(Value::Int(100))
            })
            .expect("find");
    }
    assert_eq!(calls, 1);

    dispatcher.invoke("accounts::update", &[Value::Int(1)], |_| Ok(Value::Null)).expect("update");
    assert!(dispatcher.cache().is_empty());
}

#[test]
fn test_unresolved_method() {
    let registry = PolicyRegistry::load(&JsonPolicySource::from_json(POLICIES)).expect("load");
    assert_eq!(
        registry.resolve("accounts::delete"),
        Err(Error::UnresolvedPolicy(MethodId::new("accounts::delete")))
    );
}

#[test]
fn test_malformed_document_is_a_load_error() {
    let file = write_policies("{ \"policies\": [ { \"method\": 42 } ] }");
    let result = PolicyRegistry::load(&JsonPolicySource::from_path(file.path()));
    assert!(matches!(result, Err(Error::PolicyLoad(_))));
}

#[test]
fn test_unknown_propagation_is_a_load_error() {
    let source = JsonPolicySource::from_json(
        r#"{ "policies": [ { "method": "m", "propagation": "sometimes" } ] }"#,
    );
    assert!(matches!(source.load(), Err(Error::PolicyLoad(_))));
}

#[test]
fn test_dependency_on_read_method_is_rejected() {
    let source = JsonPolicySource::from_json(
        r#"{ "policies": [
            { "method": "reader", "access_mode": "read" },
            { "method": "report", "cache": { "enabled": true, "depends_on": ["reader"] } }
        ] }"#,
    );
    assert!(matches!(PolicyRegistry::load(&source), Err(Error::PolicyLoad(_))));
}

#[test]
fn test_access_mode_without_transaction_is_rejected() {
    let registry = PolicyRegistry::builder()
        .register(
            "m",
            PolicyDescriptor::new().propagation(Propagation::Never).access_mode(AccessMode::Write),
        )
        .build();
    assert!(matches!(registry, Err(Error::PolicyLoad(_))));
}

#[test]
fn test_in_memory_source() {
    let source = vec![(MethodId::new("m"), PolicyDescriptor::new().cacheable())];
    let registry = PolicyRegistry::load(&source).expect("load");
    assert!(registry.contains("m"));
    assert!(registry.get("m").is_some_and(PolicyDescriptor::cache_enabled));
}
