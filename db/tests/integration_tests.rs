use std::fs;
use std::path::Path;

use stackdef_core::{BindError, BindOptions, BoundPrecedence, Ref, StackState};
use stackdef_db::{BindConfig, LoadError, RegistrySource, StackRegistry};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write(dir: &Path, file: &str, contents: &str) {
    fs::write(dir.join(file), contents).unwrap();
}

/// A small project: a workspace pinning `acme/db`, two versions of it, and
/// an app instantiating it.
fn project(dir: &Path) {
    write(
        dir,
        "workspace.yaml",
        r#"
namespace: acme
clusters:
  prod: { cloud: aws, scheduler: ecs, default: true }
dependencies:
  acme/db: "^1"
  acme/queue: latest
"#,
    );
    write(
        dir,
        "db.yaml",
        r#"
- name: acme/db
  version: 1.3.0
  properties:
    size: { type: Size, default: 10 }
  schema:
    public:
      Size: { base: number, minimum: 1, exclusiveMaximum: 100 }
- name: acme/db
  version: 2.0.0
"#,
    );
    write(
        dir,
        "app.json",
        r#"{
  "name": "app",
  "services": {
    "public": { "db": { "type": "acme/db", "size": 20 } }
  }
}"#,
    );
}

// ---------------------------------------------------------------------------
// Directory loading and binding
// ---------------------------------------------------------------------------

#[test]
fn test_project_directory_binds() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());

    let registry = StackRegistry::from_dir(dir.path()).unwrap();
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.documents().len(), 3);
    let workspace = registry.workspace().unwrap();
    assert_eq!(workspace.namespace, "acme");
    assert_eq!(
        workspace.default_cluster().map(|c| c.name.as_str()),
        Some("prod")
    );

    let (arena, report) = registry.bind(BindOptions::default());
    assert!(report.is_ok(), "{:?}", report.diagnostics);
    assert_eq!(report.bound.len(), 3);

    let app = arena.find(&Ref::new("app")).unwrap();
    let db = arena.stack(app).service("db").unwrap();
    let target = *db.bound_type.get().unwrap();
    assert_eq!(arena.stack(target).version.as_str(), "1.3.0");
    assert_eq!(
        db.bound_properties.get().unwrap()["size"].as_number(),
        Some(20.0)
    );
}

#[test]
fn test_diagnostics_point_at_source_document() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    write(
        dir.path(),
        "broken.yaml",
        r#"
name: broken
services:
  public:
    db: { type: acme/db, size: 100 }
"#,
    );

    let registry = StackRegistry::from_dir(dir.path()).unwrap();
    let (arena, report) = registry.bind(BindOptions::default());

    let broken = arena.find(&Ref::new("broken")).unwrap();
    assert_eq!(arena.state(broken), StackState::Error);
    assert_eq!(report.failed, vec![broken]);

    let diagnostic = &report.diagnostics[0];
    assert!(matches!(diagnostic.error, BindError::RangeViolation { .. }));
    assert_eq!(diagnostic.stack.as_deref(), Some("broken"));
    let (doc, _) = diagnostic.where_();
    let doc = doc.unwrap();
    assert!(doc.uri.ends_with("broken.yaml"));
    assert_eq!(doc.digest.as_ref().map(String::len), Some(64));
    assert!(diagnostic.to_string().contains("broken.yaml"));
}

#[test]
fn test_uninstantiated_dependency_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    write(
        dir.path(),
        "worker.yaml",
        "name: worker\nservices:\n  public:\n    jobs: { type: acme/queue }\n",
    );

    let registry = StackRegistry::from_dir(dir.path()).unwrap();
    let (_, report) = registry.bind(BindOptions::default());
    assert!(report
        .errors()
        .any(|e| matches!(e, BindError::UninstantiatedStack { .. })));
    assert_eq!(report.failed.len(), 1);
}

#[test]
fn test_lookup_pulls_stacks_from_registry() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    let registry = StackRegistry::from_dir(dir.path()).unwrap();

    let mut binder = stackdef_core::Binder::new(BindOptions::default()).with_lookup(&registry);
    if let Some(workspace) = registry.workspace() {
        binder = binder.with_workspace(workspace);
    }
    let app = registry.get(&Ref::new("app")).unwrap().clone();
    let app = binder.add(app);

    let report = binder.bind();
    assert!(report.is_ok(), "{:?}", report.diagnostics);
    assert_eq!(binder.arena().len(), 2);
    assert_eq!(binder.arena().state(app), StackState::Bound);
}

#[test]
fn test_invalid_document_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.json", "{ not json");

    let err = StackRegistry::from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, LoadError::JsonError(_)));
}

// ---------------------------------------------------------------------------
// Builder and configuration
// ---------------------------------------------------------------------------

#[test]
fn test_builder_falls_back_to_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("stacks.yaml");
    fs::write(&file, "- name: web\n- name: worker\n").unwrap();

    let registry = StackRegistry::builder()
        .from_dir(dir.path().join("missing"))
        .from_file(&file)
        .build()
        .unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.source(),
        &RegistrySource::Multiple(vec![
            RegistrySource::Directory(dir.path().join("missing")),
            RegistrySource::File(file),
        ])
    );
}

#[test]
fn test_config_drives_registry_and_options() {
    let dir = tempfile::tempdir().unwrap();
    let stacks = dir.path().join("stacks");
    fs::create_dir_all(&stacks).unwrap();
    write(
        &stacks,
        "limits.yaml",
        r#"
name: limits
properties:
  level: { type: Level }
schema:
  public:
    Level: { base: number, maximum: 10, exclusiveMaximum: 10 }
"#,
    );
    write(
        &stacks,
        "user.yaml",
        "name: user\nservices:\n  public:\n    limits: { level: 10 }\n",
    );

    let config_path = dir.path().join("stackdef.yml");
    let config = BindConfig {
        search_paths: vec![stacks],
        ..Default::default()
    };
    config.save(&config_path).unwrap();

    let mut config = BindConfig::load(&config_path).unwrap();
    let registry = config.registry().unwrap();
    let (_, report) = registry.bind(config.options.clone());
    assert_eq!(report.failed.len(), 1);

    config.options.bound_precedence = BoundPrecedence::InclusiveWins;
    let (_, report) = registry.bind(config.options.clone());
    assert!(report.is_ok(), "{:?}", report.diagnostics);
}
