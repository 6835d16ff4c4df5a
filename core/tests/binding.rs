use stackdef_core::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn stack(yaml: &str) -> Stack {
    serde_yaml::from_str(yaml).unwrap()
}

fn bind(docs: &[&str]) -> (StackArena, BindReport) {
    bind_stacks(docs.iter().map(|d| stack(d)), BindOptions::default())
}

fn error_of<'a>(arena: &'a StackArena, name: &str) -> Option<&'a BindError> {
    arena.error(arena.find(&Ref::new(name)).unwrap())
}

const LIMITS: &str = r#"
name: limits
properties:
  level: { type: Level }
schema:
  public:
    Level:
      base: number
      exclusiveMaximum: 10
"#;

const MYSQL: &str = r#"
name: mysql
properties:
  size: { type: number, default: 10 }
"#;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[test]
fn test_ref_round_trips_through_parts() {
    let original = Ref::new("HTTPS://Hub.Example.com/acme/db@1.2.0");
    let parts = original.parse().unwrap();
    assert_eq!(parts.protocol.as_deref(), Some("https"));
    assert_eq!(parts.base.as_deref(), Some("hub.example.com"));
    assert_eq!(parts.name, Name::new("acme/db"));
    assert_eq!(parts.version, Some(VersionSpec::Exact(Version::new("1.2.0"))));

    assert_eq!(Ref::new(parts.to_string()), original);
    assert_eq!(
        Ref::new(parts.without_version().to_string()),
        Ref::new("https://hub.example.com/acme/db")
    );
}

// ---------------------------------------------------------------------------
// Properties and schemas
// ---------------------------------------------------------------------------

#[test]
fn test_default_implies_optional() {
    let mysql = stack(MYSQL);
    assert!(mysql.properties["size"].is_optional());

    let (arena, report) = bind(&[
        MYSQL,
        r#"
name: app
services:
  public:
    db: { type: mysql }
"#,
    ]);
    assert!(report.is_ok(), "{:?}", report.diagnostics);

    let app = arena.stack(arena.find(&Ref::new("app")).unwrap());
    let db = app.service("db").unwrap();
    let size = &db.bound_properties.get().unwrap()["size"];
    assert_eq!(size.as_number(), Some(10.0));
}

#[test]
fn test_exclusive_maximum_bounds() {
    let user = |name: &str, level: &str| {
        format!("name: {name}\nservices:\n  public:\n    limits: {{ level: {level} }}\n")
    };
    let at_bound = user("at_bound", "10");
    let below = user("below", "9.999");
    let negative = user("negative", "-1");
    let (arena, report) = bind(&[LIMITS, at_bound.as_str(), below.as_str(), negative.as_str()]);

    assert!(matches!(
        error_of(&arena, "at_bound"),
        Some(BindError::RangeViolation { path, .. }) if path == "level"
    ));
    assert_eq!(error_of(&arena, "below"), None);
    assert_eq!(error_of(&arena, "negative"), None);
    assert_eq!(report.failed.len(), 1);
}

#[test]
fn test_inclusive_precedence_accepts_bound() {
    let limits = stack(
        r#"
name: limits
properties:
  level: { type: Level }
schema:
  public:
    Level: { base: number, maximum: 10, exclusiveMaximum: 10 }
"#,
    );
    let user = stack("name: user\nservices:\n  public:\n    limits: { level: 10 }\n");

    let (_, report) = bind_stacks(
        [limits.clone(), user.clone()],
        BindOptions {
            bound_precedence: BoundPrecedence::InclusiveWins,
            ..Default::default()
        },
    );
    assert!(report.is_ok(), "{:?}", report.diagnostics);

    let (_, report) = bind_stacks(
        [limits, user],
        BindOptions {
            bound_precedence: BoundPrecedence::Reject,
            ..Default::default()
        },
    );
    assert!(report
        .errors()
        .any(|e| matches!(e, BindError::ConflictingBounds { side, .. } if side == "Maximum")));
}

#[test]
fn test_enum_violation() {
    let (arena, _) = bind(&[
        r#"
name: switch
properties:
  mode: { type: Mode }
schema:
  private:
    Mode: { base: string, enum: [a, b, c] }
"#,
        "name: good\nservices:\n  public:\n    switch: { mode: b }\n",
        "name: bad\nservices:\n  public:\n    switch: { mode: d }\n",
    ]);
    assert_eq!(error_of(&arena, "good"), None);
    match error_of(&arena, "bad") {
        Some(BindError::EnumViolation { allowed, .. }) => assert_eq!(allowed.len(), 3),
        other => panic!("expected enum violation, got {other:?}"),
    }
}

#[test]
fn test_heterogeneous_array() {
    let (arena, _) = bind(&[
        r#"
name: lb
properties:
  ports: { type: "[]number" }
"#,
        "name: web\nservices:\n  public:\n    lb: { ports: [80, \"x\"] }\n",
    ]);
    assert!(matches!(
        error_of(&arena, "web"),
        Some(BindError::HeterogeneousCollection { path, .. }) if path == "ports[1]"
    ));
}

#[test]
fn test_unknown_and_missing_properties() {
    let (_, report) = bind(&[
        "name: db\nproperties:\n  size: { type: number }\n",
        "name: app\nservices:\n  public:\n    db: { colour: red }\n",
    ]);
    assert!(report
        .errors()
        .any(|e| matches!(e, BindError::UnknownProperty { property, .. } if property == "colour")));
    assert!(report
        .errors()
        .any(|e| matches!(e, BindError::MissingRequiredProperty { property, .. } if property == "size")));
}

// ---------------------------------------------------------------------------
// Inheritance
// ---------------------------------------------------------------------------

#[test]
fn test_inheritance_cycle_names_both_stacks() {
    let (arena, report) = bind(&["name: a\nbase: b\n", "name: b\nbase: a\n"]);
    assert_eq!(report.failed.len(), 2);
    for name in ["a", "b"] {
        match error_of(&arena, name) {
            Some(BindError::InheritanceCycle { chain }) => {
                assert!(chain.iter().any(|s| s == "a"));
                assert!(chain.iter().any(|s| s == "b"));
            }
            other => panic!("expected inheritance cycle, got {other:?}"),
        }
    }
}

#[test]
fn test_derived_stack_inherits_and_overrides() {
    let (arena, report) = bind(&[
        r#"
name: server
abstract: true
properties:
  port: { type: number, default: 80, readonly: true }
  host: { type: string }
"#,
        r#"
name: web
base: server
properties:
  port: { type: number, default: 8080 }
"#,
    ]);
    assert!(report.is_ok(), "{:?}", report.diagnostics);

    let server = arena.find(&Ref::new("server")).unwrap();
    let web = arena.find(&Ref::new("web")).unwrap();
    assert_eq!(arena.stack(web).bound_base.get(), Some(&server));

    let effective = arena.effective(web).unwrap();
    assert_eq!(effective.properties["port"].owner, web);
    assert!(effective.properties["port"].property.is_readonly());
    assert_eq!(effective.properties["host"].owner, server);
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[test]
fn test_service_type_defaults_to_name() {
    let (arena, report) = bind(&[MYSQL, "name: app\nservices:\n  private:\n    mysql: {}\n"]);
    assert!(report.is_ok(), "{:?}", report.diagnostics);

    let mysql = arena.find(&Ref::new("mysql")).unwrap();
    let app = arena.stack(arena.find(&Ref::new("app")).unwrap());
    let service = app.service("mysql").unwrap();
    assert!(!service.public);
    assert_eq!(service.bound_type.get(), Some(&mysql));
}

#[test]
fn test_service_type_must_be_a_string() {
    let (arena, report) = bind(&[
        "name: db\nproperties:\n  type: { type: number }\n",
        "name: web\nservices:\n  public:\n    db: { type: 5 }\n",
    ]);
    assert!(!report.is_ok());
    assert!(matches!(
        error_of(&arena, "web"),
        Some(BindError::TypeMismatch { path, actual, .. }) if path == "db.type" && actual == "number"
    ));
}

#[test]
fn test_abstract_stack_cannot_be_instantiated() {
    let (arena, _) = bind(&[
        "name: server\nabstract: true\n",
        "name: app\nservices:\n  public:\n    server: {}\n",
    ]);
    assert!(matches!(
        error_of(&arena, "app"),
        Some(BindError::AbstractInstantiation { service, .. }) if service == "server"
    ));
}

#[test]
fn test_private_service_visibility() {
    let (arena, report) = bind(&[
        MYSQL,
        r#"
name: gateway
properties:
  backend: { type: mysql }
"#,
        r#"
name: app
services:
  public:
    cache: { type: mysql }
    proxy: { type: gateway, backend: db }
  private:
    db: { type: mysql }
"#,
        r#"
name: site
services:
  public:
    app: {}
    edge: { type: gateway, backend: "app:cache" }
"#,
        r#"
name: intruder
services:
  public:
    app: {}
    edge: { type: gateway, backend: "app:db" }
"#,
    ]);

    assert_eq!(error_of(&arena, "app"), None);
    assert_eq!(error_of(&arena, "site"), None);
    assert!(matches!(
        error_of(&arena, "intruder"),
        Some(BindError::PrivateServiceAccess { service, stack }) if service == "db" && stack == "app"
    ));
    assert_eq!(report.failed.len(), 1);

    let app = arena.find(&Ref::new("app")).unwrap();
    let site = arena.stack(arena.find(&Ref::new("site")).unwrap());
    let edge = site.service("edge").unwrap();
    let backend = edge.bound_properties.get().unwrap()["backend"]
        .as_service()
        .unwrap();
    let selected = backend.selected.get().unwrap();
    assert_eq!(selected.stack, app);
    assert_eq!(selected.name.as_str(), "cache");
}

#[test]
fn test_service_ref_type_must_match() {
    let (arena, _) = bind(&[
        MYSQL,
        "name: redis\n",
        "name: gateway\nproperties:\n  backend: { type: mysql }\n",
        r#"
name: app
services:
  private:
    cache: { type: redis }
  public:
    proxy: { type: gateway, backend: cache }
"#,
    ]);
    assert!(matches!(
        error_of(&arena, "app"),
        Some(BindError::TypeMismatch { expected, actual, .. }) if expected == "mysql" && actual == "redis"
    ));
}

// ---------------------------------------------------------------------------
// Workspaces
// ---------------------------------------------------------------------------

#[test]
fn test_workspace_pins_select_versions() {
    let workspace: Workspace = serde_yaml::from_str(
        r#"
dependencies:
  acme/db: "~1.2"
"#,
    )
    .unwrap();

    let mut binder = Binder::new(BindOptions::default()).with_workspace(&workspace);
    let old = binder.add(stack("name: acme/db\nversion: 1.2.7\n"));
    binder.add(stack("name: acme/db\nversion: 2.0.0\n"));
    let app = binder.add(stack("name: app\nservices:\n  public:\n    db: { type: acme/db }\n"));

    let report = binder.bind();
    assert!(report.is_ok(), "{:?}", report.diagnostics);
    let arena = binder.arena();
    assert_eq!(arena.stack(app).service("db").unwrap().bound_type.get(), Some(&old));
}

#[test]
fn test_workspace_dependency_without_stack_is_uninstantiated() {
    let workspace: Workspace = serde_yaml::from_str(
        r#"
dependencies:
  acme/queue: latest
"#,
    )
    .unwrap();

    let mut binder = Binder::new(BindOptions::default()).with_workspace(&workspace);
    binder.add(stack("name: app\nservices:\n  public:\n    q: { type: acme/queue }\n"));
    let report = binder.bind();
    assert!(report
        .errors()
        .any(|e| matches!(e, BindError::UninstantiatedStack { .. })));
}
