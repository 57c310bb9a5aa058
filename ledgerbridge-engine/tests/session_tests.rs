use ledgerbridge_engine::memory::MemoryEngine;
use ledgerbridge_engine::{
    ActivationPath, EngineError, EngineSession, EngineSettings, SessionConfig,
};
use ledgerbridge_types::{EngineIdentity, EngineVersion};
use pretty_assertions::assert_eq;
use std::path::Path;

const DATA: &str = r"C:\ProgramData\Accounts\2026\Company.000";

fn engine() -> MemoryEngine {
    let engine = MemoryEngine::new(EngineVersion::new(32, 0))
        .with_user("manager", "secret")
        .with_user("clerk", "pw");
    engine.define_table("SalesRecord", &["ACCOUNT_REF", "NAME", "BALANCE"]);
    engine
}

fn config() -> SessionConfig {
    SessionConfig::new(EngineIdentity::for_version(&EngineVersion::new(32, 0)))
        .with_expected_version(EngineVersion::new(32, 0))
}

fn connect(engine: &MemoryEngine, user: &str, secret: &str) -> Result<EngineSession, EngineError> {
    EngineSession::connect(engine, &config(), Path::new(DATA), user, secret)
}

// ── Connect ───────────────────────────────────────────────────────

#[test]
fn connect_succeeds_through_workspace() {
    let engine = engine();
    let session = connect(&engine, "manager", "secret").unwrap();

    assert_eq!(session.activation_path(), ActivationPath::Registered);
    assert_eq!(session.secondary(), None);
    assert_eq!(session.user(), "manager");
    assert!(session.token().to_string().starts_with("LB-"));
    assert_eq!(engine.connection_count(), 1);
}

#[test]
fn each_session_gets_a_fresh_token() {
    let engine = engine();
    let a = connect(&engine, "manager", "secret").unwrap();
    let b = connect(&engine, "clerk", "pw").unwrap();
    assert_ne!(a.token(), b.token());
}

#[test]
fn second_connect_under_same_identity_is_busy() {
    let engine = engine();
    let _first = connect(&engine, "manager", "secret").unwrap();

    let err = connect(&engine, "manager", "secret").unwrap_err();
    assert!(err.is_busy(), "expected busy, got {err}");
    match err {
        EngineError::Busy { diagnostic, .. } => assert!(diagnostic.contains("already logged in")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.connection_count(), 1);
}

#[test]
fn busy_is_not_retried_through_secondary_objects() {
    let engine = engine();
    engine.enable_secondary("SDOEngine.SDOSession");
    let _first = connect(&engine, "manager", "secret").unwrap();

    let err = connect(&engine, "manager", "secret").unwrap_err();
    assert!(err.is_busy());
    assert_eq!(engine.connection_count(), 1);
}

#[test]
fn busy_display_names_the_failure_class() {
    let engine = engine();
    let _first = connect(&engine, "manager", "secret").unwrap();
    let err = connect(&engine, "manager", "secret").unwrap_err();
    assert!(err.to_string().starts_with("session busy"));
}

#[test]
fn bad_credentials_fail_without_busy() {
    let engine = engine();
    let err = connect(&engine, "manager", "wrong").unwrap_err();
    match err {
        EngineError::ConnectFailed(message) => {
            assert!(message.contains("Invalid username or password"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failed_workspace_falls_back_to_secondary_object() {
    let engine = engine();
    engine.fail_primary_connect("Workspace unavailable");
    engine.enable_secondary("SDOEngine.SDOSession");

    let session = connect(&engine, "manager", "secret").unwrap();
    assert_eq!(session.secondary(), Some("SDOEngine.SDOSession"));
    assert_eq!(engine.connection_count(), 1);

    let mut cursor = session.open_cursor("SalesRecord").unwrap();
    assert!(!cursor.first());
}

#[test]
fn secondary_ids_are_tried_in_order() {
    let engine = engine();
    engine.fail_primary_connect("Workspace unavailable");
    engine.enable_secondary("Second.Session");

    let settings = EngineSettings {
        secondary_prog_ids: vec!["First.Session".to_string(), "Second.Session".to_string()],
        ..EngineSettings::default()
    };
    let config = config().with_settings(settings);
    let session =
        EngineSession::connect(&engine, &config, Path::new(DATA), "manager", "secret").unwrap();
    assert_eq!(session.secondary(), Some("Second.Session"));
}

#[test]
fn exhausted_fallbacks_report_every_failure() {
    let engine = engine();
    engine.fail_primary_connect("Workspace unavailable");

    let err = connect(&engine, "manager", "secret").unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("connect failed"));
    assert!(message.contains("Workspace unavailable"));
    assert!(message.contains("SDOEngine.SDOSession"));
}

#[test]
fn wrong_major_version_is_refused() {
    let engine = MemoryEngine::new(EngineVersion::new(31, 0)).with_user("manager", "secret");
    let err = connect(&engine, "manager", "secret").unwrap_err();
    assert!(matches!(
        err,
        EngineError::WrongVersion { expected, staged }
            if expected == EngineVersion::new(32, 0) && staged == EngineVersion::new(31, 0)
    ));
    assert_eq!(engine.connection_count(), 0);
}

#[test]
fn minor_version_difference_is_accepted() {
    let engine = MemoryEngine::new(EngineVersion::new(32, 4)).with_user("manager", "secret");
    assert!(connect(&engine, "manager", "secret").is_ok());
}

// ── Dispose ───────────────────────────────────────────────────────

#[test]
fn dispose_disconnects_and_is_idempotent() {
    let engine = engine();
    let mut session = connect(&engine, "manager", "secret").unwrap();

    session.dispose();
    assert!(session.is_disposed());
    assert_eq!(engine.connection_count(), 0);

    session.dispose();
    assert_eq!(engine.connection_count(), 0);
}

#[test]
fn disposed_session_refuses_new_objects() {
    let engine = engine();
    let mut session = connect(&engine, "manager", "secret").unwrap();
    session.dispose();

    assert!(matches!(
        session.create_object("SalesRecord"),
        Err(EngineError::Disposed)
    ));
}

#[test]
fn drop_releases_identity_for_reconnect() {
    let engine = engine();
    {
        let _session = connect(&engine, "manager", "secret").unwrap();
    }
    assert_eq!(engine.connection_count(), 0);
    assert!(connect(&engine, "manager", "secret").is_ok());
}

// ── Objects ───────────────────────────────────────────────────────

#[test]
fn unknown_object_type_is_a_dispatch_error() {
    let engine = engine();
    let session = connect(&engine, "manager", "secret").unwrap();
    let err = session.create_object("NoSuchRecord").err().unwrap();
    assert!(matches!(err, EngineError::Dispatch { ref member, .. } if member == "CreateObject"));
}

#[test]
fn last_error_reflects_engine_state() {
    let engine = engine();
    let session = connect(&engine, "manager", "secret").unwrap();
    assert_eq!(session.last_error(), None);

    let mut cursor = session.open_cursor("SalesRecord").unwrap();
    cursor.find("ACCOUNT_REF", "NOPE").unwrap();
    assert_eq!(session.last_error().as_deref(), Some("Record not found"));
}
