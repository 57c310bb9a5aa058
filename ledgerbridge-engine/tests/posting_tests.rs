use ledgerbridge_engine::memory::{MemoryEngine, PostingMode};
use ledgerbridge_engine::{CommitOutcome, EngineError, EngineSession, FieldRecord, SessionConfig};
use ledgerbridge_types::{EngineIdentity, EngineVersion, FieldValue};
use pretty_assertions::assert_eq;
use std::path::Path;

const INVOICE: &str = "InvoicePost";

fn session() -> (MemoryEngine, EngineSession) {
    let engine = MemoryEngine::new(EngineVersion::new(32, 0)).with_user("manager", "pw");
    engine.define_posting(
        INVOICE,
        &["ACCOUNT_REF", "INVOICE_DATE", "INVOICE_NUMBER"],
        &["DESCRIPTION", "NET_AMOUNT", "TAX_CODE"],
        Some("INVOICE_NUMBER"),
    );
    let config = SessionConfig::new(EngineIdentity::for_version(&EngineVersion::new(32, 0)));
    let session =
        EngineSession::connect(&engine, &config, Path::new("/data"), "manager", "pw").unwrap();
    (engine, session)
}

fn invoice(session: &EngineSession) -> ledgerbridge_engine::PostingDocument {
    let mut doc = session.posting(INVOICE).unwrap();
    doc.set_header_field("ACCOUNT_REF", "A001");
    doc.set_header_field("INVOICE_DATE", "2026-10-19");
    doc.set_header_field("NOT_A_FIELD", 1);

    let line = doc.add_line().unwrap();
    line.set_field("DESCRIPTION", "Consulting".into());
    line.set_field("NET_AMOUNT", FieldValue::Float(250.0));
    line.set_field("TAX_CODE", 1.into());

    doc.expect_generated("INVOICE_NUMBER");
    doc
}

#[test]
fn commit_with_generated_number_is_committed() {
    let (engine, session) = session();
    let doc = invoice(&session);
    assert_eq!(doc.line_count(), 1);
    assert_eq!(doc.header_field("ACCOUNT_REF"), Some(FieldValue::from("A001")));

    let result = doc.commit();
    assert!(result.success);
    assert_eq!(result.outcome(), CommitOutcome::Committed);
    assert_eq!(result.generated("INVOICE_NUMBER"), Some(&FieldValue::Int(1)));
    assert_eq!(result.diagnostic, None);

    let posted = engine.posted(INVOICE);
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].lines[0]["DESCRIPTION"], FieldValue::from("Consulting"));
    assert_eq!(posted[0].header["INVOICE_NUMBER"], FieldValue::Int(1));
}

#[test]
fn numbers_advance_per_commit() {
    let (_engine, session) = session();
    invoice(&session).commit();
    let second = invoice(&session).commit();
    assert_eq!(second.generated("INVOICE_NUMBER"), Some(&FieldValue::Int(2)));
}

#[test]
fn accepted_without_number_is_pending_not_rejected() {
    let (engine, session) = session();
    engine.set_posting_mode(INVOICE, PostingMode::AcceptWithoutNumber);

    let result = invoice(&session).commit();
    assert!(result.success);
    assert_eq!(result.outcome(), CommitOutcome::AcceptedPending);
    assert_eq!(result.diagnostic, None);
    assert_eq!(engine.posted(INVOICE).len(), 1);
    assert!(result.into_result().is_ok());
}

#[test]
fn rejection_carries_engine_diagnostic() {
    let (engine, session) = session();
    engine.set_posting_mode(INVOICE, PostingMode::Reject("Account A001 is on hold".to_string()));

    let result = invoice(&session).commit();
    assert!(!result.success);
    assert_eq!(result.outcome(), CommitOutcome::Rejected);
    assert_eq!(result.diagnostic.as_deref(), Some("Account A001 is on hold"));
    assert!(engine.posted(INVOICE).is_empty());

    match result.into_result() {
        Err(EngineError::CommitRejected(message)) => assert_eq!(message, "Account A001 is on hold"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn raised_error_is_a_rejection() {
    let (engine, session) = session();
    engine.set_posting_mode(INVOICE, PostingMode::Raise("Period is closed".to_string()));

    let result = invoice(&session).commit();
    assert_eq!(result.outcome(), CommitOutcome::Rejected);
    assert_eq!(result.diagnostic.as_deref(), Some("Period is closed"));
}

#[test]
fn document_without_lines_is_rejected() {
    let (_engine, session) = session();
    let mut doc = session.posting(INVOICE).unwrap();
    doc.set_header_field("ACCOUNT_REF", "A001");
    doc.expect_generated("INVOICE_NUMBER");

    let result = doc.commit();
    assert_eq!(result.outcome(), CommitOutcome::Rejected);
    assert_eq!(result.diagnostic.as_deref(), Some("No items to post"));
}

#[test]
fn commit_without_expectations_is_committed() {
    let (engine, session) = session();
    engine.set_posting_mode(INVOICE, PostingMode::AcceptWithoutNumber);

    let mut doc = session.posting(INVOICE).unwrap();
    doc.add_line().unwrap().set_field("DESCRIPTION", "Widget".into());
    assert_eq!(doc.commit().outcome(), CommitOutcome::Committed);
}
