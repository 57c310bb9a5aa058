//! Header-plus-lines units of work committed in one engine call.

use ledgerbridge_types::FieldValue;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::dispatch::{get_object, invoke_object, last_error_text, DispatchRef};
use crate::error::{EngineError, EngineResult};
use crate::record::{DispatchRecord, FieldRecord};

/// How a commit should be read by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    /// Accepted with every expected generated field present.
    Committed,
    /// Accepted, but an expected generated field is absent or zero.
    AcceptedPending,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitResult {
    pub success: bool,
    /// Expected generated fields read back after the commit. Absent fields
    /// are not present in the map.
    pub generated_fields: BTreeMap<String, FieldValue>,
    pub diagnostic: Option<String>,
    expected: Vec<String>,
}

impl CommitResult {
    #[must_use]
    pub fn outcome(&self) -> CommitOutcome {
        if !self.success {
            return CommitOutcome::Rejected;
        }
        let complete = self.expected.iter().all(|name| {
            self.generated_fields
                .get(name)
                .is_some_and(|v| !v.is_zero_or_empty())
        });
        if complete {
            CommitOutcome::Committed
        } else {
            CommitOutcome::AcceptedPending
        }
    }

    #[must_use]
    pub fn generated(&self, name: &str) -> Option<&FieldValue> {
        self.generated_fields.get(name)
    }

    /// Converts a rejection into [`EngineError::CommitRejected`].
    pub fn into_result(self) -> EngineResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(EngineError::CommitRejected(
                self.diagnostic
                    .clone()
                    .unwrap_or_else(|| "engine returned false".to_string()),
            ))
        }
    }
}

/// One line of a posting document.
pub type LineItem = DispatchRecord;

/// An engine posting object: header fields, an `Items` collection and a
/// single `Update` commit.
pub struct PostingDocument {
    header: DispatchRecord,
    /// Object consulted for `LastError` after a failed commit.
    error_source: Option<DispatchRef>,
    expected: Vec<String>,
    lines: usize,
}

impl PostingDocument {
    #[must_use]
    pub fn new(object: DispatchRef, error_source: Option<DispatchRef>) -> Self {
        Self {
            header: DispatchRecord::new(object),
            error_source,
            expected: Vec::new(),
            lines: 0,
        }
    }

    /// Header record. Postings expose it as a `Header` object; objects
    /// without one carry the header fields directly.
    fn header_record(&self) -> DispatchRecord {
        match get_object(self.header.object().as_ref(), "Header", &[]) {
            Ok(header) => DispatchRecord::new(header),
            Err(_) => self.header.clone(),
        }
    }

    pub fn set_header_field(&self, name: &str, value: impl Into<FieldValue>) {
        self.header_record().set_field(name, value.into());
    }

    #[must_use]
    pub fn header_field(&self, name: &str) -> Option<FieldValue> {
        self.header_record().get_field(name)
    }

    /// Appends a line through `Items.Add()`.
    pub fn add_line(&mut self) -> EngineResult<LineItem> {
        let items = get_object(self.header.object().as_ref(), "Items", &[])?;
        let line = invoke_object(items.as_ref(), "Add", &[])?;
        self.lines += 1;
        Ok(DispatchRecord::new(line))
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines
    }

    /// Declares a header field the engine is expected to fill on commit,
    /// such as a transaction number.
    pub fn expect_generated(&mut self, name: &str) -> &mut Self {
        if !self.expected.iter().any(|e| e.eq_ignore_ascii_case(name)) {
            self.expected.push(name.to_string());
        }
        self
    }

    /// Issues the commit. Never retried; the document is consumed.
    pub fn commit(self) -> CommitResult {
        let (success, raised) = match self.header.object().invoke("Update", &[]) {
            Ok(result) => (result.is_truthy(), None),
            Err(e) => (false, Some(e.to_string())),
        };

        let diagnostic = if success {
            None
        } else {
            self.error_source
                .as_deref()
                .and_then(last_error_text)
                .or_else(|| last_error_text(self.header.object().as_ref()))
                .or(raised)
                .or_else(|| Some("engine returned false".to_string()))
        };

        let header = self.header_record();
        let generated_fields: BTreeMap<String, FieldValue> = self
            .expected
            .iter()
            .filter_map(|name| header.get_field(name).map(|v| (name.clone(), v)))
            .collect();

        let result = CommitResult {
            success,
            generated_fields,
            diagnostic,
            expected: self.expected,
        };

        match result.outcome() {
            CommitOutcome::Committed => info!(lines = self.lines, "Posting committed"),
            CommitOutcome::AcceptedPending => warn!(
                lines = self.lines,
                expected = ?result.expected,
                "Posting accepted without expected generated fields"
            ),
            CommitOutcome::Rejected => warn!(
                lines = self.lines,
                diagnostic = result.diagnostic.as_deref().unwrap_or_default(),
                "Posting rejected"
            ),
        }
        result
    }
}
