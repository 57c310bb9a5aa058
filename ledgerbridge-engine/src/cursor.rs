//! Forward-only iteration over an engine result set.

use ledgerbridge_types::FieldValue;
use tracing::{debug, warn};

use crate::dispatch::{DispatchRef, Variant};
use crate::error::EngineResult;
use crate::record::{DispatchRecord, FieldRecord};

const MOVE_FIRST: &str = "MoveFirst";
const MOVE_NEXT: &str = "MoveNext";
const IS_EOF: &str = "IsEOF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Created; the engine decides which record, if any, is current.
    NotStarted,
    Positioned,
    /// Past the last record. Terminal.
    Exhausted,
}

/// A cursor over an engine object with `MoveFirst`/`MoveNext`/`IsEOF`
/// semantics.
///
/// Iteration only goes forward. Once [`at_end`](Self::at_end) is true the
/// cursor never moves again and reads yield `None`; open a new cursor to
/// restart.
pub struct RecordCursor {
    record: DispatchRecord,
    state: CursorState,
}

impl RecordCursor {
    #[must_use]
    pub fn new(object: DispatchRef) -> Self {
        Self {
            record: DispatchRecord::new(object),
            state: CursorState::NotStarted,
        }
    }

    #[must_use]
    pub fn state(&self) -> CursorState {
        self.state
    }

    #[must_use]
    pub fn object(&self) -> &DispatchRef {
        self.record.object()
    }

    /// Moves to the first record. Returns `false` when the set is empty.
    ///
    /// Only valid before the cursor has moved; afterwards it returns whether
    /// a record is current without moving.
    pub fn first(&mut self) -> bool {
        if self.state != CursorState::NotStarted {
            return self.state == CursorState::Positioned;
        }
        self.step(MOVE_FIRST)
    }

    /// Advances to the next record. Returns `false` once past the end.
    pub fn next(&mut self) -> bool {
        match self.state {
            CursorState::Exhausted => false,
            CursorState::NotStarted => self.step(MOVE_FIRST),
            CursorState::Positioned => self.step(MOVE_NEXT),
        }
    }

    #[must_use]
    pub fn at_end(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Starts a new record in the underlying set.
    pub fn add_new(&mut self) -> EngineResult<()> {
        self.record.object().invoke("AddNew", &[])?;
        self.state = CursorState::Positioned;
        Ok(())
    }

    /// Puts the current record into edit mode.
    pub fn edit(&mut self) -> EngineResult<()> {
        self.record.object().invoke("Edit", &[])?;
        Ok(())
    }

    /// Writes pending changes. Returns the engine's verdict.
    pub fn update(&mut self) -> EngineResult<bool> {
        Ok(self.record.object().invoke("Update", &[])?.is_truthy())
    }

    /// Positions on the first record whose `field` equals `value`.
    ///
    /// An exhausted cursor stays exhausted and the engine is not asked.
    pub fn find(&mut self, field: &str, value: impl Into<FieldValue>) -> EngineResult<bool> {
        if self.at_end() {
            return Ok(false);
        }
        self.record.set_field(field, value.into());
        let found = self
            .record
            .object()
            .invoke("Find", &[Variant::from(false)])?
            .is_truthy();
        if found {
            self.state = CursorState::Positioned;
        }
        Ok(found)
    }

    fn step(&mut self, method: &str) -> bool {
        let moved = match self.record.object().invoke(method, &[]) {
            Ok(result) => !matches!(result, Variant::Value(ref v) if v.as_bool() == Some(false)),
            Err(e) => {
                warn!(method, "Cursor move failed: {}", e);
                false
            }
        };

        let eof = moved && self.reports_eof();
        self.state = if moved && !eof {
            CursorState::Positioned
        } else {
            CursorState::Exhausted
        };
        debug!(method, state = ?self.state, "Cursor moved");
        self.state == CursorState::Positioned
    }

    // Objects without IsEOF rely on the move result alone.
    fn reports_eof(&self) -> bool {
        self.record
            .object()
            .get_property(IS_EOF, &[])
            .ok()
            .and_then(Variant::into_value)
            .is_some_and(|v| v.is_truthy())
    }
}

impl FieldRecord for RecordCursor {
    fn get_field(&self, name: &str) -> Option<FieldValue> {
        if self.at_end() {
            return None;
        }
        self.record.get_field(name)
    }

    fn set_field(&self, name: &str, value: FieldValue) {
        if self.at_end() {
            return;
        }
        self.record.set_field(name, value);
    }

    fn get_field_by_ordinal(&self, index: usize) -> Option<FieldValue> {
        if self.at_end() {
            return None;
        }
        self.record.get_field_by_ordinal(index)
    }

    fn field_names(&self) -> Vec<String> {
        self.record.field_names()
    }
}
