//! Named-attribute access to engine records.

use ledgerbridge_types::FieldValue;
use tracing::debug;

use crate::dispatch::{get_object, DispatchRef, Variant};
use crate::error::EngineResult;

/// A record whose attributes are addressed by name or 1-based ordinal.
///
/// Access never fails: unknown fields read as `None` and writes to them are
/// skipped, so callers can write a superset of fields across engine versions.
pub trait FieldRecord {
    fn get_field(&self, name: &str) -> Option<FieldValue>;

    fn set_field(&self, name: &str, value: FieldValue);

    /// Reads the field at `index`, counting from 1.
    fn get_field_by_ordinal(&self, index: usize) -> Option<FieldValue>;

    fn field_names(&self) -> Vec<String>;
}

/// [`FieldRecord`] over any object exposing a `Fields` collection.
///
/// Lookup tries `Fields.Item(name)` first; if the engine rejects name
/// indexing it scans `Fields.Item(1..=Count)` comparing `Name`
/// case-insensitively.
#[derive(Clone)]
pub struct DispatchRecord {
    object: DispatchRef,
}

impl DispatchRecord {
    #[must_use]
    pub fn new(object: DispatchRef) -> Self {
        Self { object }
    }

    #[must_use]
    pub fn object(&self) -> &DispatchRef {
        &self.object
    }

    fn fields(&self) -> EngineResult<DispatchRef> {
        get_object(self.object.as_ref(), "Fields", &[])
    }

    fn field_by_name(&self, name: &str) -> Option<DispatchRef> {
        let fields = self.fields().ok()?;

        match get_object(fields.as_ref(), "Item", &[Variant::from(name)]) {
            Ok(field) => return Some(field),
            Err(e) => debug!(field = name, "Direct field lookup failed, scanning: {}", e),
        }

        let count = field_count(&fields);
        (1..=count).find_map(|ordinal| {
            let field = get_object(fields.as_ref(), "Item", &[Variant::from(ordinal as i64)]).ok()?;
            let field_name = field.get_property("Name", &[]).ok()?.into_value()?;
            field_name
                .to_string()
                .eq_ignore_ascii_case(name)
                .then_some(field)
        })
    }
}

fn field_count(fields: &DispatchRef) -> usize {
    fields
        .get_property("Count", &[])
        .ok()
        .and_then(Variant::into_value)
        .and_then(|v| v.as_i64())
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
}

impl FieldRecord for DispatchRecord {
    fn get_field(&self, name: &str) -> Option<FieldValue> {
        self.field_by_name(name)?
            .get_property("Value", &[])
            .ok()?
            .into_value()
    }

    fn set_field(&self, name: &str, value: FieldValue) {
        let Some(field) = self.field_by_name(name) else {
            debug!(field = name, "Skipping write to unknown field");
            return;
        };
        if let Err(e) = field.set_property("Value", &[], Variant::Value(value)) {
            debug!(field = name, "Field write ignored: {}", e);
        }
    }

    fn get_field_by_ordinal(&self, index: usize) -> Option<FieldValue> {
        if index == 0 {
            return None;
        }
        let fields = self.fields().ok()?;
        get_object(fields.as_ref(), "Item", &[Variant::from(index as i64)])
            .ok()?
            .get_property("Value", &[])
            .ok()?
            .into_value()
    }

    fn field_names(&self) -> Vec<String> {
        let Ok(fields) = self.fields() else {
            return Vec::new();
        };
        (1..=field_count(&fields))
            .filter_map(|ordinal| {
                get_object(fields.as_ref(), "Item", &[Variant::from(ordinal as i64)])
                    .ok()?
                    .get_property("Name", &[])
                    .ok()?
                    .into_value()
                    .map(|v| v.to_string())
            })
            .collect()
    }
}
