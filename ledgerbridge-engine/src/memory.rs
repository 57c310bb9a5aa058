//! An in-process engine that implements the dispatch seam.
//!
//! Mirrors the parts of the engine object model the bridge relies on:
//! workspaces that connect once per identity, record sets with
//! `MoveFirst`/`MoveNext`/`IsEOF`, `AddNew`/`Edit`/`Update`/`Find`, posting
//! objects with a header, an `Items` collection and a single `Update` commit,
//! and a `LastError` object. Used for tests and dry runs on hosts without the
//! native engine.

use ledgerbridge_isolation::{InstantiationRequest, InstantiationStrategy, StrategyFailure};
use ledgerbridge_types::{EngineIdentity, EngineVersion, FieldValue};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::dispatch::{Dispatch, DispatchRef, Variant};
use crate::error::{EngineError, EngineResult};
use crate::record::FieldRecord;
use crate::session::{ActivationPath, EngineProvider, RootObject};

const DISP_E_MEMBERNOTFOUND: i32 = 0x8002_0003_u32 as i32;
const DISP_E_TYPEMISMATCH: i32 = 0x8002_0005_u32 as i32;
const DISP_E_BADINDEX: i32 = 0x8002_000B_u32 as i32;
const E_FAIL: i32 = 0x8000_4005_u32 as i32;

/// What a posting type does when committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingMode {
    /// Accept and fill the generated field with the next number.
    Commit,
    /// Accept but leave the generated field unassigned.
    AcceptWithoutNumber,
    /// Refuse with the given last-error text.
    Reject(String),
    /// Raise a dispatch error instead of returning.
    Raise(String),
}

/// A committed posting as the engine stored it.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedDocument {
    pub header: BTreeMap<String, FieldValue>,
    pub lines: Vec<BTreeMap<String, FieldValue>>,
}

struct Table {
    columns: Rc<Vec<String>>,
    rows: Vec<Rc<RefCell<Vec<FieldValue>>>>,
}

struct PostingType {
    header: Rc<Vec<String>>,
    lines: Rc<Vec<String>>,
    generated_field: Option<String>,
    mode: PostingMode,
    posted: Vec<PostedDocument>,
}

struct EngineState {
    version: EngineVersion,
    users: BTreeMap<String, String>,
    connections: BTreeSet<(String, String)>,
    tables: BTreeMap<String, Table>,
    postings: BTreeMap<String, PostingType>,
    secondary: BTreeSet<String>,
    primary_failure: Option<String>,
    indexed_lookup: bool,
    last_error: Option<String>,
    next_number: i64,
}

type Shared = Rc<RefCell<EngineState>>;

/// Handle to an in-process engine. Clones share state.
#[derive(Clone)]
pub struct MemoryEngine {
    state: Shared,
}

impl MemoryEngine {
    #[must_use]
    pub fn new(version: EngineVersion) -> Self {
        Self {
            state: Rc::new(RefCell::new(EngineState {
                version,
                users: BTreeMap::new(),
                connections: BTreeSet::new(),
                tables: BTreeMap::new(),
                postings: BTreeMap::new(),
                secondary: BTreeSet::new(),
                primary_failure: None,
                indexed_lookup: true,
                last_error: None,
                next_number: 1,
            })),
        }
    }

    #[must_use]
    pub fn with_user(self, identity: &str, secret: &str) -> Self {
        self.state
            .borrow_mut()
            .users
            .insert(identity.to_ascii_lowercase(), secret.to_string());
        self
    }

    #[must_use]
    pub fn version(&self) -> EngineVersion {
        self.state.borrow().version
    }

    /// Declares a record type with its columns in ordinal order.
    pub fn define_table(&self, type_name: &str, columns: &[&str]) {
        self.state.borrow_mut().tables.insert(
            key(type_name),
            Table {
                columns: Rc::new(columns.iter().map(|c| c.to_string()).collect()),
                rows: Vec::new(),
            },
        );
    }

    /// Appends a row; columns not named are left empty, unknown names ignored.
    pub fn insert(&self, type_name: &str, values: &[(&str, FieldValue)]) {
        let mut state = self.state.borrow_mut();
        let Some(table) = state.tables.get_mut(&key(type_name)) else {
            return;
        };
        let mut row = vec![FieldValue::Empty; table.columns.len()];
        for (name, value) in values {
            if let Some(index) = column_index(&table.columns, name) {
                row[index] = value.clone();
            }
        }
        table.rows.push(Rc::new(RefCell::new(row)));
    }

    /// Snapshot of a table's rows.
    #[must_use]
    pub fn rows(&self, type_name: &str) -> Vec<BTreeMap<String, FieldValue>> {
        let state = self.state.borrow();
        state
            .tables
            .get(&key(type_name))
            .map(|table| {
                table
                    .rows
                    .iter()
                    .map(|row| snapshot(&table.columns, &row.borrow()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Declares a posting type. `generated_field` is the header field the
    /// engine fills with a sequence number on commit.
    pub fn define_posting(
        &self,
        type_name: &str,
        header: &[&str],
        lines: &[&str],
        generated_field: Option<&str>,
    ) {
        self.state.borrow_mut().postings.insert(
            key(type_name),
            PostingType {
                header: Rc::new(header.iter().map(|c| c.to_string()).collect()),
                lines: Rc::new(lines.iter().map(|c| c.to_string()).collect()),
                generated_field: generated_field.map(str::to_string),
                mode: PostingMode::Commit,
                posted: Vec::new(),
            },
        );
    }

    pub fn set_posting_mode(&self, type_name: &str, mode: PostingMode) {
        if let Some(posting) = self.state.borrow_mut().postings.get_mut(&key(type_name)) {
            posting.mode = mode;
        }
    }

    #[must_use]
    pub fn posted(&self, type_name: &str) -> Vec<PostedDocument> {
        self.state
            .borrow()
            .postings
            .get(&key(type_name))
            .map(|p| p.posted.clone())
            .unwrap_or_default()
    }

    /// Lets `prog_id` be created as a self-connecting session object.
    pub fn enable_secondary(&self, prog_id: &str) {
        self.state.borrow_mut().secondary.insert(key(prog_id));
    }

    /// Makes every workspace `Connect` fail with `message`.
    pub fn fail_primary_connect(&self, message: &str) {
        self.state.borrow_mut().primary_failure = Some(message.to_string());
    }

    /// When disabled, `Fields.Item(name)` is rejected and callers must scan
    /// by ordinal.
    pub fn set_indexed_lookup(&self, enabled: bool) {
        self.state.borrow_mut().indexed_lookup = enabled;
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.borrow().connections.len()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.state.borrow().last_error.clone()
    }

    /// The engine's root object.
    #[must_use]
    pub fn root(&self) -> DispatchRef {
        Rc::new(Root {
            engine: self.state.clone(),
        })
    }

    /// An instantiation strategy that yields this engine's root, or fails
    /// with `failure` when given.
    #[must_use]
    pub fn strategy(&self, name: &'static str, failure: Option<StrategyFailure>) -> MemoryStrategy {
        MemoryStrategy {
            engine: self.clone(),
            name,
            failure,
            calls: Rc::new(Cell::new(0)),
        }
    }
}

impl EngineProvider for MemoryEngine {
    fn root(&self, _identity: &EngineIdentity) -> EngineResult<RootObject> {
        Ok(RootObject {
            object: MemoryEngine::root(self),
            lease: None,
            version: Some(self.version()),
            path: ActivationPath::Registered,
        })
    }

    fn create(&self, prog_id: &str) -> EngineResult<DispatchRef> {
        if self.state.borrow().secondary.contains(&key(prog_id)) {
            Ok(Rc::new(Session::new(self.state.clone(), false)))
        } else {
            Err(EngineError::EngineNotPresent(format!("{prog_id} is not registered")))
        }
    }
}

/// See [`MemoryEngine::strategy`].
#[derive(Clone)]
pub struct MemoryStrategy {
    engine: MemoryEngine,
    name: &'static str,
    failure: Option<StrategyFailure>,
    calls: Rc<Cell<usize>>,
}

impl MemoryStrategy {
    /// How many times the chain has tried this strategy.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl InstantiationStrategy for MemoryStrategy {
    type Handle = DispatchRef;

    fn name(&self) -> &'static str {
        self.name
    }

    fn instantiate(&self, _request: &InstantiationRequest) -> Result<DispatchRef, StrategyFailure> {
        self.calls.set(self.calls.get() + 1);
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(self.engine.root()),
        }
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn column_index(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|c| c.eq_ignore_ascii_case(name))
}

fn snapshot(columns: &[String], values: &[FieldValue]) -> BTreeMap<String, FieldValue> {
    columns.iter().cloned().zip(values.iter().cloned()).collect()
}

fn member_not_found(type_name: &str, member: &str) -> EngineError {
    EngineError::Dispatch {
        member: member.to_string(),
        code: DISP_E_MEMBERNOTFOUND,
        message: format!("{type_name} has no member {member}"),
    }
}

fn arg_text(args: &[Variant], index: usize) -> String {
    args.get(index)
        .and_then(|a| a.clone().into_value())
        .map(|v| v.to_string())
        .unwrap_or_default()
}

// ── Records ───────────────────────────────────────────────────────

struct RecordData {
    columns: Rc<Vec<String>>,
    values: RefCell<Vec<FieldValue>>,
    dirty: RefCell<BTreeSet<usize>>,
    indexed_lookup: bool,
}

/// A statically shaped record: named columns over a value buffer.
///
/// Implements [`FieldRecord`] natively and exposes the same data through a
/// `Fields` collection for dispatch-based access.
#[derive(Clone)]
pub struct MemoryRecord(Rc<RecordData>);

impl MemoryRecord {
    fn new(columns: Rc<Vec<String>>, indexed_lookup: bool) -> Self {
        let values = vec![FieldValue::Empty; columns.len()];
        Self(Rc::new(RecordData {
            columns,
            values: RefCell::new(values),
            dirty: RefCell::new(BTreeSet::new()),
            indexed_lookup,
        }))
    }

    fn load(&self, values: &[FieldValue]) {
        *self.0.values.borrow_mut() = values.to_vec();
        self.0.dirty.borrow_mut().clear();
    }

    fn clear(&self) {
        self.load(&vec![FieldValue::Empty; self.0.columns.len()]);
    }

    fn values(&self) -> Vec<FieldValue> {
        self.0.values.borrow().clone()
    }

    fn snapshot(&self) -> BTreeMap<String, FieldValue> {
        snapshot(&self.0.columns, &self.0.values.borrow())
    }

    fn write(&self, index: usize, value: FieldValue) {
        if let Some(slot) = self.0.values.borrow_mut().get_mut(index) {
            *slot = value;
            self.0.dirty.borrow_mut().insert(index);
        }
    }
}

impl FieldRecord for MemoryRecord {
    fn get_field(&self, name: &str) -> Option<FieldValue> {
        let index = column_index(&self.0.columns, name)?;
        self.0.values.borrow().get(index).cloned()
    }

    fn set_field(&self, name: &str, value: FieldValue) {
        if let Some(index) = column_index(&self.0.columns, name) {
            self.write(index, value);
        }
    }

    fn get_field_by_ordinal(&self, index: usize) -> Option<FieldValue> {
        self.0.values.borrow().get(index.checked_sub(1)?).cloned()
    }

    fn field_names(&self) -> Vec<String> {
        self.0.columns.as_ref().clone()
    }
}

impl Dispatch for MemoryRecord {
    fn type_name(&self) -> String {
        "Record".to_string()
    }

    fn get_property(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Fields" => Ok(Variant::Object(Rc::new(Fields(self.clone())))),
            _ => Err(member_not_found("Record", name)),
        }
    }

    fn set_property(&self, name: &str, _args: &[Variant], _value: Variant) -> EngineResult<()> {
        Err(member_not_found("Record", name))
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        Err(member_not_found("Record", name))
    }
}

struct Fields(MemoryRecord);

impl Dispatch for Fields {
    fn type_name(&self) -> String {
        "Fields".to_string()
    }

    fn get_property(&self, name: &str, args: &[Variant]) -> EngineResult<Variant> {
        let data = &self.0 .0;
        match name {
            "Count" => Ok(Variant::from(data.columns.len() as i64)),
            "Item" => {
                let index = match args.first() {
                    Some(Variant::Value(FieldValue::Int(ordinal))) => usize::try_from(*ordinal)
                        .ok()
                        .and_then(|o| o.checked_sub(1))
                        .filter(|i| *i < data.columns.len()),
                    Some(Variant::Value(FieldValue::Text(field))) => {
                        if !data.indexed_lookup {
                            return Err(EngineError::Dispatch {
                                member: "Item".to_string(),
                                code: DISP_E_TYPEMISMATCH,
                                message: "Fields are indexed by ordinal only".to_string(),
                            });
                        }
                        column_index(&data.columns, field)
                    }
                    _ => None,
                };
                let index = index.ok_or_else(|| EngineError::Dispatch {
                    member: "Item".to_string(),
                    code: DISP_E_BADINDEX,
                    message: format!("no field {:?}", args.first()),
                })?;
                Ok(Variant::Object(Rc::new(Field {
                    record: self.0.clone(),
                    index,
                })))
            }
            _ => Err(member_not_found("Fields", name)),
        }
    }

    fn set_property(&self, name: &str, _args: &[Variant], _value: Variant) -> EngineResult<()> {
        Err(member_not_found("Fields", name))
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        Err(member_not_found("Fields", name))
    }
}

struct Field {
    record: MemoryRecord,
    index: usize,
}

impl Dispatch for Field {
    fn type_name(&self) -> String {
        "Field".to_string()
    }

    fn get_property(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        let data = &self.record.0;
        match name {
            "Name" => Ok(Variant::from(data.columns[self.index].as_str())),
            "Value" => Ok(Variant::Value(
                data.values.borrow().get(self.index).cloned().unwrap_or_default(),
            )),
            _ => Err(member_not_found("Field", name)),
        }
    }

    fn set_property(&self, name: &str, _args: &[Variant], value: Variant) -> EngineResult<()> {
        match (name, value) {
            ("Value", Variant::Value(value)) => {
                self.record.write(self.index, value);
                Ok(())
            }
            ("Value", Variant::Object(_)) => Err(EngineError::Dispatch {
                member: "Value".to_string(),
                code: DISP_E_TYPEMISMATCH,
                message: "objects cannot be stored in fields".to_string(),
            }),
            _ => Err(member_not_found("Field", name)),
        }
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        Err(member_not_found("Field", name))
    }
}

// ── Root, workspaces and sessions ─────────────────────────────────

struct Root {
    engine: Shared,
}

impl Dispatch for Root {
    fn type_name(&self) -> String {
        "SDOEngine".to_string()
    }

    fn get_property(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Workspaces" => Ok(Variant::Object(Rc::new(Workspaces {
                engine: self.engine.clone(),
            }))),
            "LastError" => Ok(Variant::Object(Rc::new(LastError {
                engine: self.engine.clone(),
            }))),
            "Version" => Ok(Variant::from(self.engine.borrow().version.to_string())),
            _ => Err(member_not_found("SDOEngine", name)),
        }
    }

    fn set_property(&self, name: &str, _args: &[Variant], _value: Variant) -> EngineResult<()> {
        Err(member_not_found("SDOEngine", name))
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        Err(member_not_found("SDOEngine", name))
    }
}

struct LastError {
    engine: Shared,
}

impl Dispatch for LastError {
    fn type_name(&self) -> String {
        "SDOException".to_string()
    }

    fn get_property(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Text" => Ok(Variant::from(
                self.engine.borrow().last_error.clone().unwrap_or_default(),
            )),
            _ => Err(member_not_found("SDOException", name)),
        }
    }

    fn set_property(&self, name: &str, _args: &[Variant], _value: Variant) -> EngineResult<()> {
        Err(member_not_found("SDOException", name))
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        Err(member_not_found("SDOException", name))
    }
}

struct Workspaces {
    engine: Shared,
}

impl Dispatch for Workspaces {
    fn type_name(&self) -> String {
        "Workspaces".to_string()
    }

    fn get_property(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        Err(member_not_found("Workspaces", name))
    }

    fn set_property(&self, name: &str, _args: &[Variant], _value: Variant) -> EngineResult<()> {
        Err(member_not_found("Workspaces", name))
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Add" => Ok(Variant::Object(Rc::new(Session::new(self.engine.clone(), true)))),
            _ => Err(member_not_found("Workspaces", name)),
        }
    }
}

/// A workspace (primary) or a directly created session object (secondary).
struct Session {
    engine: Shared,
    primary: bool,
    connection: RefCell<Option<(String, String)>>,
}

impl Session {
    fn new(engine: Shared, primary: bool) -> Self {
        Self {
            engine,
            primary,
            connection: RefCell::new(None),
        }
    }

    fn connect(&self, args: &[Variant]) -> Variant {
        let data_path = arg_text(args, 0);
        let identity = arg_text(args, 1);
        let secret = arg_text(args, 2);
        let mut state = self.engine.borrow_mut();

        if self.primary {
            if let Some(message) = state.primary_failure.clone() {
                state.last_error = Some(message);
                return Variant::from(false);
            }
        }

        let connection = (key(&data_path), key(&identity));
        if state.connections.contains(&connection) {
            state.last_error = Some(format!(
                "User '{identity}' is already logged in to {data_path}"
            ));
            return Variant::from(false);
        }

        if state.users.get(&key(&identity)) != Some(&secret) {
            state.last_error = Some("Invalid username or password".to_string());
            return Variant::from(false);
        }

        state.connections.insert(connection.clone());
        state.last_error = None;
        *self.connection.borrow_mut() = Some(connection);
        Variant::from(true)
    }

    fn disconnect(&self) -> Variant {
        if let Some(connection) = self.connection.borrow_mut().take() {
            self.engine.borrow_mut().connections.remove(&connection);
        }
        Variant::from(true)
    }

    fn create_object(&self, args: &[Variant]) -> EngineResult<Variant> {
        if self.connection.borrow().is_none() {
            return Err(EngineError::Dispatch {
                member: "CreateObject".to_string(),
                code: E_FAIL,
                message: "not connected".to_string(),
            });
        }
        let type_name = arg_text(args, 0);
        let state = self.engine.borrow();
        let indexed = state.indexed_lookup;

        if let Some(table) = state.tables.get(&key(&type_name)) {
            return Ok(Variant::Object(Rc::new(RecordSet {
                engine: self.engine.clone(),
                table: key(&type_name),
                buffer: MemoryRecord::new(table.columns.clone(), indexed),
                position: Cell::new(None),
                pending: Cell::new(Pending::None),
            })));
        }

        if let Some(posting) = state.postings.get(&key(&type_name)) {
            return Ok(Variant::Object(Rc::new(Posting {
                engine: self.engine.clone(),
                posting_type: key(&type_name),
                header: MemoryRecord::new(posting.header.clone(), indexed),
                items: Rc::new(Items {
                    columns: posting.lines.clone(),
                    indexed,
                    lines: RefCell::new(Vec::new()),
                }),
            })));
        }

        Err(EngineError::Dispatch {
            member: "CreateObject".to_string(),
            code: E_FAIL,
            message: format!("unknown object type {type_name}"),
        })
    }
}

impl Dispatch for Session {
    fn type_name(&self) -> String {
        if self.primary { "WorkSpace" } else { "SDOSession" }.to_string()
    }

    fn get_property(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Connected" => Ok(Variant::from(self.connection.borrow().is_some())),
            _ => Err(member_not_found(&self.type_name(), name)),
        }
    }

    fn set_property(&self, name: &str, _args: &[Variant], _value: Variant) -> EngineResult<()> {
        Err(member_not_found(&self.type_name(), name))
    }

    fn invoke(&self, name: &str, args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Connect" => Ok(self.connect(args)),
            "Disconnect" => Ok(self.disconnect()),
            "CreateObject" => self.create_object(args),
            _ => Err(member_not_found(&self.type_name(), name)),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            if let Ok(mut state) = self.engine.try_borrow_mut() {
                state.connections.remove(&connection);
            }
        }
    }
}

// ── Record sets ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    New,
    Edit,
}

struct RecordSet {
    engine: Shared,
    table: String,
    buffer: MemoryRecord,
    position: Cell<Option<usize>>,
    pending: Cell<Pending>,
}

impl RecordSet {
    fn row_count(&self) -> usize {
        self.engine
            .borrow()
            .tables
            .get(&self.table)
            .map_or(0, |t| t.rows.len())
    }

    fn row(&self, index: usize) -> Option<Rc<RefCell<Vec<FieldValue>>>> {
        self.engine
            .borrow()
            .tables
            .get(&self.table)
            .and_then(|t| t.rows.get(index).cloned())
    }

    fn move_to(&self, index: usize) -> Variant {
        self.pending.set(Pending::None);
        self.position.set(Some(index));
        match self.row(index) {
            Some(row) => {
                self.buffer.load(&row.borrow());
                Variant::from(true)
            }
            None => {
                self.buffer.clear();
                Variant::from(false)
            }
        }
    }

    fn is_eof(&self) -> bool {
        self.position.get().is_some_and(|p| p >= self.row_count())
    }

    fn update(&self) -> Variant {
        let values = self.buffer.values();
        let mut guard = self.engine.borrow_mut();
        let state = &mut *guard;
        match self.pending.get() {
            Pending::New => {
                let Some(table) = state.tables.get_mut(&self.table) else {
                    return Variant::from(false);
                };
                table.rows.push(Rc::new(RefCell::new(values)));
                let index = table.rows.len() - 1;
                self.position.set(Some(index));
            }
            Pending::Edit => {
                let row = self
                    .position
                    .get()
                    .and_then(|p| state.tables.get(&self.table)?.rows.get(p).cloned());
                match row {
                    Some(row) => *row.borrow_mut() = values,
                    None => {
                        state.last_error = Some("No current record".to_string());
                        return Variant::from(false);
                    }
                }
            }
            Pending::None => {
                state.last_error = Some("Update without AddNew or Edit".to_string());
                return Variant::from(false);
            }
        }
        self.pending.set(Pending::None);
        self.buffer.0.dirty.borrow_mut().clear();
        Variant::from(true)
    }

    // Matches rows on the fields written since the last move.
    fn find(&self) -> Variant {
        let keys: Vec<(usize, FieldValue)> = {
            let values = self.buffer.0.values.borrow();
            self.buffer
                .0
                .dirty
                .borrow()
                .iter()
                .map(|i| (*i, values[*i].clone()))
                .collect()
        };
        if keys.is_empty() {
            return Variant::from(false);
        }

        let found = {
            let state = self.engine.borrow();
            state.tables.get(&self.table).and_then(|table| {
                table.rows.iter().position(|row| {
                    let row = row.borrow();
                    keys.iter().all(|(i, value)| {
                        row[*i].to_string().eq_ignore_ascii_case(&value.to_string())
                    })
                })
            })
        };

        match found {
            Some(index) => self.move_to(index),
            None => {
                self.engine.borrow_mut().last_error = Some("Record not found".to_string());
                Variant::from(false)
            }
        }
    }
}

impl Dispatch for RecordSet {
    fn type_name(&self) -> String {
        self.table.clone()
    }

    fn get_property(&self, name: &str, args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "IsEOF" => Ok(Variant::from(self.is_eof())),
            "Count" => Ok(Variant::from(self.row_count() as i64)),
            _ => self.buffer.get_property(name, args),
        }
    }

    fn set_property(&self, name: &str, args: &[Variant], value: Variant) -> EngineResult<()> {
        self.buffer.set_property(name, args, value)
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "MoveFirst" => Ok(self.move_to(0)),
            "MoveNext" => {
                let next = self.position.get().map_or(0, |p| p + 1);
                Ok(self.move_to(next.min(self.row_count())))
            }
            "AddNew" => {
                self.buffer.clear();
                self.pending.set(Pending::New);
                Ok(Variant::from(true))
            }
            "Edit" => {
                if self.position.get().is_none() || self.is_eof() {
                    return Err(EngineError::Dispatch {
                        member: "Edit".to_string(),
                        code: E_FAIL,
                        message: "no current record".to_string(),
                    });
                }
                self.pending.set(Pending::Edit);
                Ok(Variant::from(true))
            }
            "Update" => Ok(self.update()),
            "Find" => Ok(self.find()),
            _ => Err(member_not_found(&self.type_name(), name)),
        }
    }
}

// ── Postings ──────────────────────────────────────────────────────

struct Items {
    columns: Rc<Vec<String>>,
    indexed: bool,
    lines: RefCell<Vec<MemoryRecord>>,
}

impl Dispatch for Items {
    fn type_name(&self) -> String {
        "Items".to_string()
    }

    fn get_property(&self, name: &str, args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Count" => Ok(Variant::from(self.lines.borrow().len() as i64)),
            "Item" => {
                let line = args
                    .first()
                    .and_then(|a| a.clone().into_value())
                    .and_then(|v| v.as_i64())
                    .and_then(|i| usize::try_from(i).ok()?.checked_sub(1))
                    .and_then(|i| self.lines.borrow().get(i).cloned())
                    .ok_or_else(|| EngineError::Dispatch {
                        member: "Item".to_string(),
                        code: DISP_E_BADINDEX,
                        message: "no such line".to_string(),
                    })?;
                Ok(Variant::Object(Rc::new(line)))
            }
            _ => Err(member_not_found("Items", name)),
        }
    }

    fn set_property(&self, name: &str, _args: &[Variant], _value: Variant) -> EngineResult<()> {
        Err(member_not_found("Items", name))
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Add" => {
                let line = MemoryRecord::new(self.columns.clone(), self.indexed);
                self.lines.borrow_mut().push(line.clone());
                Ok(Variant::Object(Rc::new(line)))
            }
            _ => Err(member_not_found("Items", name)),
        }
    }
}

struct Posting {
    engine: Shared,
    posting_type: String,
    header: MemoryRecord,
    items: Rc<Items>,
}

impl Posting {
    fn commit(&self) -> EngineResult<Variant> {
        let mut guard = self.engine.borrow_mut();
        let state = &mut *guard;
        let number = state.next_number;
        let Some(posting) = state.postings.get_mut(&self.posting_type) else {
            return Ok(Variant::from(false));
        };

        let message = match &posting.mode {
            PostingMode::Raise(message) => {
                let message = message.clone();
                state.last_error = Some(message.clone());
                return Err(EngineError::Dispatch {
                    member: "Update".to_string(),
                    code: E_FAIL,
                    message,
                });
            }
            PostingMode::Reject(message) => Some(message.clone()),
            _ if self.items.lines.borrow().is_empty() => Some("No items to post".to_string()),
            _ => None,
        };
        if let Some(message) = message {
            state.last_error = Some(message);
            return Ok(Variant::from(false));
        }

        let mut assigned = false;
        if posting.mode == PostingMode::Commit {
            if let Some(field) = &posting.generated_field {
                self.header.set_field(field, FieldValue::Int(number));
                assigned = true;
            }
        }

        posting.posted.push(PostedDocument {
            header: self.header.snapshot(),
            lines: self.items.lines.borrow().iter().map(MemoryRecord::snapshot).collect(),
        });
        if assigned {
            state.next_number += 1;
        }
        state.last_error = None;
        Ok(Variant::from(true))
    }
}

impl Dispatch for Posting {
    fn type_name(&self) -> String {
        self.posting_type.clone()
    }

    fn get_property(&self, name: &str, args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Header" => Ok(Variant::Object(Rc::new(self.header.clone()))),
            "Items" => Ok(Variant::Object(self.items.clone())),
            _ => self.header.get_property(name, args),
        }
    }

    fn set_property(&self, name: &str, args: &[Variant], value: Variant) -> EngineResult<()> {
        self.header.set_property(name, args, value)
    }

    fn invoke(&self, name: &str, _args: &[Variant]) -> EngineResult<Variant> {
        match name {
            "Update" => self.commit(),
            _ => Err(member_not_found(&self.type_name(), name)),
        }
    }
}
