//! Process-local backend
//!
//! Keeps accounts and table rows in memory and enforces the constraints the
//! hosted database owns: unique ids everywhere and a single enrollment per
//! `(student_id, course_id)`. Failures can be injected to exercise the
//! portal's error paths.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use log::debug;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{Backend, Filter, IdentityEvent, IdentityEventKind, Query};
use crate::error::Error;
use crate::models::{tables, Identity};

struct Account {
    identity: Identity,
    password: String,
    metadata: Value,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    current: Option<Identity>,
    tables: HashMap<String, Vec<Value>>,
    offline: bool,
    rejected_tables: HashSet<String>,
}

/// In-memory [`Backend`]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<IdentityEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_event_capacity(64)
    }

    /// Backend whose identity-event channel holds at most `capacity` events
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: IdentityEventKind, identity: Option<Identity>) {
        if self.events.send(IdentityEvent { kind, identity }).is_err() {
            debug!("no identity listeners for {:?}", kind);
        }
    }

    /// Insert rows directly, bypassing injected failures
    pub fn seed(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, Error> {
        let mut state = self.lock();
        rows.into_iter()
            .map(|row| insert_locked(&mut state, table, row))
            .collect()
    }

    /// Snapshot of a table
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Merge `patch` into the row with the given id. Returns false when no
    /// such row exists.
    pub fn update(&self, table: &str, id: &str, patch: Value) -> bool {
        let mut state = self.lock();
        let row = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| cell(row, "id").as_deref() == Some(id)));

        match (row, patch) {
            (Some(Value::Object(row)), Value::Object(patch)) => {
                row.extend(patch);
                true
            }
            _ => false,
        }
    }

    /// Metadata stored with an account at sign-up
    pub fn account_metadata(&self, email: &str) -> Option<Value> {
        self.lock()
            .accounts
            .get(&email.to_lowercase())
            .map(|account| account.metadata.clone())
    }

    /// Fail every call with a network error while set
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Reject inserts into `table` as a row-level policy would
    pub fn reject_inserts(&self, table: &str) {
        self.lock().rejected_tables.insert(table.to_string());
    }

    pub fn accept_inserts(&self, table: &str) {
        self.lock().rejected_tables.remove(table);
    }

    fn ensure_online(state: &MemoryState) -> Result<(), Error> {
        if state.offline {
            Err(Error::Network("backend unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, Error> {
        let identity = {
            let mut state = self.lock();
            Self::ensure_online(&state)?;
            let identity = match state.accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(Error::InvalidCredentials),
            };
            state.current = Some(identity.clone());
            identity
        };

        self.emit(IdentityEventKind::SignedIn, Some(identity.clone()));
        Ok(identity)
    }

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<Identity, Error> {
        let identity = {
            let mut state = self.lock();
            Self::ensure_online(&state)?;
            let key = email.to_lowercase();
            if state.accounts.contains_key(&key) {
                return Err(Error::auth("User already registered"));
            }

            let identity = Identity {
                id: Uuid::new_v4().to_string(),
                email: email.to_string(),
            };
            state.accounts.insert(
                key,
                Account {
                    identity: identity.clone(),
                    password: password.to_string(),
                    metadata: metadata.unwrap_or(Value::Null),
                },
            );
            state.current = Some(identity.clone());
            identity
        };

        self.emit(IdentityEventKind::SignedIn, Some(identity.clone()));
        Ok(identity)
    }

    async fn current_identity(&self) -> Option<Identity> {
        self.lock().current.clone()
    }

    fn on_identity_change(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), Error> {
        {
            let mut state = self.lock();
            Self::ensure_online(&state)?;
            if state.current.take().is_none() {
                return Err(Error::NotSignedIn);
            }
        }

        self.emit(IdentityEventKind::SignedOut, None);
        Ok(())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>, Error> {
        let state = self.lock();
        Self::ensure_online(&state)?;
        Ok(run_query(&state, query))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, Error> {
        let mut state = self.lock();
        Self::ensure_online(&state)?;
        if state.rejected_tables.contains(table) {
            return Err(Error::database(format!(
                "new row violates row-level security policy for table \"{}\"",
                table
            )));
        }
        insert_locked(&mut state, table, row)
    }

    async fn count(&self, query: &Query) -> Result<u64, Error> {
        let state = self.lock();
        Self::ensure_online(&state)?;
        let query = Query {
            limit: None,
            ..query.clone()
        };
        Ok(run_query(&state, &query).len() as u64)
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn generated_columns(table: &str) -> &'static [&'static str] {
    match table {
        tables::PROFILES | tables::COURSES => &["created_at", "updated_at"],
        tables::ENROLLMENTS => &["enrolled_at"],
        _ => &["created_at"],
    }
}

fn unique_keys(table: &str) -> &'static [&'static [&'static str]] {
    match table {
        tables::ENROLLMENTS => &[&["id"], &["student_id", "course_id"]],
        _ => &[&["id"]],
    }
}

fn insert_locked(state: &mut MemoryState, table: &str, row: Value) -> Result<Value, Error> {
    let mut row: Map<String, Value> = match row {
        Value::Object(map) => map,
        other => {
            return Err(Error::database(format!(
                "expected a JSON object for {}, got {}",
                table, other
            )))
        }
    };

    row.entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    for column in generated_columns(table) {
        row.entry(*column).or_insert_with(now);
    }
    match table {
        tables::ENROLLMENTS => {
            row.entry("progress").or_insert(Value::from(0));
        }
        tables::EVENTS => {
            row.entry("current_participants").or_insert(Value::from(0));
        }
        _ => {}
    }
    let row = Value::Object(row);

    let rows = state.tables.entry(table.to_string()).or_default();
    for key in unique_keys(table) {
        let clash = rows
            .iter()
            .any(|existing| key.iter().all(|column| cell(existing, column) == cell(&row, column)));
        if clash {
            return Err(Error::Conflict(format!(
                "duplicate key value violates unique constraint \"{}_{}_key\"",
                table,
                key.join("_")
            )));
        }
    }

    rows.push(row.clone());
    Ok(row)
}

fn run_query(state: &MemoryState, query: &Query) -> Vec<Value> {
    let mut rows: Vec<Value> = state
        .tables
        .get(&query.table)
        .map(|rows| {
            rows.iter()
                .filter(|row| query.filters.iter().all(|filter| matches(row, filter)))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if let Some(order) = &query.order {
        rows.sort_by(|a, b| {
            let ordering = compare_cells(a.get(&order.column), b.get(&order.column));
            if order.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }

    rows
}

fn cell(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, value) => cell(row, column).as_deref() == Some(value.as_str()),
        Filter::In(column, values) => {
            cell(row, column).map_or(false, |c| values.iter().any(|v| *v == c))
        }
    }
}

fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, None) | (Some(Value::Null), Some(Value::Null)) => Ordering::Equal,
        // nulls last
        (None, _) | (Some(Value::Null), _) => Ordering::Greater,
        (_, None) | (_, Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
