use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::collections::{ListMut, MapMut};
use super::schema::{FieldKind, Schema};
use super::value::Value;
use super::ObservableError;

static NEXT_OBJECT_KEY: AtomicU64 = AtomicU64::new(1);

/// Allocation-time key of an observable instance.
///
/// Assigned once from a process-wide counter and never reused, so two
/// distinct instances never share a key even after one of them is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(u64);

impl ObjectKey {
    fn next() -> Self {
        Self(NEXT_OBJECT_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Change listener, called with the mutated instance and the field name.
pub type Listener = Arc<dyn Fn(&Observable, &str) + Send + Sync>;

/// Handler for an event routed to an observable from the renderer.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// An event delivered to an observable's handler.
#[derive(Debug, Clone)]
pub struct Event {
    pub target: Observable,
    pub name: String,
    pub payload: serde_json::Value,
}

/// Handle returned by [`Observable::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    owner: ObjectKey,
    id: u64,
}

/// A mutable record with declared fields, a version counter and change
/// listeners.
///
/// Cloning an `Observable` clones the handle, not the record: both clones
/// refer to the same instance.
#[derive(Clone)]
pub struct Observable {
    inner: Arc<ObservableInner>,
}

/// Non-owning handle to an [`Observable`].
#[derive(Clone)]
pub struct WeakObservable {
    inner: Weak<ObservableInner>,
}

struct ObservableInner {
    key: ObjectKey,
    schema: &'static Schema,
    state: RwLock<FieldState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    handlers: RwLock<HashMap<String, EventHandler>>,
}

struct FieldState {
    version: u64,
    values: Vec<Value>,
}

impl Observable {
    /// Creates an instance with every field at its kind's default.
    pub fn new(schema: &'static Schema) -> Self {
        let values = schema.fields.iter().map(|f| f.kind.default_value()).collect();
        Self {
            inner: Arc::new(ObservableInner {
                key: ObjectKey::next(),
                schema,
                state: RwLock::new(FieldState { version: 0, values }),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Creates an instance and assigns the given fields in order.
    pub fn with_fields<I, V>(schema: &'static Schema, fields: I) -> Result<Self, ObservableError>
    where
        I: IntoIterator<Item = (&'static str, V)>,
        V: Into<Value>,
    {
        let obj = Self::new(schema);
        for (name, value) in fields {
            obj.set_field(name, value)?;
        }
        Ok(obj)
    }

    pub fn key(&self) -> ObjectKey {
        self.inner.key
    }

    pub fn schema(&self) -> &'static Schema {
        self.inner.schema
    }

    pub fn type_name(&self) -> &'static str {
        self.inner.schema.type_name
    }

    pub fn version(&self) -> u64 {
        self.inner.state.read().version
    }

    pub fn ptr_eq(&self, other: &Observable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakObservable {
        WeakObservable {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns a copy of the named field.
    pub fn get(&self, name: &str) -> Result<Value, ObservableError> {
        let idx = self.field_index(name)?;
        Ok(self.inner.state.read().values[idx].clone())
    }

    /// Version and all field values, read under one lock.
    pub(crate) fn read_state(&self) -> (u64, Vec<Value>) {
        let state = self.inner.state.read();
        (state.version, state.values.clone())
    }

    /// Replaces a field, bumps the version and notifies listeners.
    ///
    /// Returns the version produced by this mutation.
    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> Result<u64, ObservableError> {
        let value = value.into();
        let idx = self.field_index(name)?;
        let def = &self.inner.schema.fields[idx];
        if !def.kind.accepts(&value) {
            return Err(self.mismatch(def.name, def.kind, &value));
        }
        self.mutate(idx, |slot| {
            *slot = value;
            Ok(((), true))
        })
        .map(|(_, version)| version)
    }

    /// Mutator view over a list field.
    pub fn list(&self, name: &str) -> Result<ListMut<'_>, ObservableError> {
        let idx = self.container_index(name, FieldKind::List)?;
        Ok(ListMut::new(self, idx))
    }

    /// Mutator view over a map field.
    pub fn map(&self, name: &str) -> Result<MapMut<'_>, ObservableError> {
        let idx = self.container_index(name, FieldKind::Map)?;
        Ok(MapMut::new(self, idx))
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Observable, &str) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            owner: self.inner.key,
            id,
        }
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        if subscription.owner != self.inner.key {
            return false;
        }
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription.id);
        listeners.len() != before
    }

    /// Installs the handler for `name`, replacing any previous one.
    pub fn on_event<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .insert(name.into(), Arc::new(handler));
    }

    pub fn remove_event_handler(&self, name: &str) -> bool {
        self.inner.handlers.write().remove(name).is_some()
    }

    pub fn has_event_handler(&self, name: &str) -> bool {
        self.inner.handlers.read().contains_key(name)
    }

    /// Runs the handler registered for `name`. Returns `false` when there is none.
    ///
    /// Handler panics are not caught here; dispatchers decide how to contain them.
    pub fn trigger(&self, name: &str, payload: serde_json::Value) -> bool {
        let handler = self.inner.handlers.read().get(name).cloned();
        let Some(handler) = handler else {
            return false;
        };
        let event = Event {
            target: self.clone(),
            name: name.to_string(),
            payload,
        };
        handler(&event);
        true
    }

    /// Deep structural comparison: same types and equal field values, with
    /// nested observables compared recursively rather than by identity.
    pub fn structural_eq(&self, other: &Observable) -> bool {
        let mut in_progress = HashSet::new();
        structural_eq_objects(self, other, &mut in_progress)
    }

    /// Applies `f` to one field slot under the write lock. When `f` reports a
    /// change, the version is bumped before the lock is released and the
    /// listeners are notified after.
    pub(crate) fn mutate<R>(
        &self,
        idx: usize,
        f: impl FnOnce(&mut Value) -> Result<(R, bool), ObservableError>,
    ) -> Result<(R, u64), ObservableError> {
        let (result, changed, version) = {
            let mut state = self.inner.state.write();
            let (result, changed) = f(&mut state.values[idx])?;
            if changed {
                state.version += 1;
            }
            (result, changed, state.version)
        };
        if changed {
            self.notify(self.inner.schema.fields[idx].name);
        }
        Ok((result, version))
    }

    /// Writes field `idx` without running listeners. Returns the versions
    /// around the write; pair with [`notify_field`](Self::notify_field).
    pub(crate) fn write_field_quiet(&self, idx: usize, value: Value) -> Result<(u64, u64), ObservableError> {
        let def = &self.inner.schema.fields[idx];
        if !def.kind.accepts(&value) {
            return Err(self.mismatch(def.name, def.kind, &value));
        }
        let mut state = self.inner.state.write();
        let before = state.version;
        state.values[idx] = value;
        state.version += 1;
        Ok((before, state.version))
    }

    pub(crate) fn notify_field(&self, idx: usize) {
        self.notify(self.inner.schema.fields[idx].name);
    }

    fn notify(&self, field: &str) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(self, field))).is_err() {
                tracing::error!(
                    object = %self.inner.key,
                    field,
                    "Change listener panicked"
                );
            }
        }
    }

    fn field_index(&self, name: &str) -> Result<usize, ObservableError> {
        self.inner
            .schema
            .field_index(name)
            .ok_or_else(|| ObservableError::UnknownField {
                type_name: self.inner.schema.type_name,
                field: name.to_string(),
            })
    }

    fn container_index(&self, name: &str, kind: FieldKind) -> Result<usize, ObservableError> {
        let idx = self.field_index(name)?;
        let def = &self.inner.schema.fields[idx];
        if def.kind != kind {
            return Err(ObservableError::TypeMismatch {
                type_name: self.inner.schema.type_name,
                field: def.name,
                expected: kind.name(),
                found: def.kind.name(),
            });
        }
        Ok(idx)
    }

    pub(crate) fn mismatch(
        &self,
        field: &'static str,
        kind: FieldKind,
        value: &Value,
    ) -> ObservableError {
        if let (FieldKind::Enum(_), Value::Enum(variant)) = (kind, value) {
            return ObservableError::InvalidVariant {
                type_name: self.inner.schema.type_name,
                field,
                variant: variant.clone(),
            };
        }
        ObservableError::TypeMismatch {
            type_name: self.inner.schema.type_name,
            field,
            expected: kind.name(),
            found: value.kind_name(),
        }
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("type", &self.inner.schema.type_name)
            .field("key", &self.inner.key.0)
            .finish()
    }
}

impl WeakObservable {
    pub fn upgrade(&self) -> Option<Observable> {
        self.inner.upgrade().map(|inner| Observable { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakObservable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObservable(alive: {})", self.is_alive())
    }
}

fn structural_eq_objects(
    a: &Observable,
    b: &Observable,
    in_progress: &mut HashSet<(ObjectKey, ObjectKey)>,
) -> bool {
    if a.type_name() != b.type_name() {
        return false;
    }
    // A pair already being compared further up a cycle is assumed equal.
    if !in_progress.insert((a.key(), b.key())) {
        return true;
    }
    let (_, left) = a.read_state();
    let (_, right) = b.read_state();
    left.iter()
        .zip(right.iter())
        .all(|(l, r)| structural_eq_values(l, r, in_progress))
}

fn structural_eq_values(
    a: &Value,
    b: &Value,
    in_progress: &mut HashSet<(ObjectKey, ObjectKey)>,
) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => structural_eq_objects(x, y, in_progress),
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(l, r)| structural_eq_values(l, r, in_progress))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, l)| {
                    y.get(k)
                        .is_some_and(|r| structural_eq_values(l, r, in_progress))
                })
        }
        _ => a == b,
    }
}
