//! Ambient per-thread context.
//!
//! Every thread owns one context slot. Code reads and writes it through
//! typed [`ContextKey`]s, much like a `thread_local!`, except that the slot's
//! contents can be captured as an immutable [`Context`] and carried to
//! another thread: the executor does this on every submission, and
//! [`spawn`] does it for plain threads.
//!
//! ```
//! use veda_context::context::{Context, ContextKey};
//!
//! static REQUEST_ID: ContextKey<String> = ContextKey::new("request_id");
//!
//! REQUEST_ID.set("req-1".to_string());
//! let snapshot = Context::current().unwrap();
//!
//! REQUEST_ID.set("req-2".to_string());
//! assert_eq!(snapshot.get(&REQUEST_ID).map(String::as_str), Some("req-1"));
//! assert_eq!(REQUEST_ID.get().as_deref(), Some("req-2"));
//! ```

pub(crate) mod slot;

use crate::error::{ContextError, Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Value = Arc<dyn Any + Send + Sync>;

/// Immutable snapshot of a context slot.
///
/// Cloning is a reference count bump. Writes through a [`ContextKey`] copy
/// the map first, so a snapshot never changes after it is taken.
#[derive(Clone, Default)]
pub struct Context {
    entries: Option<Arc<HashMap<&'static str, Value>>>,
}

impl Context {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of the calling thread's slot.
    pub fn current() -> std::result::Result<Self, ContextError> {
        slot::capture()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.len())
    }

    /// Value stored under `key`, if present and of type `T`.
    pub fn get<T: 'static>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.entries
            .as_ref()?
            .get(key.name)
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|e| e.contains_key(key.name))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().flat_map(|e| e.keys().copied())
    }

    /// New context with `key` set to `value`; `self` is left untouched.
    pub fn with_value<T: Send + Sync + 'static>(&self, key: &ContextKey<T>, value: T) -> Self {
        let mut entries = self.entries.as_deref().cloned().unwrap_or_default();
        entries.insert(key.name, Arc::new(value));
        Self {
            entries: Some(Arc::new(entries)),
        }
    }

    /// New context without `key`.
    pub fn without<T>(&self, key: &ContextKey<T>) -> Self {
        if !self.contains(key) {
            return self.clone();
        }
        let mut entries = self.entries.as_deref().cloned().unwrap_or_default();
        entries.remove(key.name);
        if entries.is_empty() {
            return Self::empty();
        }
        Self {
            entries: Some(Arc::new(entries)),
        }
    }

    /// Run `f` with this context installed on the current thread, then put
    /// back whatever was there before (also on panic).
    pub fn scope<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _restore = slot::Restore::install(self.clone());
        f()
    }

    /// Whether both contexts share the same storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.entries, &other.entries) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Context").field("keys", &keys).finish()
    }
}

/// Typed handle to one entry of the ambient context.
///
/// Keys are identified by name. Reading with a key whose type does not match
/// the stored value yields `None`.
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: Send + Sync + 'static> ContextKey<T> {
    /// Clone of the current thread's value.
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.with(|value| value.cloned())
    }

    /// Borrow the current thread's value. An unreadable slot reads as unset.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let ctx = slot::capture().unwrap_or_default();
        f(ctx.get(self))
    }

    pub fn is_set(&self) -> bool {
        self.with(|value| value.is_some())
    }

    pub fn try_set(&self, value: T) -> std::result::Result<(), ContextError> {
        let current = slot::capture()?;
        let previous = slot::replace(Some(current.with_value(self, value)))?;
        drop(previous);
        Ok(())
    }

    /// Set the value on the current thread. A failure is logged.
    pub fn set(&self, value: T) {
        if let Err(error) = self.try_set(value) {
            tracing::warn!(key = self.name, %error, "failed to set context value");
        }
    }

    pub fn try_remove(&self) -> std::result::Result<(), ContextError> {
        let current = slot::capture()?;
        if current.contains(self) {
            let previous = slot::replace(Some(current.without(self)))?;
            drop(previous);
        }
        Ok(())
    }

    pub fn remove(&self) {
        if let Err(error) = self.try_remove() {
            tracing::warn!(key = self.name, %error, "failed to remove context value");
        }
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

/// Spawn a thread that starts out with the caller's context.
pub fn spawn<F, T>(f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let snapshot = Context::current().map_err(Error::CaptureFailed)?;
    thread::Builder::new()
        .spawn(move || snapshot.scope(f))
        .map_err(|e| Error::executor(format!("spawn failed: {}", e)))
}
