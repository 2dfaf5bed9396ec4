//! Address → handler mapping.
//!
//! Handlers for one address are kept in registration order and invoked in
//! that order. Dispatch snapshots the handler list under the lock and runs
//! the callbacks after releasing it, so a handler may register, unregister,
//! or send without deadlocking.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, error};

use crate::state::lock;

/// Callback invoked with the full received envelope as JSON text.
pub type Handler = Arc<dyn Fn(&str) + Send + Sync>;

/// Identifies one registered handler. Ids increase monotonically per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of adding a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: HandlerId,
    /// True when the address had no handlers before this one.
    pub first_for_address: bool,
}

/// Outcome of removing every handler for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Handlers left for the address. Always 0 after a full removal.
    pub remaining: usize,
    /// Number of handlers that were removed.
    pub removed: usize,
}

impl Removal {
    pub fn removed_something(&self) -> bool {
        self.removed > 0
    }
}

struct HandlerEntry {
    id: HandlerId,
    callback: Handler,
    once: bool,
    expires: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    by_address: HashMap<String, Vec<HandlerEntry>>,
    next_id: u64,
    /// No entry expires before this instant. May be stale after removals.
    next_deadline: Option<Instant>,
}

impl Inner {
    fn insert(
        &mut self,
        address: &str,
        callback: Handler,
        once: bool,
        expires: Option<Instant>,
    ) -> Registration {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        if let Some(deadline) = expires {
            self.next_deadline = Some(self.next_deadline.map_or(deadline, |d| d.min(deadline)));
        }
        let entries = self.by_address.entry(address.to_string()).or_default();
        let first_for_address = entries.is_empty();
        entries.push(HandlerEntry {
            id,
            callback,
            once,
            expires,
        });
        Registration {
            id,
            first_for_address,
        }
    }
}

/// Thread-safe registry of address handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: Mutex<Inner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `address`.
    pub fn add<F>(&self, address: &str, callback: F) -> Registration
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        lock(&self.inner).insert(address, Arc::new(callback), false, None)
    }

    /// Append a handler that is removed the first time it fires.
    pub fn add_once<F>(&self, address: &str, callback: F) -> Registration
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        lock(&self.inner).insert(address, Arc::new(callback), true, None)
    }

    /// Like [`add_once`](Self::add_once), but [`expire`](Self::expire) drops
    /// the handler unfired once `deadline` has passed.
    pub fn add_once_until<F>(
        &self,
        address: &str,
        deadline: Instant,
        callback: F,
    ) -> Registration
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        lock(&self.inner).insert(address, Arc::new(callback), true, Some(deadline))
    }

    /// Remove every handler whose deadline is at or before `now`.
    ///
    /// Returns the address of each removed handler.
    pub fn expire(&self, now: Instant) -> Vec<String> {
        let mut inner = lock(&self.inner);
        match inner.next_deadline {
            Some(deadline) if deadline <= now => {}
            _ => return Vec::new(),
        }

        let mut expired = Vec::new();
        let mut next_deadline: Option<Instant> = None;
        inner.by_address.retain(|address, entries| {
            entries.retain(|entry| match entry.expires {
                Some(deadline) if deadline <= now => {
                    expired.push(address.clone());
                    false
                }
                Some(deadline) => {
                    next_deadline = Some(next_deadline.map_or(deadline, |d| d.min(deadline)));
                    true
                }
                None => true,
            });
            !entries.is_empty()
        });
        inner.next_deadline = next_deadline;
        expired
    }

    /// Remove every handler for `address`.
    pub fn remove(&self, address: &str) -> Removal {
        let removed = lock(&self.inner)
            .by_address
            .remove(address)
            .map_or(0, |entries| entries.len());
        Removal {
            remaining: 0,
            removed,
        }
    }

    /// Remove one handler. Returns the number of handlers left for the
    /// address, or `None` if no such handler was registered.
    pub fn remove_handler(&self, address: &str, id: HandlerId) -> Option<usize> {
        let mut inner = lock(&self.inner);
        let entries = inner.by_address.get_mut(address)?;
        let position = entries.iter().position(|entry| entry.id == id)?;
        entries.remove(position);
        let remaining = entries.len();
        if remaining == 0 {
            inner.by_address.remove(address);
        }
        Some(remaining)
    }

    /// Invoke every handler for `address` with `message`, in registration
    /// order. Returns the number of handlers invoked.
    ///
    /// A panicking handler is logged and does not prevent the remaining
    /// handlers from running.
    pub fn dispatch(&self, address: &str, message: &str) -> usize {
        let callbacks: Vec<(HandlerId, Handler)> = {
            let mut inner = lock(&self.inner);
            let Some(entries) = inner.by_address.get_mut(address) else {
                debug!(address, "no handler for address");
                return 0;
            };
            let snapshot = entries
                .iter()
                .map(|entry| (entry.id, Arc::clone(&entry.callback)))
                .collect();
            entries.retain(|entry| !entry.once);
            if entries.is_empty() {
                inner.by_address.remove(address);
            }
            snapshot
        };

        for (id, callback) in &callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
                error!(
                    address,
                    handler = %id,
                    panic = %panic_message(panic.as_ref()),
                    "handler panicked"
                );
            }
        }
        callbacks.len()
    }

    /// Number of handlers registered for `address`.
    pub fn handler_count(&self, address: &str) -> usize {
        lock(&self.inner)
            .by_address
            .get(address)
            .map_or(0, Vec::len)
    }

    /// Number of addresses with at least one handler.
    pub fn address_count(&self) -> usize {
        lock(&self.inner).by_address.len()
    }

    /// Registered addresses, oldest registration first.
    pub fn list(&self) -> Vec<String> {
        let inner = lock(&self.inner);
        let mut addresses: Vec<(HandlerId, &String)> = inner
            .by_address
            .iter()
            .filter_map(|(address, entries)| entries.first().map(|entry| (entry.id, address)))
            .collect();
        addresses.sort_unstable_by_key(|(id, _)| *id);
        addresses
            .into_iter()
            .map(|(_, address)| address.clone())
            .collect()
    }

    /// Total number of handlers across all addresses.
    pub fn len(&self) -> usize {
        lock(&self.inner).by_address.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).by_address.is_empty()
    }

    /// Drop every handler. Does not notify the bus.
    pub fn clear(&self) {
        lock(&self.inner).by_address.clear();
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("addresses", &self.list())
            .field("handlers", &self.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
