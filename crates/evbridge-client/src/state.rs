use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle of one bridge connection.
///
/// `NotConnected → Connecting → Connected → Closing → Closed`, with
/// `Connecting → NotConnected` when the connect attempt fails and
/// `Connected → Closed` when the bus drops the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::NotConnected => "NOT_CONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-protected connection state.
///
/// The lock is held only for the read or write of the state itself, never
/// across I/O.
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<ConnectionState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::NotConnected),
        }
    }

    /// Snapshot the current state.
    pub fn get(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Unconditionally move to `to`, returning the previous state.
    pub fn set(&self, to: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *lock(&self.state), to)
    }

    /// Move from `from` to `to` if the state is still `from`.
    ///
    /// On mismatch the state is left alone and the actual state is returned.
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        let mut state = lock(&self.state);
        if *state != from {
            return Err(*state);
        }
        *state = to;
        Ok(())
    }

    /// Enter `Closing` from `Connected`; any other state is kept.
    ///
    /// Returns the state observed before the call.
    pub fn begin_close(&self) -> ConnectionState {
        let mut state = lock(&self.state);
        let prev = *state;
        if prev == ConnectionState::Connected {
            *state = ConnectionState::Closing;
        }
        prev
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
