use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::client::Shared;
use crate::envelope::Envelope;
use crate::state::ConnectionState;

/// Periodic `ping` sender. Stops when dropped via [`Keepalive::stop`] or when
/// the client leaves `Connected`.
pub(crate) struct Keepalive {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Keepalive {
    pub(crate) fn spawn(shared: Arc<Shared>, interval: Duration) -> io::Result<Self> {
        let (stop, stop_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("evbridge-keepalive".to_string())
            .spawn(move || run(&shared, interval, &stop_rx))?;
        Ok(Self { stop, handle })
    }

    pub(crate) fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            warn!("keepalive thread panicked");
        }
    }
}

fn run(shared: &Shared, interval: Duration, stop: &mpsc::Receiver<()>) {
    debug!(?interval, "keepalive started");
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if shared.state.get() != ConnectionState::Connected {
            break;
        }

        if let Some(last) = shared.last_pong() {
            let since = last.elapsed();
            if since > interval * 2 {
                warn!(?since, "no pong from bus within two keepalive intervals");
            }
        }

        match shared.write_envelope(&Envelope::ping()) {
            Ok(()) => trace!("keepalive ping sent"),
            Err(err) => debug!(error = %err, "keepalive ping failed"),
        }
    }
    debug!("keepalive stopped");
}
