use std::time::Duration;

use evbridge_frame::{FrameConfig, DEFAULT_MAX_FRAME_SIZE};

/// Default bridge host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default bridge port.
pub const DEFAULT_PORT: u16 = 7000;
/// Default receive timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default bound on one connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default lifetime of a pending reply handler.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration. Takes effect at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bridge host name or IP address.
    pub host: String,
    /// Bridge TCP port.
    pub port: u16,
    /// Receive timeout: upper bound on how long the receive loop blocks
    /// before re-checking the connection state. Zero blocks indefinitely.
    pub timeout: Duration,
    /// Upper bound on one TCP connect attempt. Zero uses the OS default.
    pub connect_timeout: Duration,
    /// Write timeout for outbound frames. `None` blocks.
    pub write_timeout: Option<Duration>,
    /// Largest frame accepted or sent, in bytes. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Interval between keepalive pings. `None` disables keepalive.
    pub ping_interval: Option<Duration>,
    /// How long a [`send_with_reply`](crate::Client::send_with_reply)
    /// handler waits for its answer. `None` keeps it until it fires.
    /// Checked by the receive loop, so it resolves to the receive timeout.
    pub reply_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Set the receive timeout in milliseconds.
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout = Duration::from_millis(timeout_ms);
    }

    /// `host:port`, for diagnostics.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Frame layer settings derived from this config.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_frame_size: self.max_frame_size,
            read_timeout: (!self.timeout.is_zero()).then_some(self.timeout),
            write_timeout: self.write_timeout.filter(|timeout| !timeout.is_zero()),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            ping_interval: None,
            reply_timeout: Some(DEFAULT_REPLY_TIMEOUT),
        }
    }
}
