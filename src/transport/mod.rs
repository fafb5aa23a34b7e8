//! Auto-reconnecting, length-framed message transport.

mod backoff;
mod close;
mod connector;
mod frame;
mod reconnecting;

use std::fmt;
use std::io;
use std::time::Duration;

pub use backoff::BackoffPolicy;
pub use connector::{is_local_address, Connector, TcpConnector};
#[cfg(unix)]
pub use connector::UnixConnector;
pub use frame::{read_frame, write_frame};
pub use reconnecting::{Delivery, Handshake, ReconnectingTransport};

/// Lifecycle of a [`ReconnectingTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Entered on `close()`; terminal.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("connect timed out after {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
