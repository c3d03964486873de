//! Unified error types for descriptor operations.

use crate::binding::Binding;
use std::io;
use thiserror::Error;

/// Errors surfaced to callers of the descriptor layer.
///
/// Construction failures are reported before anything is registered with
/// the reactor. API misuse leaves descriptor state unchanged. Terminal
/// socket errors are *not* reported here: they travel through the
/// `Unbound` event as a raw OS reason code.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied handle was invalid at construction time.
    #[error("bad eventable descriptor")]
    BadDescriptor,

    /// No descriptor is bound to this handle (it was never created, or it
    /// has already been reaped).
    #[error("no descriptor bound to {0}")]
    DeadBinding(Binding),

    /// The binding resolves to a descriptor of a different kind.
    #[error("descriptor {binding} is not a {expected}")]
    WrongKind {
        binding: Binding,
        expected: &'static str,
    },

    /// Data-plane and pause/resume operations are invalid on watch-only
    /// connections.
    #[error("operation not valid on a watch-only connection")]
    WatchOnly,

    /// Notify-readable/writable flags apply only to watch-only connections.
    #[error("notify flags require a watch-only connection")]
    NotWatchOnly,

    /// A proxy target accepts exactly one feeder at a time.
    #[error("proxy target {0} already has a feeder")]
    BusyProxyTarget(Binding),

    /// TLS cannot be reconfigured or restarted once the bridge exists.
    #[error("TLS already running on this connection")]
    TlsAlreadyStarted,

    /// TLS parameters must be supplied before the bridge is created.
    #[error("set TLS parameters before starting TLS")]
    TlsAfterStart,

    /// The crate was built without the `tls` feature.
    #[error("TLS support not built into this crate")]
    TlsUnavailable,

    /// TLS introspection requires a started bridge.
    #[error("TLS not running on this connection")]
    TlsNotActive,

    /// The supplied TLS material could not be loaded.
    #[error("TLS configuration: {0}")]
    TlsConfig(String),

    /// A fatal TLS-layer failure (bad record, handshake rejection).
    #[error("TLS failure: {0}")]
    Tls(String),

    /// The reactor could not resolve the destination address.
    #[error("unable to resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    /// Filesystem watching is unavailable on this platform.
    #[error("filesystem watching not supported on this platform")]
    WatchUnsupported,

    /// An OS-level failure during construction or configuration.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
