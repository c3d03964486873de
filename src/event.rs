//! Events delivered from descriptors to user code.
//!
//! Every descriptor emits through a single channel registered by the
//! reactor: an [`EventSink`] trait object. Within one descriptor the
//! delivery order is total: zero or more `Read`s, at most one `Completed`
//! and at most one `TlsHandshakeCompleted` before any `Read`, optionally a
//! `ProxyCompleted` between `Read`s, and exactly one terminal `Unbound`
//! for every descriptor that did not suppress it.

use crate::binding::Binding;
use std::ops::Deref;

/// Inbound bytes handed to user code.
///
/// The backing buffer always carries one guard byte: `with_guard()[len()]`
/// is `0`. Consumers that interoperate with C-string-style parsers may
/// depend on that terminator; everyone else uses the plain slice.
#[derive(Clone, Copy)]
pub struct Payload<'a> {
    // Includes the trailing guard byte; payload length is buf.len() - 1.
    buf: &'a [u8],
}

impl<'a> Payload<'a> {
    /// Wraps a buffer whose final byte is the guard NUL.
    pub(crate) fn new(buf_with_guard: &'a [u8]) -> Self {
        debug_assert!(!buf_with_guard.is_empty());
        debug_assert_eq!(buf_with_guard[buf_with_guard.len() - 1], 0);
        Payload { buf: buf_with_guard }
    }

    /// The received bytes, without the guard byte.
    pub fn bytes(&self) -> &'a [u8] {
        &self.buf[..self.buf.len() - 1]
    }

    /// The received bytes plus the trailing guard NUL.
    pub fn with_guard(&self) -> &'a [u8] {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> Deref for Payload<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl<'a> std::fmt::Debug for Payload<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Payload({} bytes)", self.len())
    }
}

/// Event kinds emitted by the descriptor layer.
#[derive(Debug)]
pub enum Event<'a> {
    /// Inbound bytes on a stream or datagram descriptor.
    Read(Payload<'a>),
    /// An outbound connect completed successfully.
    Completed,
    /// A listener produced a new connection; the payload is its binding.
    Accepted(Binding),
    /// Terminal event. Carries the OS errno that killed the descriptor,
    /// `ETIMEDOUT` for timeouts, `EPROTO` for TLS failures, or 0 for a
    /// clean shutdown. Delivered exactly once, at destruction.
    Unbound(i32),
    /// A watch-only connection selected readable.
    NotifyReadable,
    /// A watch-only connection selected writable.
    NotifyWritable,
    /// The descriptor this one was proxying into has been destroyed.
    ProxyTargetUnbound,
    /// A length-bounded proxy forwarded its final byte.
    ProxyCompleted,
    /// The TLS handshake on this connection completed. At most once.
    TlsHandshakeCompleted,
}

/// The callback channel registered by the reactor.
///
/// All methods run on the reactor thread, re-entered from inside
/// descriptor dispatch; implementations must not call back into the
/// registry.
pub trait EventSink {
    fn event(&mut self, from: Binding, event: Event<'_>);

    /// Adjudicates a peer certificate when peer verification was
    /// requested. `cert_der` is the end-entity certificate in DER form.
    /// Returning `false` aborts the connection before the handshake is
    /// signalled as complete. The default rejects, matching the
    /// verify-requested-but-unanswered posture.
    fn verify_peer(&mut self, _from: Binding, _cert_der: &[u8]) -> bool {
        false
    }
}
