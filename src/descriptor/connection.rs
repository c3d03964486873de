//! Stream connection descriptor.
//!
//! The workhorse of the layer: nonblocking connect promotion, bounded
//! read bursts with guard-byte dispatch, scatter-gather drains of the
//! outbound page queue, pause/resume, watch-only notification mode, and
//! the optional TLS overlay.

use crate::descriptor::{
    generic_inbound_dispatch, Ctx, DescriptorCore, Eventable, READ_BURST, READ_CHUNK,
    WRITEV_PAGES,
};
use crate::event::Event;
use crate::reactor::Reactor;
use crate::sys::{errno_of, is_transient, RawIo};
use crate::{Binding, Error, Result};
use smallvec::SmallVec;
use std::io::IoSlice;
use std::net::SocketAddr;

#[cfg(feature = "tls")]
use crate::tls::{Plaintext, TlsBridge, TlsParams, TLS_INPUT_CHUNK, TLS_PLAIN_CHUNK};

pub struct ConnectionDescriptor {
    pub(crate) core: DescriptorCore,
    connect_pending: bool,
    notify_readable: bool,
    notify_writable: bool,
    // One-shot guards: a closed socket may see one more readiness event
    // already queued in the poller, but never two.
    read_attempted_after_close: bool,
    write_attempted_after_close: bool,
    server_mode: bool,
    #[cfg(feature = "tls")]
    tls: Option<TlsBridge>,
    #[cfg(feature = "tls")]
    tls_params: TlsParams,
    #[cfg(feature = "tls")]
    handshake_signaled: bool,
}

impl ConnectionDescriptor {
    pub(crate) fn new(io: Box<dyn RawIo>, binding: Binding, now: u64) -> ConnectionDescriptor {
        ConnectionDescriptor {
            core: DescriptorCore::new(io, binding, now),
            connect_pending: false,
            notify_readable: false,
            notify_writable: false,
            read_attempted_after_close: false,
            write_attempted_after_close: false,
            server_mode: false,
            #[cfg(feature = "tls")]
            tls: None,
            #[cfg(feature = "tls")]
            tls_params: TlsParams::default(),
            #[cfg(feature = "tls")]
            handshake_signaled: false,
        }
    }

    pub(crate) fn set_server_mode(&mut self) {
        self.server_mode = true;
    }

    pub(crate) fn is_connect_pending(&self) -> bool {
        self.connect_pending
    }

    /// Enters or leaves the half-open connect state. While pending, the
    /// socket selects writable only; the disposition of the connect
    /// arrives as a writable event.
    pub(crate) fn set_connect_pending(&mut self, pending: bool, reactor: &mut dyn Reactor) {
        self.connect_pending = pending;
        reactor.queue_heartbeat(self.core.binding);
        if self.core.io.is_open() {
            reactor.modify(self.core.binding);
        }
    }

    /// Suppresses all readiness interest. Returns whether the state
    /// actually changed.
    pub(crate) fn pause(&mut self, reactor: &mut dyn Reactor) -> Result<bool> {
        if self.core.watch_only {
            return Err(Error::WatchOnly);
        }
        let was_paused = self.core.paused;
        self.core.paused = true;
        if self.core.io.is_open() {
            reactor.modify(self.core.binding);
        }
        Ok(!was_paused)
    }

    pub(crate) fn resume(&mut self, reactor: &mut dyn Reactor) -> Result<bool> {
        if self.core.watch_only {
            return Err(Error::WatchOnly);
        }
        let was_paused = self.core.paused;
        self.core.paused = false;
        if self.core.io.is_open() {
            reactor.modify(self.core.binding);
        }
        Ok(was_paused)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.core.paused
    }

    pub(crate) fn set_notify_readable(&mut self, on: bool, reactor: &mut dyn Reactor) -> Result<()> {
        if !self.core.watch_only {
            return Err(Error::NotWatchOnly);
        }
        self.notify_readable = on;
        if self.core.io.is_open() {
            reactor.modify(self.core.binding);
        }
        Ok(())
    }

    pub(crate) fn set_notify_writable(&mut self, on: bool, reactor: &mut dyn Reactor) -> Result<()> {
        if !self.core.watch_only {
            return Err(Error::NotWatchOnly);
        }
        self.notify_writable = on;
        if self.core.io.is_open() {
            reactor.modify(self.core.binding);
        }
        Ok(())
    }

    /// Watch-only descriptors report readiness but own no byte stream;
    /// they are detached by the reactor, never closed through here.
    pub(crate) fn schedule_close(&mut self, after_writing: bool, reactor: &mut dyn Reactor) -> Result<()> {
        if self.core.watch_only {
            return Err(Error::WatchOnly);
        }
        self.core.schedule_close(after_writing, reactor);
        Ok(())
    }

    /// Queues bytes for the peer. With TLS active the plaintext is fed
    /// through the bridge in bounded pieces, flushing ciphertext after
    /// each; the return value is the count of plaintext bytes accepted.
    pub(crate) fn send_outbound_data(&mut self, data: &[u8], reactor: &mut dyn Reactor) -> Result<usize> {
        if self.core.watch_only {
            return Err(Error::WatchOnly);
        }
        #[cfg(feature = "tls")]
        if self.tls.is_some() {
            return Ok(self.send_through_tls(data, reactor));
        }
        Ok(self.core.send_raw(data, reactor))
    }

    pub(crate) fn enable_keepalive(&mut self, idle: i32, intvl: i32, cnt: i32) -> Result<()> {
        self.core.io.enable_keepalive(idle, intvl, cnt).map_err(Error::Io)
    }

    pub(crate) fn disable_keepalive(&mut self) -> Result<()> {
        self.core.io.disable_keepalive().map_err(Error::Io)
    }

    pub(crate) fn peername(&self) -> Result<SocketAddr> {
        self.core.io.peername().map_err(Error::Io)
    }

    pub(crate) fn sockname(&self) -> Result<SocketAddr> {
        self.core.io.sockname().map_err(Error::Io)
    }

    /// Probes the pending socket error without touching descriptor state.
    pub(crate) fn socket_error(&mut self) -> Result<Option<std::io::Error>> {
        self.core.io.take_error().map_err(Error::Io)
    }

    fn dispatch_inbound_data(&mut self, data_with_guard: &[u8], ctx: &mut Ctx<'_>) {
        #[cfg(feature = "tls")]
        if self.tls.is_some() {
            self.dispatch_inbound_tls(data_with_guard, ctx);
            return;
        }
        let outcome = generic_inbound_dispatch(&mut self.core, data_with_guard, ctx);
        if outcome.backpressure {
            self.pause_quietly(ctx.reactor);
        }
    }

    fn pause_quietly(&mut self, reactor: &mut dyn Reactor) {
        if !self.core.paused {
            self.core.paused = true;
            if self.core.io.is_open() {
                reactor.modify(self.core.binding);
            }
        }
    }

    fn write_outbound_data(&mut self, ctx: &mut Ctx<'_>) {
        if !self.core.io.is_open() {
            debug_assert!(!self.write_attempted_after_close, "second writable after close");
            self.write_attempted_after_close = true;
            return;
        }
        self.core.last_activity = ctx.reactor.current_loop_time();

        let result = {
            let iovs: SmallVec<[IoSlice<'_>; WRITEV_PAGES]> = self
                .core
                .outbound
                .gather(WRITEV_PAGES)
                .map(IoSlice::new)
                .collect();
            // The reactor only selects writable when data is queued.
            debug_assert!(!iovs.is_empty(), "writable tick with empty outbound queue");
            if iovs.is_empty() {
                return;
            }
            self.core.io.writev(&iovs)
        };

        match result {
            Ok(n) => {
                self.core.outbound.consume(n);
                self.resume_feeder_if_drained(ctx);
                ctx.reactor.modify(self.core.binding);
            }
            Err(err) if is_transient(&err) => {
                // The kernel buffers filled between the poll and the
                // write. Queue intact; wait for the next writable.
            }
            Err(err) => {
                self.core.unbind_reason = errno_of(&err);
                self.core.hard_close(ctx.reactor);
            }
        }
    }

    fn resume_feeder_if_drained(&mut self, ctx: &mut Ctx<'_>) {
        let Some(feeder) = self.core.proxied_from else { return };
        if self.core.max_outbound_buf_size > 0
            && self.core.outbound.data_size() < self.core.max_outbound_buf_size as u64
        {
            if let Some(slot) = ctx.registry.slot_mut(feeder) {
                slot.resume_from_backpressure(ctx.reactor);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TLS overlay
// ---------------------------------------------------------------------------

#[cfg(feature = "tls")]
impl ConnectionDescriptor {
    /// Stores TLS parameters for a later `start_tls`. Rejected once the
    /// bridge exists.
    pub(crate) fn set_tls_parms(&mut self, params: TlsParams) -> Result<()> {
        if self.tls.is_some() {
            return Err(Error::TlsAfterStart);
        }
        self.tls_params = params;
        Ok(())
    }

    /// Creates the bridge in the mode matching this side of the
    /// connection and flushes any immediate handshake output (the client
    /// hello, for an outbound connection).
    pub(crate) fn start_tls(&mut self, reactor: &mut dyn Reactor) -> Result<()> {
        if self.tls.is_some() {
            return Err(Error::TlsAlreadyStarted);
        }
        let bridge = if self.server_mode {
            TlsBridge::server(&self.tls_params)?
        } else {
            TlsBridge::client(&self.tls_params)?
        };
        self.tls = Some(bridge);
        self.dispatch_ciphertext(reactor);
        Ok(())
    }

    fn bridge(&self) -> Result<&TlsBridge> {
        self.tls.as_ref().ok_or(Error::TlsNotActive)
    }

    pub(crate) fn peer_cert_der(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bridge()?.peer_cert_der())
    }

    pub(crate) fn cipher_name(&self) -> Result<Option<String>> {
        Ok(self.bridge()?.cipher_name())
    }

    pub(crate) fn cipher_bits(&self) -> Result<Option<u32>> {
        Ok(self.bridge()?.cipher_bits())
    }

    pub(crate) fn cipher_protocol(&self) -> Result<Option<String>> {
        Ok(self.bridge()?.cipher_protocol())
    }

    pub(crate) fn sni_hostname(&self) -> Result<Option<String>> {
        Ok(self.bridge()?.sni_hostname())
    }

    fn send_through_tls(&mut self, data: &[u8], reactor: &mut dyn Reactor) -> usize {
        if self.core.is_close_scheduled() {
            return 0;
        }
        let mut accepted = 0usize;
        for piece in data.chunks(TLS_INPUT_CHUNK) {
            let mut written = 0usize;
            while written < piece.len() {
                let n = {
                    let tls = self.tls.as_mut().expect("tls bridge");
                    match tls.put_plaintext(&piece[written..]) {
                        Ok(n) => n,
                        Err(err) => {
                            tracing::debug!(binding = %self.core.binding, %err, "tls send failed");
                            self.abort_tls(reactor);
                            return accepted;
                        }
                    }
                };
                self.dispatch_ciphertext(reactor);
                if n == 0 {
                    // Bridge stayed full even after a ciphertext drain.
                    return accepted;
                }
                written += n;
                accepted += n;
            }
        }
        accepted
    }

    fn dispatch_inbound_tls(&mut self, data_with_guard: &[u8], ctx: &mut Ctx<'_>) {
        let ciphertext = &data_with_guard[..data_with_guard.len() - 1];
        {
            let tls = self.tls.as_mut().expect("tls bridge");
            if let Err(err) = tls.put_ciphertext(ciphertext) {
                tracing::debug!(binding = %self.core.binding, %err, "tls input rejected");
                self.abort_tls(ctx.reactor);
                return;
            }
        }

        let mut chunk = [0u8; TLS_PLAIN_CHUNK];
        loop {
            let pulled = {
                let tls = self.tls.as_mut().expect("tls bridge");
                tls.get_plaintext(&mut chunk[..TLS_PLAIN_CHUNK - 1])
            };
            match pulled {
                Ok(Plaintext::Data(n)) => {
                    self.check_handshake_status(ctx);
                    if self.core.is_close_scheduled() {
                        return;
                    }
                    chunk[n] = 0;
                    let outcome =
                        generic_inbound_dispatch(&mut self.core, &chunk[..n + 1], ctx);
                    if outcome.backpressure {
                        self.pause_quietly(ctx.reactor);
                    }
                }
                Ok(Plaintext::WouldBlock) | Ok(Plaintext::Closed) => break,
                Err(err) => {
                    tracing::debug!(binding = %self.core.binding, %err, "tls fatal");
                    self.abort_tls(ctx.reactor);
                    return;
                }
            }
        }

        self.check_handshake_status(ctx);
        if !self.core.is_close_scheduled() {
            self.dispatch_ciphertext(ctx.reactor);
        }
    }

    /// Signals handshake completion exactly once, adjudicating the peer
    /// certificate first when verification was requested.
    fn check_handshake_status(&mut self, ctx: &mut Ctx<'_>) {
        let pending_cert = {
            let Some(tls) = self.tls.as_mut() else { return };
            if self.handshake_signaled || !tls.is_handshake_completed() {
                return;
            }
            tls.take_pending_verify()
        };
        if let Some(cert) = pending_cert {
            if !ctx.sink.verify_peer(self.core.binding, &cert) {
                self.abort_tls(ctx.reactor);
                return;
            }
        }
        self.handshake_signaled = true;
        ctx.sink.event(self.core.binding, Event::TlsHandshakeCompleted);
    }

    /// Drains handshake and record output from the bridge into the raw
    /// outbound queue, looping until the bridge reports no more progress.
    fn dispatch_ciphertext(&mut self, reactor: &mut dyn Reactor) {
        loop {
            let out = {
                let Some(tls) = self.tls.as_mut() else { return };
                if !tls.can_get_ciphertext() {
                    return;
                }
                tls.take_ciphertext()
            };
            if out.is_empty() {
                return;
            }
            self.core.send_raw(&out, reactor);
        }
    }

    fn abort_tls(&mut self, reactor: &mut dyn Reactor) {
        self.core.unbind_reason = libc::EPROTO;
        self.core.schedule_close(false, reactor);
    }
}

#[cfg(not(feature = "tls"))]
impl ConnectionDescriptor {
    pub(crate) fn start_tls(&mut self, _reactor: &mut dyn Reactor) -> Result<()> {
        Err(Error::TlsUnavailable)
    }
}

impl Eventable for ConnectionDescriptor {
    fn on_readable(&mut self, ctx: &mut Ctx<'_>) {
        if !self.core.io.is_open() {
            debug_assert!(!self.read_attempted_after_close, "second readable after close");
            self.read_attempted_after_close = true;
            return;
        }
        if self.core.watch_only {
            if self.notify_readable {
                ctx.sink.event(self.core.binding, Event::NotifyReadable);
            }
            return;
        }
        self.core.last_activity = ctx.reactor.current_loop_time();

        // Read repeatedly while data is flowing, but give the rest of the
        // reactor a turn. One byte short of the buffer so the guard NUL
        // always fits.
        let mut buf = [0u8; READ_CHUNK];
        let mut total = 0usize;
        let mut eof = false;

        for _ in 0..READ_BURST {
            match self.core.io.read(&mut buf[..READ_CHUNK - 1]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    total += n;
                    buf[n] = 0;
                    self.dispatch_inbound_data(&buf[..n + 1], ctx);
                    if self.core.paused {
                        break;
                    }
                }
                Err(err) if is_transient(&err) => break,
                Err(err) => {
                    self.core.unbind_reason = errno_of(&err);
                    self.core.hard_close(ctx.reactor);
                    break;
                }
            }
        }

        // A readable socket that yielded nothing means the peer shut
        // down gracefully.
        if (eof || total == 0) && self.core.io.is_open() {
            self.core.schedule_close(false, ctx.reactor);
        }
    }

    fn on_writable(&mut self, ctx: &mut Ctx<'_>) {
        if self.connect_pending {
            // The disposition of a nonblocking connect shows up as
            // writability; SO_ERROR tells which way it went.
            match self.core.io.take_error() {
                Ok(None) => {
                    ctx.sink.event(self.core.binding, Event::Completed);
                    self.set_connect_pending(false, ctx.reactor);
                }
                Ok(Some(err)) => {
                    self.core.unbind_reason = errno_of(&err);
                    self.core.schedule_close(false, ctx.reactor);
                }
                Err(_) => {
                    self.core.schedule_close(false, ctx.reactor);
                }
            }
            return;
        }

        if self.notify_writable {
            ctx.sink.event(self.core.binding, Event::NotifyWritable);
            if self.core.io.is_open() {
                ctx.reactor.modify(self.core.binding);
            }
            return;
        }

        debug_assert!(!self.core.watch_only);
        self.write_outbound_data(ctx);
    }

    fn on_error(&mut self, ctx: &mut Ctx<'_>) {
        if self.core.watch_only {
            // A hangup may arrive after the readable path already
            // detached the handle.
            if !self.core.io.is_open() {
                return;
            }
            // Some pollers collapse readable/writable into the error
            // condition; synthesise the notifications ourselves.
            if self.notify_readable {
                self.on_readable(ctx);
            }
            if self.notify_writable {
                self.on_writable(ctx);
            }
        } else {
            self.core.schedule_close(false, ctx.reactor);
        }
    }

    fn heartbeat(&mut self, ctx: &mut Ctx<'_>) {
        // TLS work can skew last-activity stamps by up to a quantum on
        // slow machines; pad the comparison so timeouts still fire.
        let skew = ctx.reactor.timer_quantum();
        let now = ctx.reactor.current_loop_time();

        if self.connect_pending {
            if now.saturating_sub(self.core.created_at) >= self.core.pending_connect_timeout {
                self.core.unbind_reason = libc::ETIMEDOUT;
                self.core.schedule_close(false, ctx.reactor);
            }
        } else if self.core.inactivity_timeout > 0
            && skew + now.saturating_sub(self.core.last_activity) >= self.core.inactivity_timeout
        {
            self.core.unbind_reason = libc::ETIMEDOUT;
            self.core.schedule_close(false, ctx.reactor);
        }
    }

    fn select_for_read(&self) -> bool {
        // No read interest until the connect disposition is known: on
        // some systems a connecting socket can spuriously select
        // readable before it selects writable.
        if self.core.paused {
            false
        } else if self.connect_pending {
            false
        } else if self.core.watch_only {
            self.notify_readable
        } else {
            true
        }
    }

    fn select_for_write(&self) -> bool {
        if self.core.paused {
            false
        } else if self.connect_pending {
            true
        } else if self.core.watch_only {
            self.notify_writable
        } else {
            self.core.outbound.data_size() > 0
        }
    }

    fn should_delete(&self) -> bool {
        self.core.should_delete()
    }
}
