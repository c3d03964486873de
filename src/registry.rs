//! The binding registry: owner of every descriptor, and the only way to
//! reach one.
//!
//! Handles are generation-checked slab keys; a stale binding fails to
//! resolve instead of aliasing a newer descriptor. Dispatch uses a
//! checkout: the target descriptor is taken out of its slot, handed a
//! context holding the rest of the registry, the reactor services, and
//! the event sink, and put back afterwards. Cross-descriptor work
//! (proxy forwarding, backpressure pause/resume) runs against the
//! remaining slots, which keeps the whole layer free of shared-ownership
//! cells while staying strictly single-threaded.

use crate::binding::Binding;
use crate::descriptor::{
    run_down, AcceptorDescriptor, ConnectionDescriptor, Ctx, DatagramDescriptor, Descriptor,
    LoopbreakDescriptor, WatchDescriptor,
};
use crate::event::EventSink;
use crate::reactor::Reactor;
use crate::sys::RawIo;
use crate::{Error, Result};
use slab::Slab;
use std::net::SocketAddr;
use std::time::Duration;

#[cfg(feature = "tls")]
use crate::tls::TlsParams;

struct Entry {
    serial: u32,
    // None while the descriptor is checked out for dispatch.
    slot: Option<Descriptor>,
}

/// Owns the descriptors of one reactor. Constructed with the reactor and
/// torn down with it, which is what keeps every access on the reactor
/// thread.
#[derive(Default)]
pub struct Registry {
    slots: Slab<Entry>,
    next_serial: u32,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every live binding, in slot order. The usual driver of the
    /// reactor's delete sweep.
    pub fn bindings(&self) -> Vec<Binding> {
        self.slots
            .iter()
            .map(|(index, entry)| Binding {
                index: index as u32,
                serial: entry.serial,
            })
            .collect()
    }

    pub fn contains(&self, binding: Binding) -> bool {
        self.slot(binding).is_some()
    }

    // -----------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------

    /// Registers a listening socket.
    pub fn add_acceptor(
        &mut self,
        io: Box<dyn RawIo>,
        reactor: &mut dyn Reactor,
    ) -> Result<Binding> {
        ensure_open(io.as_ref())?;
        let now = reactor.current_loop_time();
        let binding = self.insert(|b| Descriptor::Acceptor(AcceptorDescriptor::new(io, b, now)));
        reactor.add(binding);
        tracing::debug!(binding = %binding, "acceptor registered");
        Ok(binding)
    }

    /// Registers a stream socket. `connect_pending` marks an outbound
    /// socket whose nonblocking connect is still in flight; its
    /// disposition arrives as the first writable event.
    pub fn add_connection(
        &mut self,
        io: Box<dyn RawIo>,
        connect_pending: bool,
        reactor: &mut dyn Reactor,
    ) -> Result<Binding> {
        ensure_open(io.as_ref())?;
        let now = reactor.current_loop_time();
        let binding =
            self.insert(|b| Descriptor::Connection(ConnectionDescriptor::new(io, b, now)));
        reactor.add(binding);
        if connect_pending {
            if let Some(Descriptor::Connection(conn)) = self.slot_mut(binding) {
                conn.set_connect_pending(true, reactor);
            }
        }
        tracing::debug!(binding = %binding, connect_pending, "connection registered");
        Ok(binding)
    }

    /// Adopts a handle owned by someone else. The descriptor will never
    /// close it. With `watch_mode` the connection only reports
    /// readiness and owns no byte stream.
    pub fn attach(
        &mut self,
        io: Box<dyn RawIo>,
        watch_mode: bool,
        reactor: &mut dyn Reactor,
    ) -> Result<Binding> {
        ensure_open(io.as_ref())?;
        let now = reactor.current_loop_time();
        let binding =
            self.insert(|b| Descriptor::Connection(ConnectionDescriptor::new(io, b, now)));
        {
            let core = self.slot_mut(binding).expect("just inserted").core_mut();
            core.attached = true;
            core.watch_only = watch_mode;
        }
        reactor.add(binding);
        Ok(binding)
    }

    /// Registers a datagram socket. Broadcasting is enabled up front so
    /// sends to broadcast addresses do not fail with EACCES.
    pub fn add_datagram(
        &mut self,
        mut io: Box<dyn RawIo>,
        reactor: &mut dyn Reactor,
    ) -> Result<Binding> {
        ensure_open(io.as_ref())?;
        let _ = io.set_broadcast(true);
        let now = reactor.current_loop_time();
        let binding = self.insert(|b| Descriptor::Datagram(DatagramDescriptor::new(io, b, now)));
        reactor.add(binding);
        Ok(binding)
    }

    /// Registers the read end of the reactor's self-pipe.
    pub fn add_loopbreak(
        &mut self,
        io: Box<dyn RawIo>,
        reactor: &mut dyn Reactor,
    ) -> Result<Binding> {
        ensure_open(io.as_ref())?;
        let now = reactor.current_loop_time();
        let binding =
            self.insert(|b| Descriptor::Loopbreak(LoopbreakDescriptor::new(io, b, now)));
        reactor.add(binding);
        Ok(binding)
    }

    /// Creates and registers the kernel filesystem-events descriptor.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn add_watch(&mut self, reactor: &mut dyn Reactor) -> Result<Binding> {
        let io = Box::new(crate::sys::watch_fd()?);
        self.adopt_watch(io, reactor)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn add_watch(&mut self, _reactor: &mut dyn Reactor) -> Result<Binding> {
        Err(Error::WatchUnsupported)
    }

    /// Registers a caller-supplied filesystem-events handle (for
    /// reactors with their own kqueue-style source).
    pub fn adopt_watch(
        &mut self,
        io: Box<dyn RawIo>,
        reactor: &mut dyn Reactor,
    ) -> Result<Binding> {
        ensure_open(io.as_ref())?;
        let now = reactor.current_loop_time();
        let binding = self.insert(|b| Descriptor::Watch(WatchDescriptor::new(io, b, now)));
        reactor.add(binding);
        Ok(binding)
    }

    /// Registers a freshly accepted socket in server mode. Called from
    /// inside the acceptor's readable dispatch.
    pub(crate) fn adopt_accepted(
        &mut self,
        io: Box<dyn RawIo>,
        reactor: &mut dyn Reactor,
    ) -> Binding {
        let now = reactor.current_loop_time();
        let binding =
            self.insert(|b| Descriptor::Connection(ConnectionDescriptor::new(io, b, now)));
        if let Some(Descriptor::Connection(conn)) = self.slot_mut(binding) {
            conn.set_server_mode();
        }
        reactor.add(binding);
        binding
    }

    // -----------------------------------------------------------------
    // Readiness dispatch (reactor-facing)
    // -----------------------------------------------------------------

    pub fn on_readable(
        &mut self,
        binding: Binding,
        reactor: &mut dyn Reactor,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.dispatch(binding, reactor, sink, |slot, ctx| {
            slot.eventable_mut().on_readable(ctx)
        })
    }

    pub fn on_writable(
        &mut self,
        binding: Binding,
        reactor: &mut dyn Reactor,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.dispatch(binding, reactor, sink, |slot, ctx| {
            slot.eventable_mut().on_writable(ctx)
        })
    }

    /// Poller-reported error/hangup condition.
    pub fn on_error(
        &mut self,
        binding: Binding,
        reactor: &mut dyn Reactor,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.dispatch(binding, reactor, sink, |slot, ctx| {
            slot.eventable_mut().on_error(ctx)
        })
    }

    /// Coarse timer tick enforcing this descriptor's timeouts.
    pub fn heartbeat(
        &mut self,
        binding: Binding,
        reactor: &mut dyn Reactor,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.dispatch(binding, reactor, sink, |slot, ctx| {
            slot.eventable_mut().heartbeat(ctx)
        })
    }

    /// Pure readiness predicate; the reactor queries it after `modify`.
    pub fn select_for_read(&self, binding: Binding) -> Result<bool> {
        Ok(self.slot_checked(binding)?.eventable().select_for_read())
    }

    pub fn select_for_write(&self, binding: Binding) -> Result<bool> {
        Ok(self.slot_checked(binding)?.eventable().select_for_write())
    }

    /// Whether the reactor's sweep should destroy this descriptor. Once
    /// true it stays true.
    pub fn should_delete(&self, binding: Binding) -> Result<bool> {
        Ok(self.slot_checked(binding)?.eventable().should_delete())
    }

    /// Recomputes the descriptor's next heartbeat deadline (loop time,
    /// 0 for none), clearing any previously scheduled one.
    pub fn next_heartbeat(&mut self, binding: Binding, reactor: &mut dyn Reactor) -> Result<u64> {
        let slot = self.slot_mut_checked(binding)?;
        let connect_pending = slot.is_connect_pending();
        Ok(slot.core_mut().next_heartbeat_time(connect_pending, reactor))
    }

    /// Destroys one descriptor: clears its heartbeat, delivers the
    /// terminal event unless suppressed, notifies and unhooks proxy
    /// partners, decrements the reactor's pending-closure count, and
    /// closes the handle.
    pub fn reap(
        &mut self,
        binding: Binding,
        reactor: &mut dyn Reactor,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        let index = binding.index as usize;
        match self.slots.get(index) {
            Some(entry) if entry.serial == binding.serial && entry.slot.is_some() => {}
            _ => return Err(Error::DeadBinding(binding)),
        }
        let entry = self.slots.remove(index);
        let descriptor = entry.slot.expect("checked above");
        tracing::debug!(binding = %binding, kind = descriptor.kind_name(), "reaping descriptor");
        run_down(descriptor, self, reactor, sink);
        Ok(())
    }

    /// Sweeps every descriptor whose `should_delete` is true. Returns
    /// how many were destroyed.
    pub fn reap_pending(&mut self, reactor: &mut dyn Reactor, sink: &mut dyn EventSink) -> usize {
        let mut reaped = 0;
        loop {
            let doomed: Vec<Binding> = self
                .bindings()
                .into_iter()
                .filter(|b| self.should_delete(*b).unwrap_or(false))
                .collect();
            if doomed.is_empty() {
                return reaped;
            }
            for binding in doomed {
                // Reaping one descriptor can doom its proxy partner, so
                // re-scan until quiescent; a binding may already be gone.
                if self.reap(binding, reactor, sink).is_ok() {
                    reaped += 1;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Data plane (user-facing, by binding)
    // -----------------------------------------------------------------

    /// Queues outbound bytes on a stream or datagram descriptor.
    /// Returns bytes accepted (stream: possibly fewer under TLS
    /// backpressure; datagram: the packet length).
    pub fn send_data(
        &mut self,
        binding: Binding,
        data: &[u8],
        reactor: &mut dyn Reactor,
    ) -> Result<usize> {
        let sent = self
            .slot_mut_checked(binding)?
            .send_outbound_data(data, reactor)?;

        // A direct send into a proxied-to target counts against its
        // backpressure limit exactly like forwarded bytes do.
        let feeder_to_pause = {
            let core = self.slot_checked(binding)?.core();
            match core.proxied_from {
                Some(feeder)
                    if core.max_outbound_buf_size > 0
                        && core.outbound.data_size() > core.max_outbound_buf_size as u64 =>
                {
                    Some(feeder)
                }
                _ => None,
            }
        };
        if let Some(feeder) = feeder_to_pause {
            if let Some(slot) = self.slot_mut(feeder) {
                slot.pause_for_backpressure(reactor);
            }
        }
        Ok(sent)
    }

    /// Queues one datagram to an explicit destination, resolved through
    /// the reactor.
    pub fn send_datagram(
        &mut self,
        binding: Binding,
        data: &[u8],
        host: &str,
        port: u16,
        reactor: &mut dyn Reactor,
    ) -> Result<usize> {
        self.datagram_mut(binding)?
            .send_outbound_datagram(data, host, port, reactor)
    }

    /// Suppresses readiness interest on a connection. Returns whether
    /// the state changed.
    pub fn pause(&mut self, binding: Binding, reactor: &mut dyn Reactor) -> Result<bool> {
        self.connection_mut(binding)?.pause(reactor)
    }

    pub fn resume(&mut self, binding: Binding, reactor: &mut dyn Reactor) -> Result<bool> {
        self.connection_mut(binding)?.resume(reactor)
    }

    pub fn is_paused(&self, binding: Binding) -> Result<bool> {
        match self.slot_checked(binding)? {
            Descriptor::Connection(conn) => Ok(conn.is_paused()),
            _ => Err(Error::WrongKind { binding, expected: "connection" }),
        }
    }

    /// Schedules the descriptor for destruction at the next sweep.
    pub fn schedule_close(
        &mut self,
        binding: Binding,
        after_writing: bool,
        reactor: &mut dyn Reactor,
    ) -> Result<()> {
        match self.slot_mut_checked(binding)? {
            Descriptor::Connection(conn) => conn.schedule_close(after_writing, reactor),
            other => {
                other.core_mut().schedule_close(after_writing, reactor);
                Ok(())
            }
        }
    }

    /// Closes a listener by handle. Closing a nonexistent acceptor is a
    /// caller error.
    pub fn stop_acceptor(&mut self, binding: Binding, reactor: &mut dyn Reactor) -> Result<()> {
        match self.slot_mut_checked(binding)? {
            Descriptor::Acceptor(acceptor) => {
                acceptor.core.schedule_close(false, reactor);
                Ok(())
            }
            _ => Err(Error::WrongKind { binding, expected: "acceptor" }),
        }
    }

    /// Binds `from`'s inbound stream to `to`'s outbound queue. With
    /// `length > 0` exactly that many bytes are forwarded before the
    /// proxy completes and subsequent bytes flow to the read callback.
    /// `bufsize > 0` enables backpressure: the source is paused while the
    /// target's queue holds more than `bufsize` bytes.
    pub fn start_proxy(
        &mut self,
        from: Binding,
        to: Binding,
        bufsize: usize,
        length: u64,
    ) -> Result<()> {
        if !self.contains(to) {
            return Err(Error::DeadBinding(to));
        }
        if from == to {
            return Err(Error::BusyProxyTarget(to));
        }

        // Drop any previous link of the source.
        let old_target = {
            let slot = self.slot_mut_checked(from)?;
            slot.core_mut().proxy_target.take()
        };
        if let Some(old) = old_target {
            if let Some(slot) = self.slot_mut(old) {
                let core = slot.core_mut();
                core.proxied_from = None;
                core.max_outbound_buf_size = 0;
            }
        }

        {
            let target = self.slot_mut_checked(to)?;
            if target.core().proxied_from.is_some() {
                return Err(Error::BusyProxyTarget(to));
            }
            let core = target.core_mut();
            core.proxied_from = Some(from);
            core.max_outbound_buf_size = bufsize;
        }
        {
            let source = self.slot_mut_checked(from)?;
            let core = source.core_mut();
            core.proxy_target = Some(to);
            core.bytes_to_proxy = length;
            core.proxied_bytes = 0;
        }
        tracing::debug!(%from, %to, bufsize, length, "proxy started");
        Ok(())
    }

    /// Unhooks `from`'s proxy link, if any. Returns whether one existed.
    pub fn stop_proxy(&mut self, from: Binding) -> Result<bool> {
        let old_target = {
            let slot = self.slot_mut_checked(from)?;
            slot.core_mut().proxy_target.take()
        };
        match old_target {
            Some(target) => {
                if let Some(slot) = self.slot_mut(target) {
                    let core = slot.core_mut();
                    core.proxied_from = None;
                    core.max_outbound_buf_size = 0;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Bytes forwarded so far by `from`'s proxy link.
    pub fn proxied_bytes(&self, binding: Binding) -> Result<u64> {
        Ok(self.slot_checked(binding)?.core().proxied_bytes)
    }

    pub fn set_notify_readable(
        &mut self,
        binding: Binding,
        on: bool,
        reactor: &mut dyn Reactor,
    ) -> Result<()> {
        self.connection_mut(binding)?.set_notify_readable(on, reactor)
    }

    pub fn set_notify_writable(
        &mut self,
        binding: Binding,
        on: bool,
        reactor: &mut dyn Reactor,
    ) -> Result<()> {
        self.connection_mut(binding)?.set_notify_writable(on, reactor)
    }

    pub fn enable_keepalive(
        &mut self,
        binding: Binding,
        idle: i32,
        intvl: i32,
        cnt: i32,
    ) -> Result<()> {
        self.connection_mut(binding)?.enable_keepalive(idle, intvl, cnt)
    }

    pub fn disable_keepalive(&mut self, binding: Binding) -> Result<()> {
        self.connection_mut(binding)?.disable_keepalive()
    }

    /// The remote address: the connected peer for streams, the
    /// last-seen sender for datagrams.
    pub fn peername(&mut self, binding: Binding) -> Result<Option<SocketAddr>> {
        match self.slot_mut_checked(binding)? {
            Descriptor::Connection(conn) => conn.peername().map(Some),
            Descriptor::Datagram(dgram) => Ok(dgram.return_address()),
            _ => Err(Error::WrongKind { binding, expected: "connection or datagram" }),
        }
    }

    pub fn sockname(&mut self, binding: Binding) -> Result<SocketAddr> {
        match self.slot_mut_checked(binding)? {
            Descriptor::Connection(conn) => conn.sockname(),
            Descriptor::Acceptor(acceptor) => acceptor.sockname(),
            Descriptor::Datagram(dgram) => dgram.core.io.sockname().map_err(Error::Io),
            _ => Err(Error::WrongKind { binding, expected: "connection, acceptor, or datagram" }),
        }
    }

    /// The OS handle backing this descriptor (for poller registration),
    /// or -1 once it has been closed.
    pub fn raw_fd(&self, binding: Binding) -> Result<std::os::fd::RawFd> {
        Ok(self.slot_checked(binding)?.core().io.raw_fd())
    }

    /// Reads and clears the pending socket error.
    pub fn socket_error(&mut self, binding: Binding) -> Result<Option<std::io::Error>> {
        self.connection_mut(binding)?.socket_error()
    }

    pub fn outbound_data_size(&self, binding: Binding) -> Result<u64> {
        Ok(self.slot_checked(binding)?.core().outbound.data_size())
    }

    // -----------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------

    /// Sets the inactivity timeout (zero disables) and requeues the
    /// heartbeat.
    pub fn set_inactivity_timeout(
        &mut self,
        binding: Binding,
        value: Duration,
        reactor: &mut dyn Reactor,
    ) -> Result<()> {
        match self.slot_mut_checked(binding)? {
            Descriptor::Connection(_) | Descriptor::Datagram(_) => {}
            _ => return Err(Error::WrongKind { binding, expected: "connection or datagram" }),
        }
        self.slot_mut_checked(binding)?.core_mut().inactivity_timeout =
            value.as_micros() as u64;
        reactor.queue_heartbeat(binding);
        Ok(())
    }

    pub fn inactivity_timeout(&self, binding: Binding) -> Result<Duration> {
        Ok(Duration::from_micros(
            self.slot_checked(binding)?.core().inactivity_timeout,
        ))
    }

    /// Sets the pending-connect timeout. Zero is refused (a connect must
    /// not wait forever); returns whether the value was applied.
    pub fn set_pending_connect_timeout(
        &mut self,
        binding: Binding,
        value: Duration,
        reactor: &mut dyn Reactor,
    ) -> Result<bool> {
        self.connection_mut(binding)?;
        if value.is_zero() {
            return Ok(false);
        }
        self.slot_mut_checked(binding)?.core_mut().pending_connect_timeout =
            value.as_micros() as u64;
        reactor.queue_heartbeat(binding);
        Ok(true)
    }

    pub fn pending_connect_timeout(&self, binding: Binding) -> Result<Duration> {
        Ok(Duration::from_micros(
            self.slot_checked(binding)?.core().pending_connect_timeout,
        ))
    }

    // -----------------------------------------------------------------
    // TLS
    // -----------------------------------------------------------------

    #[cfg(feature = "tls")]
    pub fn set_tls_parms(&mut self, binding: Binding, params: TlsParams) -> Result<()> {
        self.connection_mut(binding)?.set_tls_parms(params)
    }

    #[cfg(not(feature = "tls"))]
    pub fn set_tls_parms(&mut self, _binding: Binding, _params: ()) -> Result<()> {
        Err(Error::TlsUnavailable)
    }

    /// Overlays TLS on the connection, in the mode matching how it was
    /// born (server for accepted sockets, client otherwise).
    pub fn start_tls(&mut self, binding: Binding, reactor: &mut dyn Reactor) -> Result<()> {
        self.connection_mut(binding)?.start_tls(reactor)
    }

    #[cfg(feature = "tls")]
    pub fn peer_cert_der(&self, binding: Binding) -> Result<Option<Vec<u8>>> {
        self.connection_ref(binding)?.peer_cert_der()
    }

    #[cfg(feature = "tls")]
    pub fn cipher_name(&self, binding: Binding) -> Result<Option<String>> {
        self.connection_ref(binding)?.cipher_name()
    }

    #[cfg(feature = "tls")]
    pub fn cipher_bits(&self, binding: Binding) -> Result<Option<u32>> {
        self.connection_ref(binding)?.cipher_bits()
    }

    #[cfg(feature = "tls")]
    pub fn cipher_protocol(&self, binding: Binding) -> Result<Option<String>> {
        self.connection_ref(binding)?.cipher_protocol()
    }

    #[cfg(feature = "tls")]
    pub fn sni_hostname(&self, binding: Binding) -> Result<Option<String>> {
        self.connection_ref(binding)?.sni_hostname()
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn insert(&mut self, build: impl FnOnce(Binding) -> Descriptor) -> Binding {
        let entry = self.slots.vacant_entry();
        let index = entry.key() as u32;
        self.next_serial = self.next_serial.wrapping_add(1);
        let binding = Binding { index, serial: self.next_serial };
        entry.insert(Entry {
            serial: binding.serial,
            slot: Some(build(binding)),
        });
        binding
    }

    fn dispatch(
        &mut self,
        binding: Binding,
        reactor: &mut dyn Reactor,
        sink: &mut dyn EventSink,
        run: impl FnOnce(&mut Descriptor, &mut Ctx<'_>),
    ) -> Result<()> {
        let mut slot = self.checkout(binding)?;
        {
            let mut ctx = Ctx { reactor, sink, registry: self };
            run(&mut slot, &mut ctx);
        }
        self.put_back(binding, slot);
        Ok(())
    }

    fn checkout(&mut self, binding: Binding) -> Result<Descriptor> {
        let entry = self
            .slots
            .get_mut(binding.index as usize)
            .ok_or(Error::DeadBinding(binding))?;
        if entry.serial != binding.serial {
            return Err(Error::DeadBinding(binding));
        }
        entry.slot.take().ok_or(Error::DeadBinding(binding))
    }

    fn put_back(&mut self, binding: Binding, slot: Descriptor) {
        if let Some(entry) = self.slots.get_mut(binding.index as usize) {
            if entry.serial == binding.serial {
                entry.slot = Some(slot);
            }
        }
    }

    pub(crate) fn slot(&self, binding: Binding) -> Option<&Descriptor> {
        self.slots
            .get(binding.index as usize)
            .filter(|entry| entry.serial == binding.serial)
            .and_then(|entry| entry.slot.as_ref())
    }

    pub(crate) fn slot_mut(&mut self, binding: Binding) -> Option<&mut Descriptor> {
        self.slots
            .get_mut(binding.index as usize)
            .filter(|entry| entry.serial == binding.serial)
            .and_then(|entry| entry.slot.as_mut())
    }

    fn slot_checked(&self, binding: Binding) -> Result<&Descriptor> {
        self.slot(binding).ok_or(Error::DeadBinding(binding))
    }

    fn slot_mut_checked(&mut self, binding: Binding) -> Result<&mut Descriptor> {
        self.slot_mut(binding).ok_or(Error::DeadBinding(binding))
    }

    fn connection_mut(&mut self, binding: Binding) -> Result<&mut ConnectionDescriptor> {
        match self.slot_mut_checked(binding)? {
            Descriptor::Connection(conn) => Ok(conn),
            _ => Err(Error::WrongKind { binding, expected: "connection" }),
        }
    }

    #[cfg(feature = "tls")]
    fn connection_ref(&self, binding: Binding) -> Result<&ConnectionDescriptor> {
        match self.slot_checked(binding)? {
            Descriptor::Connection(conn) => Ok(conn),
            _ => Err(Error::WrongKind { binding, expected: "connection" }),
        }
    }

    fn datagram_mut(&mut self, binding: Binding) -> Result<&mut DatagramDescriptor> {
        match self.slot_mut_checked(binding)? {
            Descriptor::Datagram(dgram) => Ok(dgram),
            _ => Err(Error::WrongKind { binding, expected: "datagram" }),
        }
    }
}

fn ensure_open(io: &dyn RawIo) -> Result<()> {
    if io.is_open() {
        Ok(())
    } else {
        Err(Error::BadDescriptor)
    }
}
