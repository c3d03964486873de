//! Descriptor objects and their common lifecycle machinery.
//!
//! Every kernel handle the reactor polls is owned by exactly one
//! descriptor: a listener, a stream connection, a datagram socket, the
//! loopbreak self-pipe, or the filesystem-watch handle. The kinds share
//! [`DescriptorCore`] by composition and expose the reactor-facing
//! capability set through [`Eventable`]; the registry stores them in the
//! tagged [`Descriptor`] variant.
//!
//! ## Close scheduling
//!
//! There are three ways a descriptor ends. A hard close (fatal error)
//! tears the socket down immediately. `schedule_close(false)` marks the
//! descriptor for removal at the reactor's next sweep, abandoning any
//! outbound queue. `schedule_close(true)` stops accepting new writes and
//! converts to an immediate close once the queue drains. All three leave
//! `should_delete` true forever after.

mod acceptor;
mod connection;
mod datagram;
mod loopbreak;
mod page;
mod watch;

pub use acceptor::AcceptorDescriptor;
pub use connection::ConnectionDescriptor;
pub use datagram::DatagramDescriptor;
pub use loopbreak::LoopbreakDescriptor;
pub use watch::WatchDescriptor;

pub(crate) use page::{OutboundPage, OutboundQueue};

use crate::binding::Binding;
use crate::event::{Event, EventSink, Payload};
use crate::reactor::Reactor;
use crate::registry::Registry;
use crate::sys::RawIo;
use crate::{Error, Result};

/// Bytes per nonblocking read, minus one for the guard byte.
pub(crate) const READ_CHUNK: usize = 16 * 1024;
/// Reads per readable tick. Bounded so one busy socket cannot starve the
/// rest of the reactor.
pub(crate) const READ_BURST: usize = 10;
/// Scatter-gather segments per write.
pub(crate) const WRITEV_PAGES: usize = 16;
/// Packets per datagram writable tick.
pub(crate) const SEND_BURST: usize = 10;
/// Default pending-connect timeout, microseconds.
pub(crate) const PENDING_CONNECT_TIMEOUT: u64 = 20_000_000;

/// Dispatch context handed to a checked-out descriptor: the owning
/// reactor's services, the callback channel, and the registry (minus the
/// descriptor currently executing).
pub struct Ctx<'a> {
    pub reactor: &'a mut dyn Reactor,
    pub sink: &'a mut dyn EventSink,
    pub registry: &'a mut Registry,
}

/// The reactor-facing capability set of every descriptor.
///
/// `select_for_read` and `select_for_write` are pure functions of the
/// visible state: the reactor re-queries them whenever a descriptor calls
/// `Reactor::modify`.
pub trait Eventable {
    fn on_readable(&mut self, ctx: &mut Ctx<'_>);
    fn on_writable(&mut self, ctx: &mut Ctx<'_>);
    fn on_error(&mut self, ctx: &mut Ctx<'_>);
    fn heartbeat(&mut self, ctx: &mut Ctx<'_>);
    fn select_for_read(&self) -> bool;
    fn select_for_write(&self) -> bool;
    fn should_delete(&self) -> bool;
}

/// State shared by every descriptor kind.
pub(crate) struct DescriptorCore {
    pub(crate) io: Box<dyn RawIo>,
    pub(crate) binding: Binding,
    pub(crate) created_at: u64,
    pub(crate) last_activity: u64,
    pub(crate) close_now: bool,
    pub(crate) close_after_writing: bool,
    pub(crate) attached: bool,
    pub(crate) watch_only: bool,
    pub(crate) paused: bool,
    pub(crate) callback_unbind: bool,
    pub(crate) unbind_reason: i32,
    /// Microseconds; 0 disables.
    pub(crate) inactivity_timeout: u64,
    /// Microseconds.
    pub(crate) pending_connect_timeout: u64,
    /// Loop time of the scheduled heartbeat, 0 if none.
    pub(crate) next_heartbeat: u64,
    pub(crate) proxy_target: Option<Binding>,
    pub(crate) proxied_from: Option<Binding>,
    pub(crate) bytes_to_proxy: u64,
    pub(crate) proxied_bytes: u64,
    pub(crate) max_outbound_buf_size: usize,
    pub(crate) outbound: OutboundQueue,
}

impl DescriptorCore {
    pub(crate) fn new(io: Box<dyn RawIo>, binding: Binding, now: u64) -> DescriptorCore {
        DescriptorCore {
            io,
            binding,
            created_at: now,
            last_activity: now,
            close_now: false,
            close_after_writing: false,
            attached: false,
            watch_only: false,
            paused: false,
            callback_unbind: true,
            unbind_reason: 0,
            inactivity_timeout: 0,
            pending_connect_timeout: PENDING_CONNECT_TIMEOUT,
            next_heartbeat: 0,
            proxy_target: None,
            proxied_from: None,
            bytes_to_proxy: 0,
            proxied_bytes: 0,
            max_outbound_buf_size: 0,
            outbound: OutboundQueue::default(),
        }
    }

    pub(crate) fn is_close_scheduled(&self) -> bool {
        self.close_now || self.close_after_writing
    }

    /// Marks the descriptor for removal at the reactor's next sweep.
    /// `after_writing` lets the outbound queue drain first; a later
    /// immediate request upgrades it. Idempotent; the reactor-visible
    /// pending-closure counter is bumped once.
    pub(crate) fn schedule_close(&mut self, after_writing: bool, reactor: &mut dyn Reactor) {
        if self.is_close_scheduled() {
            if !after_writing {
                self.close_now = true;
            }
            return;
        }
        reactor.close_scheduled(1);
        if after_writing {
            self.close_after_writing = true;
        } else {
            self.close_now = true;
        }
    }

    pub(crate) fn should_delete(&self) -> bool {
        !self.io.is_open()
            || self.close_now
            || (self.close_after_writing && self.outbound.data_size() == 0)
    }

    /// Immediate teardown: deregister from the poller, half-close and
    /// close the socket, invalidate the handle. STD handles (0, 1, 2) and
    /// adopted handles are released, never closed. Idempotent.
    pub(crate) fn hard_close(&mut self, reactor: &mut dyn Reactor) {
        if !self.io.is_open() {
            return;
        }
        reactor.deregister(self.binding);
        let fd = self.io.raw_fd();
        if fd > 2 && !self.attached {
            self.io.shutdown_write();
            self.io.close();
        } else {
            self.io.release();
        }
        tracing::debug!(binding = %self.binding, reason = self.unbind_reason, "hard close");
    }

    /// Queues stream bytes for transmission. Returns bytes accepted:
    /// zero when a close is scheduled or the chunk is empty (zero-length
    /// writes carry no meaning on a stream).
    pub(crate) fn send_raw(&mut self, data: &[u8], reactor: &mut dyn Reactor) -> usize {
        if self.is_close_scheduled() || data.is_empty() {
            return 0;
        }
        self.outbound.push(OutboundPage::new(data, None));
        if self.io.is_open() {
            reactor.modify(self.binding);
        }
        data.len()
    }

    /// Computes and records the next heartbeat deadline: the sooner of
    /// the inactivity and pending-connect timeouts, measured from a fresh
    /// clock reading. Clears any previously scheduled deadline. Returns 0
    /// when no heartbeat is needed.
    pub(crate) fn next_heartbeat_time(
        &mut self,
        connect_pending: bool,
        reactor: &mut dyn Reactor,
    ) -> u64 {
        if self.next_heartbeat != 0 {
            reactor.clear_heartbeat(self.next_heartbeat, self.binding);
        }
        self.next_heartbeat = 0;
        if !self.should_delete() {
            let mut til_next = self.inactivity_timeout;
            if connect_pending
                && (til_next == 0 || self.pending_connect_timeout < til_next)
            {
                til_next = self.pending_connect_timeout;
            }
            if til_next == 0 {
                return 0;
            }
            self.next_heartbeat = til_next + reactor.real_time();
        }
        self.next_heartbeat
    }
}

/// Outcome of one inbound dispatch.
pub(crate) struct Dispatch {
    /// The proxy target's queue exceeded its limit; the source should
    /// pause until the target drains.
    pub(crate) backpressure: bool,
}

/// Routes one inbound chunk: into the proxy target when proxying is
/// active, otherwise to user code as a `Read` event.
///
/// A length-bounded proxy that reaches its limit mid-chunk splits at the
/// boundary: the head is forwarded, `ProxyCompleted` fires, and the tail
/// flows to the normal read callback.
pub(crate) fn generic_inbound_dispatch(
    core: &mut DescriptorCore,
    data_with_guard: &[u8],
    ctx: &mut Ctx<'_>,
) -> Dispatch {
    let len = data_with_guard.len() - 1;
    let mut outcome = Dispatch { backpressure: false };

    let Some(target) = core.proxy_target else {
        ctx.sink
            .event(core.binding, Event::Read(Payload::new(data_with_guard)));
        return outcome;
    };

    let fwd_len = if core.bytes_to_proxy > 0 {
        core.bytes_to_proxy.min(len as u64) as usize
    } else {
        len
    };

    let over_limit = match ctx.registry.slot_mut(target) {
        Some(slot) => {
            if let Err(err) = slot.send_outbound_data(&data_with_guard[..fwd_len], ctx.reactor) {
                tracing::warn!(
                    source = %core.binding, target = %target, %err,
                    "proxy target rejected forwarded bytes"
                );
            }
            let tc = slot.core();
            tc.max_outbound_buf_size > 0
                && tc.outbound.data_size() > tc.max_outbound_buf_size as u64
        }
        None => {
            // Reaping tears both link directions, so a dangling target is
            // a bookkeeping failure; give up on the stream.
            core.proxy_target = None;
            core.unbind_reason = libc::EPIPE;
            core.schedule_close(false, ctx.reactor);
            return outcome;
        }
    };

    core.proxied_bytes += fwd_len as u64;
    if core.bytes_to_proxy > 0 {
        core.bytes_to_proxy -= fwd_len as u64;
        if core.bytes_to_proxy == 0 {
            stop_proxy(core, ctx.registry);
            ctx.sink.event(core.binding, Event::ProxyCompleted);
            if fwd_len < len {
                ctx.sink.event(
                    core.binding,
                    Event::Read(Payload::new(&data_with_guard[fwd_len..])),
                );
            }
            return outcome;
        }
    }
    outcome.backpressure = over_limit;
    outcome
}

/// Unhooks this descriptor from its proxy target, clearing the target's
/// feeder slot.
pub(crate) fn stop_proxy(core: &mut DescriptorCore, registry: &mut Registry) {
    if let Some(target) = core.proxy_target.take() {
        if let Some(slot) = registry.slot_mut(target) {
            let tc = slot.core_mut();
            tc.proxied_from = None;
            tc.max_outbound_buf_size = 0;
        }
    }
}

/// The tagged variant the registry stores: one case per descriptor kind.
pub enum Descriptor {
    Connection(ConnectionDescriptor),
    Acceptor(AcceptorDescriptor),
    Datagram(DatagramDescriptor),
    Loopbreak(LoopbreakDescriptor),
    Watch(WatchDescriptor),
}

impl Descriptor {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Descriptor::Connection(_) => "connection",
            Descriptor::Acceptor(_) => "acceptor",
            Descriptor::Datagram(_) => "datagram",
            Descriptor::Loopbreak(_) => "loopbreak",
            Descriptor::Watch(_) => "watch",
        }
    }

    pub(crate) fn eventable_mut(&mut self) -> &mut dyn Eventable {
        match self {
            Descriptor::Connection(d) => d,
            Descriptor::Acceptor(d) => d,
            Descriptor::Datagram(d) => d,
            Descriptor::Loopbreak(d) => d,
            Descriptor::Watch(d) => d,
        }
    }

    pub(crate) fn eventable(&self) -> &dyn Eventable {
        match self {
            Descriptor::Connection(d) => d,
            Descriptor::Acceptor(d) => d,
            Descriptor::Datagram(d) => d,
            Descriptor::Loopbreak(d) => d,
            Descriptor::Watch(d) => d,
        }
    }

    pub(crate) fn core(&self) -> &DescriptorCore {
        match self {
            Descriptor::Connection(d) => &d.core,
            Descriptor::Acceptor(d) => &d.core,
            Descriptor::Datagram(d) => &d.core,
            Descriptor::Loopbreak(d) => &d.core,
            Descriptor::Watch(d) => &d.core,
        }
    }

    pub(crate) fn core_mut(&mut self) -> &mut DescriptorCore {
        match self {
            Descriptor::Connection(d) => &mut d.core,
            Descriptor::Acceptor(d) => &mut d.core,
            Descriptor::Datagram(d) => &mut d.core,
            Descriptor::Loopbreak(d) => &mut d.core,
            Descriptor::Watch(d) => &mut d.core,
        }
    }

    /// Enqueues outbound bytes on whichever kind this is. Stream
    /// connections append to the byte queue (through TLS when active);
    /// datagrams address the last-seen peer. The two utility kinds and
    /// the acceptor refuse.
    pub(crate) fn send_outbound_data(
        &mut self,
        data: &[u8],
        reactor: &mut dyn Reactor,
    ) -> Result<usize> {
        match self {
            Descriptor::Connection(d) => d.send_outbound_data(data, reactor),
            Descriptor::Datagram(d) => d.send_outbound_data(data, reactor),
            _ => Err(Error::WrongKind {
                binding: self.core().binding,
                expected: "connection or datagram",
            }),
        }
    }

    pub(crate) fn is_connect_pending(&self) -> bool {
        match self {
            Descriptor::Connection(d) => d.is_connect_pending(),
            _ => false,
        }
    }

    /// Backpressure pause. Only stream connections can stop reading;
    /// requests against other kinds are ignored, mirroring that datagram
    /// and utility descriptors always select readable.
    pub(crate) fn pause_for_backpressure(&mut self, reactor: &mut dyn Reactor) {
        if let Descriptor::Connection(d) = self {
            if !d.core.watch_only && !d.core.paused {
                d.core.paused = true;
                if d.core.io.is_open() {
                    reactor.modify(d.core.binding);
                }
            }
        }
    }

    /// Undo of [`Descriptor::pause_for_backpressure`] once the target's
    /// queue drains below its limit.
    pub(crate) fn resume_from_backpressure(&mut self, reactor: &mut dyn Reactor) {
        if let Descriptor::Connection(d) = self {
            if !d.core.watch_only && d.core.paused {
                d.core.paused = false;
                if d.core.io.is_open() {
                    reactor.modify(d.core.binding);
                }
            }
        }
    }
}

/// Destructor semantics, executed by the registry's reap: notify the
/// proxy feeder, tear down both proxy directions, deliver the terminal
/// event, and close the handle.
pub(crate) fn run_down(
    mut descriptor: Descriptor,
    registry: &mut Registry,
    reactor: &mut dyn Reactor,
    sink: &mut dyn EventSink,
) {
    let core = descriptor.core_mut();
    let binding = core.binding;

    if core.next_heartbeat != 0 {
        reactor.clear_heartbeat(core.next_heartbeat, binding);
        core.next_heartbeat = 0;
    }
    if core.callback_unbind {
        sink.event(binding, Event::Unbound(core.unbind_reason));
    }
    if let Some(feeder) = core.proxied_from.take() {
        sink.event(feeder, Event::ProxyTargetUnbound);
        if let Some(slot) = registry.slot_mut(feeder) {
            slot.core_mut().proxy_target = None;
        }
    }
    reactor.close_scheduled(-1);
    stop_proxy(descriptor.core_mut(), registry);
    let core = descriptor.core_mut();
    core.outbound.clear();
    core.hard_close(reactor);
}
