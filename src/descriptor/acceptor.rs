//! Listening socket descriptor.

use crate::descriptor::{Ctx, DescriptorCore, Eventable};
use crate::event::Event;
use crate::sys::RawIo;
use crate::Binding;

pub struct AcceptorDescriptor {
    pub(crate) core: DescriptorCore,
}

impl AcceptorDescriptor {
    pub(crate) fn new(io: Box<dyn RawIo>, binding: Binding, now: u64) -> AcceptorDescriptor {
        AcceptorDescriptor {
            core: DescriptorCore::new(io, binding, now),
        }
    }

    pub(crate) fn sockname(&self) -> crate::Result<std::net::SocketAddr> {
        self.core.io.sockname().map_err(crate::Error::Io)
    }
}

impl Eventable for AcceptorDescriptor {
    fn on_readable(&mut self, ctx: &mut Ctx<'_>) {
        // Take several sockets per tick so the kernel queue doesn't back
        // up, but never drain it unboundedly: an attacker opening
        // connections without sending data must not monopolise the loop.
        //
        // Per Stevens, an acceptor can select readable and then block in
        // accept (the peer reset between poll and accept), so the
        // listening socket itself must be nonblocking.
        let burst = ctx.reactor.simultaneous_accept_count();

        for _ in 0..burst {
            let (mut io, peer) = match self.core.io.accept() {
                Ok(accepted) => accepted,
                Err(_) => break,
            };

            // Flag the socket nonblocking and cloexec when accept could
            // not do so atomically. A socket we cannot configure is a
            // socket we cannot safely poll.
            if io.configure_accepted().is_err() {
                io.shutdown_write();
                io.close();
                continue;
            }

            // Disable Nagle; latency beats coalescing for reactor
            // workloads.
            let _ = io.set_nodelay(true);

            let conn = ctx.registry.adopt_accepted(io, ctx.reactor);
            tracing::debug!(listener = %self.core.binding, conn = %conn, %peer, "accepted");
            ctx.sink.event(self.core.binding, Event::Accepted(conn));
        }
    }

    fn on_writable(&mut self, _ctx: &mut Ctx<'_>) {
        tracing::error!(binding = %self.core.binding, "writable event on an acceptor");
        debug_assert!(false, "writable event on an acceptor");
    }

    fn on_error(&mut self, ctx: &mut Ctx<'_>) {
        self.core.schedule_close(false, ctx.reactor);
    }

    fn heartbeat(&mut self, _ctx: &mut Ctx<'_>) {}

    fn select_for_read(&self) -> bool {
        true
    }

    fn select_for_write(&self) -> bool {
        false
    }

    fn should_delete(&self) -> bool {
        self.core.should_delete()
    }
}
