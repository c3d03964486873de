//! Connectionless datagram descriptor.
//!
//! Outbound data is message-structured: every page is one packet with
//! its own destination, sent whole or not at all. Zero-length datagrams
//! are legal in UDP, which is why write interest is driven by the page
//! count rather than the byte count.

use crate::descriptor::{
    generic_inbound_dispatch, Ctx, DescriptorCore, Eventable, OutboundPage, READ_BURST,
    READ_CHUNK, SEND_BURST,
};
use crate::reactor::{AddrKind, Reactor};
use crate::sys::{errno_of, is_transient, RawIo};
use crate::{Binding, Error, Result};
use std::net::SocketAddr;

pub struct DatagramDescriptor {
    pub(crate) core: DescriptorCore,
    // Last-seen sender; replies without an explicit address go here.
    return_address: Option<SocketAddr>,
}

impl DatagramDescriptor {
    pub(crate) fn new(io: Box<dyn RawIo>, binding: Binding, now: u64) -> DatagramDescriptor {
        DatagramDescriptor {
            core: DescriptorCore::new(io, binding, now),
            return_address: None,
        }
    }

    /// The address of the most recently received packet, if any. Lets
    /// callers "reply" from inside a read callback.
    pub(crate) fn return_address(&self) -> Option<SocketAddr> {
        self.return_address
    }

    /// Queues one packet to the last-seen peer. Returns bytes accepted;
    /// a zero-length payload is a legal packet and still queues a page.
    pub(crate) fn send_outbound_data(&mut self, data: &[u8], reactor: &mut dyn Reactor) -> Result<usize> {
        if self.core.is_close_scheduled() {
            return Ok(0);
        }
        let Some(dest) = self.return_address else {
            return Err(Error::Resolve {
                host: String::from("<no return address>"),
                port: 0,
            });
        };
        self.queue_packet(data, dest, reactor);
        Ok(data.len())
    }

    /// Queues one packet to an explicit destination, resolving the host
    /// through the reactor.
    pub(crate) fn send_outbound_datagram(
        &mut self,
        data: &[u8],
        host: &str,
        port: u16,
        reactor: &mut dyn Reactor,
    ) -> Result<usize> {
        if self.core.is_close_scheduled() {
            return Ok(0);
        }
        if host.is_empty() || port == 0 {
            return Ok(0);
        }
        let dest = reactor
            .name2address(host, port, AddrKind::Datagram)
            .map_err(|_| Error::Resolve {
                host: host.to_string(),
                port,
            })?;
        self.queue_packet(data, dest, reactor);
        Ok(data.len())
    }

    fn queue_packet(&mut self, data: &[u8], dest: SocketAddr, reactor: &mut dyn Reactor) {
        self.core.outbound.push(OutboundPage::new(data, Some(dest)));
        if self.core.io.is_open() {
            reactor.modify(self.core.binding);
        }
    }
}

impl Eventable for DatagramDescriptor {
    fn on_readable(&mut self, ctx: &mut Ctx<'_>) {
        if !self.core.io.is_open() {
            return;
        }
        self.core.last_activity = ctx.reactor.current_loop_time();

        // One byte short of the buffer so the guard NUL always fits.
        let mut buf = [0u8; READ_CHUNK];

        for _ in 0..READ_BURST {
            match self.core.io.recv_from(&mut buf[..READ_CHUNK - 1]) {
                // Zero-length datagrams are meaningful; dispatch them.
                Ok((n, from)) => {
                    buf[n] = 0;
                    self.return_address = Some(from);
                    generic_inbound_dispatch(&mut self.core, &buf[..n + 1], ctx);
                }
                // Anything else is a would-block equivalent: the queue
                // is drained for this tick.
                Err(_) => break,
            }
        }
    }

    fn on_writable(&mut self, ctx: &mut Ctx<'_>) {
        // The kernel may have used up its buffers between the poll and
        // this call, so a transient failure is not an error.
        if !self.core.io.is_open() {
            return;
        }
        self.core.last_activity = ctx.reactor.current_loop_time();

        for _ in 0..SEND_BURST {
            let Some(page) = self.core.outbound.front() else { break };
            let Some(&dest) = page.dest() else {
                // A destination-less page cannot exist on a datagram
                // queue; drop it rather than loop on it.
                debug_assert!(false, "datagram page without destination");
                self.core.outbound.pop_front();
                continue;
            };

            match self.core.io.send_to(page.chunk(), &dest) {
                Ok(_) => {
                    self.core.outbound.pop_front();
                }
                Err(err) if is_transient(&err) => {
                    // Packet stays queued for the next writable tick.
                    break;
                }
                Err(err) => {
                    self.core.unbind_reason = errno_of(&err);
                    self.core.hard_close(ctx.reactor);
                    return;
                }
            }
        }

        ctx.reactor.modify(self.core.binding);
    }

    fn on_error(&mut self, ctx: &mut Ctx<'_>) {
        self.core.schedule_close(false, ctx.reactor);
    }

    fn heartbeat(&mut self, ctx: &mut Ctx<'_>) {
        let skew = ctx.reactor.timer_quantum();
        let now = ctx.reactor.current_loop_time();
        if self.core.inactivity_timeout > 0
            && skew + now.saturating_sub(self.core.last_activity) >= self.core.inactivity_timeout
        {
            self.core.unbind_reason = libc::ETIMEDOUT;
            self.core.schedule_close(false, ctx.reactor);
        }
    }

    fn select_for_read(&self) -> bool {
        true
    }

    fn select_for_write(&self) -> bool {
        // Page count, not byte count: zero-length packets queue pages
        // that carry no bytes. Note the mismatch with `should_delete`,
        // which checks byte size: a pending zero-length packet keeps the
        // descriptor writable while an after-writing close already sees
        // an empty queue.
        self.core.outbound.page_count() > 0
    }

    fn should_delete(&self) -> bool {
        self.core.should_delete()
    }
}
