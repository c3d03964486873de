//! Services the descriptor layer consumes from its owning reactor.
//!
//! The reactor — poller, timer wheel, name resolution, callback
//! trampoline — is an external collaborator. Descriptors only ever touch
//! it through this trait, and never name a poller backend: when a
//! readiness predicate may have changed they call [`Reactor::modify`] and
//! the reactor re-queries `select_for_read`/`select_for_write`.

use crate::binding::Binding;
use std::io;
use std::net::SocketAddr;

/// Socket type hint for address resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind {
    Stream,
    Datagram,
}

/// The reactor-facing service interface.
///
/// All times are microseconds of reactor loop time. `current_loop_time`
/// is the cached coarse clock updated once per tick; `real_time` is a
/// fresh reading used when scheduling future deadlines.
pub trait Reactor {
    /// A new descriptor was inserted into the registry and must join the
    /// poll set.
    fn add(&mut self, binding: Binding);

    /// The descriptor's readiness interest may have changed; re-query its
    /// select predicates.
    fn modify(&mut self, binding: Binding);

    /// Remove the descriptor from the poll set. Called from the hard
    /// close path, before the handle is closed.
    fn deregister(&mut self, binding: Binding);

    /// Ask the timer wheel to (re)compute this descriptor's next
    /// heartbeat via the registry's `next_heartbeat`.
    fn queue_heartbeat(&mut self, binding: Binding);

    /// Drop a previously scheduled heartbeat at loop time `at`.
    fn clear_heartbeat(&mut self, at: u64, binding: Binding);

    /// Cached coarse clock, microseconds.
    fn current_loop_time(&self) -> u64;

    /// Fresh clock, microseconds.
    fn real_time(&self) -> u64;

    /// The heartbeat quantum, microseconds. Used as slack when comparing
    /// nearly-equal times in timeout checks.
    fn timer_quantum(&self) -> u64;

    /// How many sockets an acceptor may take per readable tick.
    fn simultaneous_accept_count(&self) -> u32 {
        10
    }

    /// Resolve `host:port` for the given socket type.
    fn name2address(&mut self, host: &str, port: u16, kind: AddrKind) -> io::Result<SocketAddr>;

    /// Maintains the reactor-visible count of pending closures: +1 per
    /// close scheduled, -1 per descriptor destroyed.
    fn close_scheduled(&mut self, delta: i32);

    /// Re-entry hook: the loopbreak descriptor selected readable; drain
    /// the self-pipe and run the scheduled-work queue.
    fn read_loop_breaker(&mut self);

    /// Re-entry hook: the filesystem-watch descriptor selected readable.
    fn read_watch_events(&mut self);
}
