//! # evio: eventable-descriptor core for reactor-style network I/O
//!
//! This crate is the descriptor layer of a single-threaded reactor: it
//! owns the lifecycle and I/O state machine of every kernel handle the
//! reactor polls, and nothing else. The event loop, poller backends,
//! timer wheel, and name resolution live outside and talk to this layer
//! through two seams:
//!
//! - [`Reactor`]: the services descriptors consume (poll-set membership,
//!   clocks, heartbeat scheduling, address resolution).
//! - [`EventSink`]: the single callback channel descriptors emit through
//!   (reads, connect completion, accepts, proxy milestones, the terminal
//!   unbind).
//!
//! ## Architecture
//!
//! ```text
//! evio/
//! ├── binding     - opaque generation-checked handles
//! ├── registry    - descriptor table, checkout dispatch, reap sweep
//! ├── descriptor  - the five kinds over one common core
//! │   ├── connection  - stream state machine (connect/read/write/pause)
//! │   ├── acceptor    - bounded nonblocking accept loop
//! │   ├── datagram    - message-oriented UDP with per-packet targets
//! │   ├── loopbreak   - self-pipe that wakes the loop
//! │   └── watch       - filesystem-events readable source
//! ├── tls         - ciphertext/plaintext pump (feature `tls`)
//! ├── sys         - RawIo syscall seam + OS implementation
//! └── event/error - callback vocabulary and error taxonomy
//! ```
//!
//! ## Design rules
//!
//! 1. **Strictly single-threaded.** Every method runs on the reactor
//!    thread; there are no locks and no suspension points. "Waiting" is
//!    returning to the reactor.
//! 2. **No blocking syscalls.** Transient errnos end the current tick;
//!    the next readiness event resumes the work.
//! 3. **Pure readiness predicates.** `select_for_read`/`select_for_write`
//!    are functions of visible state only; descriptors signal changes via
//!    `Reactor::modify` and never name a poller.
//! 4. **Bytes are conserved.** Outbound pages own their buffers; partial
//!    writes advance offsets; accounting always matches the queue.
//! 5. **One terminal event.** Each descriptor that wants one gets exactly
//!    one `Unbound`, carrying the OS reason code.

mod binding;
mod error;
mod event;
mod reactor;
mod registry;

pub mod descriptor;
pub mod sys;

#[cfg(feature = "tls")]
pub mod tls;

pub use binding::Binding;
pub use descriptor::{Ctx, Descriptor, Eventable};
pub use error::{Error, Result};
pub use event::{Event, EventSink, Payload};
pub use reactor::{AddrKind, Reactor};
pub use registry::Registry;
pub use sys::{OsIo, RawIo};

#[cfg(test)]
mod testing;
