//! Scripted test doubles: a fake socket, a recording reactor, and a
//! recording event sink. Every descriptor state machine in the crate is
//! drivable with these, no kernel required.
//!
//! The fake socket keeps its state behind a cloneable [`ScriptHandle`],
//! so tests can keep feeding reads and inspecting writes after the boxed
//! socket has moved into the registry.

use crate::reactor::{AddrKind, Reactor};
use crate::sys::RawIo;
use crate::{Binding, Event, EventSink};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::rc::Rc;

pub(crate) fn addr(s: &str) -> SocketAddr {
    s.parse().expect("test address")
}

// ---------------------------------------------------------------------
// Scripted socket
// ---------------------------------------------------------------------

pub(crate) enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Errno(i32),
}

pub(crate) enum WriteStep {
    /// Accept at most this many bytes.
    Accept(usize),
    Errno(i32),
}

#[derive(Default)]
struct ScriptState {
    reads: VecDeque<ReadStep>,
    /// Empty script means "accept everything".
    writes: VecDeque<WriteStep>,
    written: Vec<u8>,
    dgram_in: VecDeque<(Vec<u8>, SocketAddr)>,
    sent: Vec<(Vec<u8>, SocketAddr)>,
    /// Per-send errno overrides; 0 or exhaustion means success.
    send_errnos: VecDeque<i32>,
    so_error: Option<i32>,
    accepts: VecDeque<Box<dyn RawIo>>,
    shutdowns: usize,
    closed: bool,
    released: bool,
}

/// Cloneable control surface over one scripted socket.
#[derive(Clone)]
pub(crate) struct ScriptHandle {
    fd: i32,
    state: Rc<RefCell<ScriptState>>,
}

impl Default for ScriptHandle {
    fn default() -> Self {
        ScriptHandle {
            fd: 100,
            state: Rc::new(RefCell::new(ScriptState::default())),
        }
    }
}

impl ScriptHandle {
    pub(crate) fn with_fd(fd: i32) -> ScriptHandle {
        let mut h = ScriptHandle::default();
        h.fd = fd;
        h
    }

    /// The socket half: box this into the registry.
    pub(crate) fn io(&self) -> Box<ScriptedIo> {
        Box::new(ScriptedIo { handle: self.clone() })
    }

    pub(crate) fn push_read(&self, step: ReadStep) {
        self.state.borrow_mut().reads.push_back(step);
    }

    pub(crate) fn push_write_step(&self, step: WriteStep) {
        self.state.borrow_mut().writes.push_back(step);
    }

    pub(crate) fn push_dgram(&self, data: &[u8], from: SocketAddr) {
        self.state.borrow_mut().dgram_in.push_back((data.to_vec(), from));
    }

    pub(crate) fn push_send_errno(&self, errno: i32) {
        self.state.borrow_mut().send_errnos.push_back(errno);
    }

    pub(crate) fn set_so_error(&self, errno: i32) {
        self.state.borrow_mut().so_error = Some(errno);
    }

    pub(crate) fn push_accept(&self, io: Box<dyn RawIo>) {
        self.state.borrow_mut().accepts.push_back(io);
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    /// Takes everything written so far (for shuttling tests).
    pub(crate) fn drain_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().written)
    }

    pub(crate) fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.state.borrow().sent.clone()
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.state.borrow().shutdowns
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub(crate) fn is_released(&self) -> bool {
        self.state.borrow().released
    }
}

pub(crate) struct ScriptedIo {
    handle: ScriptHandle,
}

impl RawIo for ScriptedIo {
    fn raw_fd(&self) -> i32 {
        let state = self.handle.state.borrow();
        if state.closed || state.released {
            -1
        } else {
            self.handle.fd
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.handle.state.borrow_mut();
        match state.reads.pop_front() {
            None => Err(io::Error::from_raw_os_error(libc::EAGAIN)),
            Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Errno(e)) => Err(io::Error::from_raw_os_error(e)),
            Some(ReadStep::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.reads.push_front(ReadStep::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut state = self.handle.state.borrow_mut();
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let cap = match state.writes.pop_front() {
            None => total,
            Some(WriteStep::Accept(k)) => k.min(total),
            Some(WriteStep::Errno(e)) => return Err(io::Error::from_raw_os_error(e)),
        };
        let mut left = cap;
        for buf in bufs {
            if left == 0 {
                break;
            }
            let take = buf.len().min(left);
            state.written.extend_from_slice(&buf[..take]);
            left -= take;
        }
        Ok(cap)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut state = self.handle.state.borrow_mut();
        match state.dgram_in.pop_front() {
            None => Err(io::Error::from_raw_os_error(libc::EAGAIN)),
            Some((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
        }
    }

    fn send_to(&mut self, buf: &[u8], dest: &SocketAddr) -> io::Result<usize> {
        let mut state = self.handle.state.borrow_mut();
        match state.send_errnos.pop_front() {
            Some(e) if e != 0 => Err(io::Error::from_raw_os_error(e)),
            _ => {
                state.sent.push((buf.to_vec(), *dest));
                Ok(buf.len())
            }
        }
    }

    fn accept(&mut self) -> io::Result<(Box<dyn RawIo>, SocketAddr)> {
        let mut state = self.handle.state.borrow_mut();
        match state.accepts.pop_front() {
            None => Err(io::Error::from_raw_os_error(libc::EAGAIN)),
            Some(io) => Ok((io, addr("127.0.0.1:4000"))),
        }
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        Ok(self
            .handle
            .state
            .borrow_mut()
            .so_error
            .take()
            .map(io::Error::from_raw_os_error))
    }

    fn shutdown_write(&mut self) {
        self.handle.state.borrow_mut().shutdowns += 1;
    }

    fn set_nodelay(&mut self, _on: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_broadcast(&mut self, _on: bool) -> io::Result<()> {
        Ok(())
    }

    fn enable_keepalive(&mut self, _idle: i32, _intvl: i32, _cnt: i32) -> io::Result<()> {
        Ok(())
    }

    fn disable_keepalive(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn peername(&self) -> io::Result<SocketAddr> {
        Ok(addr("127.0.0.1:4000"))
    }

    fn sockname(&self) -> io::Result<SocketAddr> {
        Ok(addr("127.0.0.1:4001"))
    }

    fn close(&mut self) {
        self.handle.state.borrow_mut().closed = true;
    }

    fn release(&mut self) {
        self.handle.state.borrow_mut().released = true;
    }
}

// ---------------------------------------------------------------------
// Recording reactor
// ---------------------------------------------------------------------

pub(crate) struct MockReactor {
    pub(crate) now: u64,
    pub(crate) real: u64,
    pub(crate) quantum: u64,
    pub(crate) accept_burst: u32,
    pub(crate) added: Vec<Binding>,
    pub(crate) modified: Vec<Binding>,
    pub(crate) deregistered: Vec<Binding>,
    pub(crate) heartbeats_queued: Vec<Binding>,
    pub(crate) heartbeats_cleared: Vec<(u64, Binding)>,
    pub(crate) close_scheduled: i32,
    pub(crate) loopbreak_reads: usize,
    pub(crate) watch_reads: usize,
}

impl Default for MockReactor {
    fn default() -> Self {
        MockReactor {
            now: 1_000_000,
            real: 1_000_000,
            quantum: 100_000,
            accept_burst: 10,
            added: Vec::new(),
            modified: Vec::new(),
            deregistered: Vec::new(),
            heartbeats_queued: Vec::new(),
            heartbeats_cleared: Vec::new(),
            close_scheduled: 0,
            loopbreak_reads: 0,
            watch_reads: 0,
        }
    }
}

impl Reactor for MockReactor {
    fn add(&mut self, binding: Binding) {
        self.added.push(binding);
    }

    fn modify(&mut self, binding: Binding) {
        self.modified.push(binding);
    }

    fn deregister(&mut self, binding: Binding) {
        self.deregistered.push(binding);
    }

    fn queue_heartbeat(&mut self, binding: Binding) {
        self.heartbeats_queued.push(binding);
    }

    fn clear_heartbeat(&mut self, at: u64, binding: Binding) {
        self.heartbeats_cleared.push((at, binding));
    }

    fn current_loop_time(&self) -> u64 {
        self.now
    }

    fn real_time(&self) -> u64 {
        self.real
    }

    fn timer_quantum(&self) -> u64 {
        self.quantum
    }

    fn simultaneous_accept_count(&self) -> u32 {
        self.accept_burst
    }

    fn name2address(&mut self, host: &str, port: u16, _kind: AddrKind) -> io::Result<SocketAddr> {
        host.parse::<std::net::IpAddr>()
            .map(|ip| SocketAddr::new(ip, port))
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "unresolvable test host"))
    }

    fn close_scheduled(&mut self, delta: i32) {
        self.close_scheduled += delta;
    }

    fn read_loop_breaker(&mut self) {
        self.loopbreak_reads += 1;
    }

    fn read_watch_events(&mut self) {
        self.watch_reads += 1;
    }
}

// ---------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SunkEvent {
    Read(Vec<u8>),
    Completed,
    Accepted(Binding),
    Unbound(i32),
    NotifyReadable,
    NotifyWritable,
    ProxyTargetUnbound,
    ProxyCompleted,
    TlsHandshakeCompleted,
}

pub(crate) struct RecordingSink {
    pub(crate) events: Vec<(Binding, SunkEvent)>,
    pub(crate) verify_answer: bool,
    pub(crate) verify_requests: Vec<(Binding, Vec<u8>)>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        RecordingSink {
            events: Vec::new(),
            verify_answer: true,
            verify_requests: Vec::new(),
        }
    }
}

impl RecordingSink {
    /// Concatenated read payloads delivered for one binding.
    pub(crate) fn read_bytes(&self, binding: Binding) -> Vec<u8> {
        let mut out = Vec::new();
        for (from, event) in &self.events {
            if *from == binding {
                if let SunkEvent::Read(data) = event {
                    out.extend_from_slice(data);
                }
            }
        }
        out
    }

    pub(crate) fn count(&self, binding: Binding, pred: impl Fn(&SunkEvent) -> bool) -> usize {
        self.events
            .iter()
            .filter(|(from, event)| *from == binding && pred(event))
            .count()
    }

    pub(crate) fn unbound_reason(&self, binding: Binding) -> Option<i32> {
        self.events.iter().find_map(|(from, event)| match event {
            SunkEvent::Unbound(reason) if *from == binding => Some(*reason),
            _ => None,
        })
    }
}

impl EventSink for RecordingSink {
    fn event(&mut self, from: Binding, event: Event<'_>) {
        let owned = match event {
            Event::Read(payload) => {
                // The guard-byte contract: one NUL past the payload.
                assert_eq!(
                    payload.with_guard()[payload.len()],
                    0,
                    "inbound dispatch buffer missing guard byte"
                );
                SunkEvent::Read(payload.bytes().to_vec())
            }
            Event::Completed => SunkEvent::Completed,
            Event::Accepted(conn) => SunkEvent::Accepted(conn),
            Event::Unbound(reason) => SunkEvent::Unbound(reason),
            Event::NotifyReadable => SunkEvent::NotifyReadable,
            Event::NotifyWritable => SunkEvent::NotifyWritable,
            Event::ProxyTargetUnbound => SunkEvent::ProxyTargetUnbound,
            Event::ProxyCompleted => SunkEvent::ProxyCompleted,
            Event::TlsHandshakeCompleted => SunkEvent::TlsHandshakeCompleted,
        };
        self.events.push((from, owned));
    }

    fn verify_peer(&mut self, from: Binding, cert_der: &[u8]) -> bool {
        self.verify_requests.push((from, cert_der.to_vec()));
        self.verify_answer
    }
}
