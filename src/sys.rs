//! Socket backend: the `RawIo` seam and its OS implementation.
//!
//! Descriptors never issue syscalls directly; they go through a
//! per-descriptor [`RawIo`] trait object. [`OsIo`] implements it over a
//! real file descriptor with nonblocking libc calls; tests drive the
//! state machines with scripted implementations instead of a kernel.

use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

/// Syscall surface of one descriptor.
///
/// Methods that do not apply to a given socket kind keep the provided
/// `Unsupported` default; only the lifecycle methods are mandatory.
pub trait RawIo {
    /// The underlying OS handle, or -1 once closed or released.
    fn raw_fd(&self) -> RawFd;

    fn is_open(&self) -> bool {
        self.raw_fd() >= 0
    }

    /// Nonblocking stream read.
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Nonblocking scatter-gather write. Returns bytes accepted.
    fn writev(&mut self, _bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Nonblocking datagram receive; returns the sender's address.
    fn recv_from(&mut self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Nonblocking datagram send to an explicit destination.
    fn send_to(&mut self, _buf: &[u8], _dest: &SocketAddr) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Nonblocking accept. The returned handle may still need
    /// [`RawIo::configure_accepted`].
    fn accept(&mut self) -> io::Result<(Box<dyn RawIo>, SocketAddr)> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Finish flagging a freshly accepted handle (nonblocking + cloexec)
    /// when the accept path could not do so atomically.
    fn configure_accepted(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Drain the pending socket error (`SO_ERROR`).
    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Half-close the write side. Best effort.
    fn shutdown_write(&mut self) {}

    fn set_nodelay(&mut self, _on: bool) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn set_broadcast(&mut self, _on: bool) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Turn on `SO_KEEPALIVE` and, where the platform exposes them, the
    /// idle/interval/count knobs. Zero means system default; negative
    /// skips the knob entirely.
    fn enable_keepalive(&mut self, _idle: i32, _intvl: i32, _cnt: i32) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn disable_keepalive(&mut self) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn peername(&self) -> io::Result<SocketAddr> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn sockname(&self) -> io::Result<SocketAddr> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Close the handle now. Idempotent.
    fn close(&mut self);

    /// Drop the handle without closing it (adopted and std handles).
    /// Idempotent.
    fn release(&mut self);
}

/// `RawIo` over a real file descriptor.
pub struct OsIo {
    fd: Option<OwnedFd>,
    // True when accept4 already applied NONBLOCK|CLOEXEC.
    preconfigured: bool,
}

impl OsIo {
    /// Wraps an owned descriptor, forcing nonblocking + cloexec.
    pub fn adopt(fd: OwnedFd) -> io::Result<OsIo> {
        set_nonblocking(fd.as_raw_fd())?;
        set_cloexec(fd.as_raw_fd())?;
        Ok(OsIo { fd: Some(fd), preconfigured: true })
    }

    /// Wraps an owned descriptor as-is. The caller is responsible for the
    /// nonblocking flag.
    pub fn from_owned(fd: OwnedFd) -> OsIo {
        OsIo { fd: Some(fd), preconfigured: true }
    }

    fn fd(&self) -> io::Result<RawFd> {
        match &self.fd {
            Some(fd) => Ok(fd.as_raw_fd()),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }
}

impl From<std::net::TcpStream> for OsIo {
    fn from(s: std::net::TcpStream) -> OsIo {
        OsIo::from_owned(s.into())
    }
}

impl From<std::net::TcpListener> for OsIo {
    fn from(s: std::net::TcpListener) -> OsIo {
        OsIo::from_owned(s.into())
    }
}

impl From<std::net::UdpSocket> for OsIo {
    fn from(s: std::net::UdpSocket) -> OsIo {
        OsIo::from_owned(s.into())
    }
}

impl RawIo for OsIo {
    fn raw_fd(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, |fd| fd.as_raw_fd())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.fd()?;
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let fd = self.fd()?;
        // IoSlice is ABI-compatible with iovec.
        let n = unsafe {
            libc::writev(
                fd,
                bufs.as_ptr() as *const libc::iovec,
                bufs.len().min(libc::c_int::MAX as usize) as libc::c_int,
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let fd = self.fd()?;
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let n = unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let peer = sockaddr_to_addr(&storage)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown address family"))?;
        Ok((n as usize, peer))
    }

    fn send_to(&mut self, buf: &[u8], dest: &SocketAddr) -> io::Result<usize> {
        let fd = self.fd()?;
        let addr = socket2::SockAddr::from(*dest);
        let n = unsafe {
            libc::sendto(
                fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                0,
                addr.as_ptr() as *const libc::sockaddr,
                addr.len(),
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn accept(&mut self) -> io::Result<(Box<dyn RawIo>, SocketAddr)> {
        let fd = self.fd()?;
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
        {
            let sd = unsafe {
                libc::accept4(
                    fd,
                    &mut storage as *mut _ as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                )
            };
            if sd >= 0 {
                let owned = unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(sd) };
                let peer = sockaddr_to_addr(&storage).unwrap_or_else(unspecified_addr);
                return Ok((
                    Box::new(OsIo { fd: Some(owned), preconfigured: true }),
                    peer,
                ));
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOSYS) {
                return Err(err);
            }
            // Ancient kernel: fall through to plain accept.
        }

        let sd = unsafe {
            libc::accept(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if sd < 0 {
            return Err(io::Error::last_os_error());
        }
        let owned = unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(sd) };
        let peer = sockaddr_to_addr(&storage).unwrap_or_else(unspecified_addr);
        Ok((
            Box::new(OsIo { fd: Some(owned), preconfigured: false }),
            peer,
        ))
    }

    fn configure_accepted(&mut self) -> io::Result<()> {
        if self.preconfigured {
            return Ok(());
        }
        let fd = self.fd()?;
        set_cloexec(fd)?;
        set_nonblocking(fd)?;
        self.preconfigured = true;
        Ok(())
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        let fd = self.fd()?;
        let mut err: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else if err == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(err)))
        }
    }

    fn shutdown_write(&mut self) {
        if let Ok(fd) = self.fd() {
            unsafe {
                libc::shutdown(fd, libc::SHUT_WR);
            }
        }
    }

    fn set_nodelay(&mut self, on: bool) -> io::Result<()> {
        setsockopt_int(self.fd()?, libc::IPPROTO_TCP, libc::TCP_NODELAY, on as libc::c_int)
    }

    fn set_broadcast(&mut self, on: bool) -> io::Result<()> {
        setsockopt_int(self.fd()?, libc::SOL_SOCKET, libc::SO_BROADCAST, on as libc::c_int)
    }

    fn enable_keepalive(&mut self, idle: i32, intvl: i32, cnt: i32) -> io::Result<()> {
        let fd = self.fd()?;
        setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;

        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            // Zero passes through: the system substitutes its default.
            if idle >= 0 {
                setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPALIVE, idle)?;
            }
        }
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
        {
            if idle > 0 {
                setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, idle)?;
            }
        }
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "macos",
            target_os = "ios"
        ))]
        {
            if intvl > 0 {
                setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, intvl)?;
            }
            if cnt > 0 {
                setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, cnt)?;
            }
        }
        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "macos",
            target_os = "ios"
        )))]
        {
            let _ = (idle, intvl, cnt);
        }
        Ok(())
    }

    fn disable_keepalive(&mut self) -> io::Result<()> {
        setsockopt_int(self.fd()?, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 0)
    }

    fn peername(&self) -> io::Result<SocketAddr> {
        let fd = self.fd()?;
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_addr(&storage)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown address family"))
    }

    fn sockname(&self) -> io::Result<SocketAddr> {
        let fd = self.fd()?;
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_addr(&storage)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown address family"))
    }

    fn close(&mut self) {
        // OwnedFd closes on drop.
        self.fd = None;
    }

    fn release(&mut self) {
        if let Some(fd) = self.fd.take() {
            let _ = fd.into_raw_fd();
        }
    }
}

/// Creates the kernel filesystem-events descriptor (Linux inotify),
/// nonblocking and cloexec.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn watch_fd() -> io::Result<OsIo> {
    let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let owned = unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(fd) };
    Ok(OsIo { fd: Some(owned), preconfigured: true })
}

/// Sets an integer-valued socket option.
fn setsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Sets `O_NONBLOCK`, preserving the other file status flags.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Sets `FD_CLOEXEC`, preserving the other descriptor flags.
pub fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::FD_CLOEXEC != 0 {
        return Ok(());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Transient errnos: swallow, break the per-tick loop, wait for the next
/// readiness event.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    err.raw_os_error().map_or(false, |e| {
        e == libc::EAGAIN || e == libc::EWOULDBLOCK || e == libc::EINTR || e == libc::EINPROGRESS
    })
}

/// The errno carried into the terminal unbind reason.
pub(crate) fn errno_of(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

fn unspecified_addr() -> SocketAddr {
    use std::net::{Ipv4Addr, SocketAddrV4};
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
}

fn sockaddr_to_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Some(SocketAddr::from((
                std::net::Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
                u16::from_be(addr.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketAddr::from((
                std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr),
                u16::from_be(addr.sin6_port),
            )))
        }
        _ => None,
    }
}
