use std::fmt;
use std::ops::{BitOr, BitOrAssign};
#[cfg(unix)]
use std::os::fd::{AsRawFd, BorrowedFd};
#[cfg(unix)]
use std::time::Duration;

/// Readiness events for a watched descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FdEvents(u32);

impl FdEvents {
    pub const EMPTY: FdEvents = FdEvents(0);
    pub const READABLE: FdEvents = FdEvents(1 << 0);
    pub const WRITABLE: FdEvents = FdEvents(1 << 1);
    pub const REMOTE_CLOSED: FdEvents = FdEvents(1 << 2);
    pub const ERROR: FdEvents = FdEvents(1 << 3);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every event in `other` is also set in `self`.
    pub fn contains(self, other: FdEvents) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any event in `other` is set in `self`.
    pub fn intersects(self, other: FdEvents) -> bool {
        self.0 & other.0 != 0
    }

    /// True when the peer has gone away or the descriptor is in error.
    pub fn is_hangup(self) -> bool {
        self.intersects(FdEvents::REMOTE_CLOSED | FdEvents::ERROR)
    }

    #[cfg(unix)]
    fn to_poll(self) -> libc::c_short {
        let mut events = 0;
        if self.contains(FdEvents::READABLE) {
            events |= libc::POLLIN;
        }
        if self.contains(FdEvents::WRITABLE) {
            events |= libc::POLLOUT;
        }
        events
    }

    #[cfg(unix)]
    fn from_poll(revents: libc::c_short) -> FdEvents {
        let mut events = FdEvents::EMPTY;
        if revents & libc::POLLIN != 0 {
            events |= FdEvents::READABLE;
        }
        if revents & libc::POLLOUT != 0 {
            events |= FdEvents::WRITABLE;
        }
        if revents & libc::POLLHUP != 0 {
            events |= FdEvents::REMOTE_CLOSED;
        }
        if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            events |= FdEvents::ERROR;
        }
        events
    }
}

impl BitOr for FdEvents {
    type Output = FdEvents;

    fn bitor(self, rhs: FdEvents) -> FdEvents {
        FdEvents(self.0 | rhs.0)
    }
}

impl BitOrAssign for FdEvents {
    fn bitor_assign(&mut self, rhs: FdEvents) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FdEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (FdEvents::READABLE, "READABLE"),
            (FdEvents::WRITABLE, "WRITABLE"),
            (FdEvents::REMOTE_CLOSED, "REMOTE_CLOSED"),
            (FdEvents::ERROR, "ERROR"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            f.write_str("FdEvents(EMPTY)")
        } else {
            write!(f, "FdEvents({})", names.join(" | "))
        }
    }
}

/// Wait until `fd` reports one of `interest` (or a hang-up), or `timeout` elapses.
///
/// Returns [`FdEvents::EMPTY`] on timeout. `None` waits indefinitely.
#[cfg(unix)]
pub fn poll_fd(
    fd: BorrowedFd<'_>,
    interest: FdEvents,
    timeout: Option<Duration>,
) -> std::io::Result<FdEvents> {
    let timeout_ms = match timeout {
        Some(timeout) => timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: interest.to_poll(),
        revents: 0,
    };

    loop {
        // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of one.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(FdEvents::EMPTY);
        }
        return Ok(FdEvents::from_poll(pfd.revents));
    }
}
