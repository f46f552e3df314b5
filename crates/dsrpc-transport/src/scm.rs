//! `sendmsg`/`recvmsg` wrappers carrying `SCM_RIGHTS` ancillary data.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

#[cfg(target_os = "linux")]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(target_os = "linux"))]
const RECV_FLAGS: libc::c_int = 0;

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: libc::c_int = 0;

/// Ancillary buffer aligned for `cmsghdr`.
fn control_buffer(fd_count: usize) -> (Vec<u64>, usize) {
    let payload = (fd_count * mem::size_of::<RawFd>()) as libc::c_uint;
    // SAFETY: CMSG_SPACE only performs arithmetic on its argument.
    let space = unsafe { libc::CMSG_SPACE(payload) } as usize;
    (vec![0u64; space.div_ceil(mem::size_of::<u64>())], space)
}

/// Receive into `buf`, accepting up to `max_fds` descriptors.
///
/// Received descriptors are appended to `fds` as owned values, so they are
/// closed if the caller drops them. Returns the number of bytes read.
pub(crate) fn recv_with_fds(
    socket: BorrowedFd<'_>,
    buf: &mut [u8],
    max_fds: usize,
    fds: &mut Vec<OwnedFd>,
) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: buf.len(),
    };
    let (mut control, space) = control_buffer(max_fds.max(1));

    // SAFETY: msghdr is a plain C struct for which all-zero is a valid value.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1 as _;
    msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = space as _;

    // SAFETY: `msg` points at `iov` and `control`, both live and writable for
    // the lengths recorded in `msg`.
    let read = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, RECV_FLAGS) };
    if read < 0 {
        return Err(io::Error::last_os_error());
    }

    // Take ownership before checking for truncation so nothing leaks.
    // SAFETY: the kernel filled `control` and `msg_controllen`; the CMSG_*
    // helpers walk only within that region.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let header = &*cmsg;
            if header.cmsg_level == libc::SOL_SOCKET && header.cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                let data_len = header.cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                for index in 0..data_len / mem::size_of::<RawFd>() {
                    let raw = std::ptr::read_unaligned(data.add(index));
                    fds.push(OwnedFd::from_raw_fd(raw));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "ancillary data truncated",
        ));
    }

    Ok(read as usize)
}

/// Send `buf` with `fds` attached. Returns the number of bytes sent.
///
/// The descriptors are attached to the first byte of `buf`; the caller must
/// send any unsent remainder without descriptors.
pub(crate) fn send_with_fds(
    socket: BorrowedFd<'_>,
    buf: &[u8],
    fds: &[BorrowedFd<'_>],
) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let (mut control, space) = control_buffer(fds.len());

    // SAFETY: msghdr is a plain C struct for which all-zero is a valid value.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1 as _;

    if !fds.is_empty() {
        msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = space as _;

        let payload = (fds.len() * mem::size_of::<RawFd>()) as libc::c_uint;
        // SAFETY: `control` is large enough for one cmsghdr carrying `fds`,
        // so CMSG_FIRSTHDR is non-null and CMSG_DATA has room for every fd.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(payload) as _;
            let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
            for (index, fd) in fds.iter().enumerate() {
                std::ptr::write_unaligned(data.add(index), fd.as_raw_fd());
            }
        }
    }

    // SAFETY: `msg` references `iov` (backed by `buf`) and `control`, both
    // valid for the lengths recorded in `msg`.
    let sent = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, SEND_FLAGS) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}
