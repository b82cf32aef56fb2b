//! Raw serial transport for the modem link.
//!
//! The RockBLOCK presents as a USB serial device at 19200 8N1 with no flow
//! control. Reads are framed into lines here; a line that fails to arrive
//! within the deadline comes back empty rather than as an error, because
//! several AT responses are optional trailing lines the protocol layer is
//! allowed to miss.

use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tracing::info;

use crate::error::Result;

/// Deadline for a single `read_line` call.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte-oriented serial link consumed by the AT layer.
///
/// Implementations must be byte-clean: ASCII passes through unmodified and
/// `\r` is data, not a terminator.
pub trait Transport {
    /// Push all bytes onto the wire.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read until `\n` (inclusive), or return whatever arrived (possibly
    /// nothing) once the deadline passes.
    fn read_line(&mut self) -> Result<String>;
}

/// Helper to get a `BorrowedFd` from a `RawFd` for nix termios calls.
///
/// # Safety
/// The caller must ensure `fd` is a valid open file descriptor.
unsafe fn borrow_fd(fd: RawFd) -> BorrowedFd<'static> {
    BorrowedFd::borrow_raw(fd)
}

fn errno_io(errno: Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// A real serial port, configured for the modem on open.
pub struct SerialTransport {
    fd: RawFd,
    device: String,
}

impl SerialTransport {
    /// Open a serial device path (e.g. `/dev/ttyUSB0`) and configure it to
    /// raw 19200 8N1 with a 100 ms poll granularity.
    pub fn open(device: &str) -> Result<Self> {
        let fd = fcntl::open(
            device,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(errno_io)?;

        // Clear O_NONBLOCK now that we have the fd; reads should block up to
        // VTIME from here on.
        let flags = fcntl::fcntl(fd, fcntl::FcntlArg::F_GETFL).map_err(errno_io)?;
        let mut oflags = OFlag::from_bits_truncate(flags);
        oflags.remove(OFlag::O_NONBLOCK);
        fcntl::fcntl(fd, fcntl::FcntlArg::F_SETFL(oflags)).map_err(errno_io)?;

        configure_termios(fd)?;

        // Drop any stale bytes left over from a previous process.
        // SAFETY: fd is valid, we just opened it
        unsafe {
            termios::tcflush(borrow_fd(fd), termios::FlushArg::TCIOFLUSH).map_err(errno_io)?;
        }

        info!("serial device {device} open (19200 8N1)");

        Ok(Self {
            fd,
            device: device.to_string(),
        })
    }

    /// Device path this transport is connected to.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

/// Configure termios: raw mode, 19200 baud, 8N1, no flow control.
/// VMIN=0, VTIME=1 so each read returns after at most 100 ms of silence;
/// the per-line deadline is enforced above this.
fn configure_termios(fd: RawFd) -> Result<()> {
    // SAFETY: fd is valid, the caller just opened it
    let borrowed = unsafe { borrow_fd(fd) };

    let mut tio = termios::tcgetattr(borrowed).map_err(errno_io)?;

    termios::cfmakeraw(&mut tio);

    termios::cfsetispeed(&mut tio, termios::BaudRate::B19200).map_err(errno_io)?;
    termios::cfsetospeed(&mut tio, termios::BaudRate::B19200).map_err(errno_io)?;

    // 8N1, CLOCAL (ignore modem control lines), CREAD (enable receiver)
    tio.control_flags |= termios::ControlFlags::CLOCAL | termios::ControlFlags::CREAD;
    tio.control_flags &= !termios::ControlFlags::CRTSCTS;

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;

    termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio).map_err(errno_io)?;

    Ok(())
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            // SAFETY: fd stays valid for the lifetime of self
            let bfd = unsafe { borrow_fd(self.fd) };
            match unistd::write(bfd, &bytes[written..]) {
                Ok(n) => written += n,
                Err(Errno::EINTR) => {}
                Err(e) => return Err(errno_io(e).into()),
            }
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line: Vec<u8> = Vec::new();
        let deadline = Instant::now() + READ_TIMEOUT;
        let mut buf = [0u8; 1];

        // One byte per read keeps anything after the terminator on the port
        // for the next call; at 19200 baud the syscall rate is irrelevant.
        while Instant::now() < deadline {
            match unistd::read(self.fd, &mut buf) {
                Ok(0) => {} // VTIME expired with no data yet
                Ok(_) => {
                    line.push(buf[0]);
                    if buf[0] == b'\n' {
                        break;
                    }
                }
                Err(Errno::EINTR | Errno::EAGAIN) => {}
                Err(e) => return Err(errno_io(e).into()),
            }
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = unistd::close(self.fd);
    }
}
