//! Serial line link over a termios character device.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::config::{Parity, SerialConfig};
use crate::error::{Error, Result};
use crate::reactor::{Link, LinkKind};

/// A serial device configured for raw, non-blocking I/O.
#[derive(Debug)]
pub struct SerialPort {
    file: File,
    path: PathBuf,
}

fn speed(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        other => {
            return Err(Error::Config(format!("unsupported baud rate {}", other)));
        }
    };
    Ok(speed)
}

fn char_size(bits: u8) -> libc::tcflag_t {
    match bits {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        _ => libc::CS8,
    }
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl SerialPort {
    /// Open and configure the device named in `config`.
    ///
    /// The device is opened with `O_NOCTTY | O_NONBLOCK`, switched to raw
    /// mode and any stale input is flushed.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        config.validate()?;
        let speed = speed(config.baud_rate)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&config.path)?;
        let fd = file.as_raw_fd();

        // SAFETY: termios is plain old data; tcgetattr fills it completely.
        let mut tio: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: fd is an open descriptor owned by `file`, tio is a live struct.
        unsafe {
            check(libc::tcgetattr(fd, &mut tio))?;
            libc::cfmakeraw(&mut tio);
            check(libc::cfsetispeed(&mut tio, speed))?;
            check(libc::cfsetospeed(&mut tio, speed))?;
        }

        tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::PARODD | libc::CSTOPB | libc::CRTSCTS);
        tio.c_cflag |= char_size(config.data_bits) | libc::CLOCAL | libc::CREAD;
        match config.parity {
            Parity::None => {}
            Parity::Even => tio.c_cflag |= libc::PARENB,
            Parity::Odd => tio.c_cflag |= libc::PARENB | libc::PARODD,
        }
        if config.stop_bits == 2 {
            tio.c_cflag |= libc::CSTOPB;
        }
        if config.flow_control {
            tio.c_cflag |= libc::CRTSCTS;
        }
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;

        // SAFETY: as above.
        unsafe {
            check(libc::tcsetattr(fd, libc::TCSANOW, &tio))?;
            check(libc::tcflush(fd, libc::TCIOFLUSH))?;
        }

        tracing::debug!(
            path = %config.path.display(),
            baud = config.baud_rate,
            data_bits = config.data_bits,
            parity = ?config.parity,
            stop_bits = config.stop_bits,
            "serial line configured"
        );

        Ok(Self {
            file,
            path: config.path.clone(),
        })
    }

    /// Device path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for SerialPort {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Link for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.file, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut self.file, buf)
    }

    fn kind(&self) -> LinkKind {
        LinkKind::Serial
    }
}
