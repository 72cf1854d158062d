//! Open the device link: a TCP serial bridge or a local tty, both non-blocking.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddr {
    /// `host:port` of a serial-to-TCP bridge.
    Tcp(String),
    Device(PathBuf),
}

impl LinkAddr {
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix("tcp://") {
            Some(addr) => LinkAddr::Tcp(addr.to_string()),
            None => LinkAddr::Device(PathBuf::from(s)),
        }
    }
}

pub enum Link {
    Tcp(TcpStream),
    Device(File),
}

pub fn open(addr: &LinkAddr) -> io::Result<Link> {
    match addr {
        LinkAddr::Tcp(a) => {
            let stream = TcpStream::connect(a.as_str())?;
            stream.set_nonblocking(true)?;
            stream.set_nodelay(true)?;
            Ok(Link::Tcp(stream))
        }
        LinkAddr::Device(path) => open_device(path).map(Link::Device),
    }
}

#[cfg(unix)]
fn open_device(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
        .open(path)
}

#[cfg(not(unix))]
fn open_device(path: &Path) -> io::Result<File> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("device links are only supported on unix: {}", path.display()),
    ))
}

impl Read for Link {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Link::Tcp(s) => s.read(buf),
            Link::Device(f) => f.read(buf),
        }
    }
}

impl Write for Link {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Link::Tcp(s) => s.write(buf),
            Link::Device(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Link::Tcp(s) => s.flush(),
            Link::Device(f) => f.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_link_addresses() {
        assert_eq!(
            LinkAddr::parse("tcp://127.0.0.1:2000"),
            LinkAddr::Tcp("127.0.0.1:2000".into())
        );
        assert_eq!(
            LinkAddr::parse("/dev/ttyUSB0"),
            LinkAddr::Device(PathBuf::from("/dev/ttyUSB0"))
        );
    }
}
