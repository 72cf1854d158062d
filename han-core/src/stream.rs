//! Byte stream the messenger talks over. Host supplies the implementation.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Ordered duplex byte channel. Reads never block.
pub trait Stream {
    /// Number of bytes that can be read right now without blocking.
    fn available(&mut self) -> io::Result<usize>;

    /// Next byte, or `None` if nothing is buffered.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: Stream + ?Sized> Stream for &mut S {
    fn available(&mut self) -> io::Result<usize> {
        (**self).available()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        (**self).read_byte()
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// In-memory stream: bytes pushed with `push_inbound` are read back; writes are captured.
#[derive(Debug, Default, Clone)]
pub struct MemoryStream {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Everything written so far.
    pub fn written(&self) -> &[u8] {
        &self.outbound
    }

    /// Take and clear everything written so far.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }
}

impl Stream for MemoryStream {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.inbound.len())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.inbound.pop_front())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.outbound.extend_from_slice(bytes);
        Ok(())
    }
}

const READ_CHUNK: usize = 256;

/// Adapter over a non-blocking `Read + Write` (TCP socket, tty opened with `O_NONBLOCK`).
///
/// `WouldBlock` reads count as "nothing available". A zero-length read means
/// the peer closed the link and is reported as `UnexpectedEof`.
pub struct IoStream<T> {
    inner: T,
    pending: VecDeque<u8>,
}

impl<T: Read + Write> IoStream<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.inner.read(&mut chunk) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "link closed by peer",
            )),
            Ok(n) => {
                self.pending.extend(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl<T: Read + Write> Stream for IoStream<T> {
    fn available(&mut self) -> io::Result<usize> {
        if self.pending.is_empty() {
            self.fill()?;
        }
        Ok(self.pending.len())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pending.is_empty() {
            self.fill()?;
        }
        Ok(self.pending.pop_front())
    }

    /// Writes everything, yielding while a non-blocking sink is full.
    fn write_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            match self.inner.write(bytes) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "link accepted no bytes",
                    ))
                }
                Ok(n) => bytes = &bytes[n..],
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    std::thread::yield_now()
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        loop {
            match Write::flush(&mut self.inner) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Read side returns `WouldBlock` once drained, like a non-blocking socket.
    struct NonBlocking {
        data: io::Cursor<Vec<u8>>,
        written: Vec<u8>,
        closed: bool,
    }

    impl Read for NonBlocking {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 && !self.closed {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            Ok(n)
        }
    }

    impl Write for NonBlocking {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn memory_stream_fifo() {
        let mut s = MemoryStream::new();
        s.push_inbound(b"ab");
        assert_eq!(s.available().unwrap(), 2);
        assert_eq!(s.read_byte().unwrap(), Some(b'a'));
        assert_eq!(s.read_byte().unwrap(), Some(b'b'));
        assert_eq!(s.read_byte().unwrap(), None);
        Stream::write_all(&mut s, b"xy").unwrap();
        assert_eq!(s.take_written(), b"xy");
        assert!(s.written().is_empty());
    }

    #[test]
    fn io_stream_would_block_is_empty() {
        let mut s = IoStream::new(NonBlocking {
            data: io::Cursor::new(b"7;".to_vec()),
            written: Vec::new(),
            closed: false,
        });
        assert_eq!(s.available().unwrap(), 2);
        assert_eq!(s.read_byte().unwrap(), Some(b'7'));
        assert_eq!(s.read_byte().unwrap(), Some(b';'));
        assert_eq!(s.read_byte().unwrap(), None);
        assert_eq!(s.available().unwrap(), 0);
        Stream::write_all(&mut s, b"1,ok;").unwrap();
        assert_eq!(s.get_ref().written, b"1,ok;");
    }

    #[test]
    fn io_stream_reports_closed_link() {
        let mut s = IoStream::new(NonBlocking {
            data: io::Cursor::new(Vec::new()),
            written: Vec::new(),
            closed: true,
        });
        let err = s.available().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
