use super::{Message, MessageKind, SessionError, SessionResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Largest accepted frame, kind and count included.
pub const MAX_FRAME_BYTES: u64 = 1 << 30;

/// Bytes of a frame before its payload: kind tag and element count.
const FRAME_OVERHEAD: u64 = 1 + 8;

/// Message-level connection to the peer.
pub trait Transport {
    fn send(&mut self, message: &Message) -> SessionResult<()>;

    fn receive(&mut self) -> SessionResult<Message>;

    /// Releases the connection. Calling it again does nothing.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Length-prefixed frames over TCP:
/// `[u64 frame length][u8 kind][u64 count][payload]`, little endian, where
/// the frame length counts everything after itself.
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    timeout: Duration,
    closed: bool,
}

impl TcpTransport {
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> SessionResult<Self> {
        let mut last_error = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => return Self::from_stream(stream, timeout),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.map_or(SessionError::Closed, |e| map_io(e, timeout)))
    }

    /// Every blocking read or write on `stream` fails after `timeout`.
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> SessionResult<Self> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            timeout,
            closed: false,
        })
    }

    fn write_frame(&mut self, message: &Message) -> io::Result<()> {
        let len = FRAME_OVERHEAD + message.payload.len() as u64;
        self.writer.write_u64::<LittleEndian>(len)?;
        self.writer.write_u8(message.kind as u8)?;
        self.writer.write_u64::<LittleEndian>(message.count)?;
        self.writer.write_all(&message.payload)?;
        self.writer.flush()
    }
}

fn map_io(error: io::Error, timeout: Duration) -> SessionError {
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => SessionError::Timeout(timeout),
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => SessionError::Closed,
        _ => SessionError::Io(error),
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, message: &Message) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let len = FRAME_OVERHEAD + message.payload.len() as u64;
        if len > MAX_FRAME_BYTES {
            return Err(SessionError::FrameTooLarge {
                len,
                max: MAX_FRAME_BYTES,
            });
        }
        self.write_frame(message).map_err(|e| map_io(e, self.timeout))?;
        debug!("sent {} ({} elements, {len} bytes)", message.kind, message.count);
        Ok(())
    }

    fn receive(&mut self) -> SessionResult<Message> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let timeout = self.timeout;
        let len = self
            .reader
            .read_u64::<LittleEndian>()
            .map_err(|e| map_io(e, timeout))?;
        if len > MAX_FRAME_BYTES {
            return Err(SessionError::FrameTooLarge {
                len,
                max: MAX_FRAME_BYTES,
            });
        }
        if len < FRAME_OVERHEAD {
            return Err(SessionError::Payload(format!("frame of {len} bytes")));
        }
        let kind = self.reader.read_u8().map_err(|e| map_io(e, timeout))?;
        let kind = MessageKind::try_from(kind)?;
        let count = self
            .reader
            .read_u64::<LittleEndian>()
            .map_err(|e| map_io(e, timeout))?;
        let mut payload = Vec::new();
        (&mut self.reader)
            .take(len - FRAME_OVERHEAD)
            .read_to_end(&mut payload)
            .map_err(|e| map_io(e, timeout))?;
        if payload.len() as u64 != len - FRAME_OVERHEAD {
            return Err(SessionError::Closed);
        }
        debug!("received {kind} ({count} elements, {len} bytes)");
        Ok(Message::new(kind, count, payload))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.writer.flush();
        // The peer may already be gone.
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        debug!("connection closed");
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair(timeout: Duration) -> (TcpTransport, TcpTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = thread::spawn(move || listener.accept().unwrap().0);
        let client = TcpTransport::connect(addr, timeout).unwrap();
        let server = TcpTransport::from_stream(accept.join().unwrap(), timeout).unwrap();
        (client, server)
    }

    #[test]
    fn frames_roundtrip() {
        let (mut a, mut b) = pair(Duration::from_secs(5));
        let msg = Message::new(MessageKind::ReluRequest, 3, vec![1, 2, 3, 4]);
        a.send(&msg).unwrap();
        a.send(&Message::new(MessageKind::Result, 0, Vec::new())).unwrap();
        assert_eq!(b.receive().unwrap(), msg);
        assert_eq!(b.receive().unwrap().kind, MessageKind::Result);
    }

    #[test]
    fn silent_peer_times_out() {
        let (_a, mut b) = pair(Duration::from_millis(50));
        assert!(matches!(b.receive(), Err(SessionError::Timeout(_))));
    }

    #[test]
    fn closed_transport_refuses_io() {
        let (mut a, mut b) = pair(Duration::from_secs(5));
        a.close();
        a.close();
        assert!(a.is_closed());
        assert!(matches!(a.send(&Message::new(MessageKind::Execute, 0, vec![])), Err(SessionError::Closed)));
        assert!(matches!(b.receive(), Err(SessionError::Closed)));
    }
}
