//! Remote bit-bang transport.
//!
//! Speaks the OpenOCD `remote_bitbang` line protocol: every line change is one ASCII byte, and
//! TDO is sampled on request.
//!
//! | byte                   | meaning                                  |
//! |------------------------|------------------------------------------|
//! | `'0'` + (TCK<<2 \| TMS<<1 \| TDI) | drive TCK, TMS and TDI        |
//! | `'r'` + (TRST<<1 \| SRST)         | drive the reset lines         |
//! | `'R'`                  | sample TDO, answered with `'0'` or `'1'` |
//! | `'Q'`                  | end of session                           |

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::jtag::controller::{ClockedController, PinDriver};
use crate::jtag::JtagError;

const LINES_BASE: u8 = b'0';
const RESET_BASE: u8 = b'r';
const READ_TDO: u8 = b'R';
const QUIT: u8 = b'Q';

/// A [`ClockedController`] on top of a bit-bang byte stream.
pub type BitBangController<S> = ClockedController<BitBangAdapter<S>>;

/// Encodes line changes into the bit-bang byte protocol.
#[derive(Debug)]
pub struct BitBangAdapter<S: Write> {
    stream: S,
    closed: bool,
}

impl BitBangAdapter<TcpStream> {
    /// Connects to a remote bit-bang server.
    pub fn connect(address: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = TcpStream::connect(address)?;
        socket.set_nodelay(true)?;

        // Dump anything that was already in the socket
        socket.set_read_timeout(Some(Duration::from_millis(50)))?;
        let mut junk = [0u8; 64];
        let mut reader = &socket;
        while matches!(reader.read(&mut junk), Ok(n) if n > 0) {}

        socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        socket.set_write_timeout(Some(Duration::from_millis(500)))?;

        tracing::debug!("connected to bit-bang server at {:?}", socket.peer_addr());

        Ok(Self::new(socket))
    }
}

impl<S: Read + Write> BitBangAdapter<S> {
    /// Wraps an already connected byte stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    fn send(&mut self, byte: u8) -> Result<(), JtagError> {
        self.stream.write_all(&[byte])?;
        Ok(())
    }

    /// Tells the server the session is over.
    pub fn quit(&mut self) -> Result<(), JtagError> {
        if !self.closed {
            self.closed = true;
            self.send(QUIT)?;
            self.stream.flush()?;
        }
        Ok(())
    }
}

impl<S: Read + Write> PinDriver for BitBangAdapter<S> {
    fn set_lines(&mut self, tck: bool, tms: bool, tdi: bool) -> Result<(), JtagError> {
        let code = (u8::from(tck) << 2) | (u8::from(tms) << 1) | u8::from(tdi);
        self.send(LINES_BASE + code)
    }

    fn sample_tdo(&mut self) -> Result<bool, JtagError> {
        self.send(READ_TDO)?;
        self.stream.flush()?;

        let mut tdo = [0u8; 1];
        match self.stream.read(&mut tdo)? {
            0 => Err(JtagError::ConnectionClosed),
            _ => match tdo[0] {
                b'0' => Ok(false),
                b'1' => Ok(true),
                other => Err(JtagError::UnexpectedResponse(other)),
            },
        }
    }

    fn set_reset(&mut self, trst: bool, srst: bool) -> Result<(), JtagError> {
        let code = (u8::from(trst) << 1) | u8::from(srst);
        self.send(RESET_BASE + code)
    }
}

impl<S: Write> Drop for BitBangAdapter<S> {
    fn drop(&mut self) {
        // Best effort, the socket may already be gone.
        if !self.closed {
            let _ = self.stream.write_all(&[QUIT]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitSequence;
    use crate::jtag::JtagController;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    /// In-memory stand-in for the socket.
    #[derive(Debug, Default)]
    struct Wire {
        sent: Vec<u8>,
        replies: VecDeque<u8>,
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.replies.pop_front() {
                Some(byte) => {
                    buf[0] = byte;
                    Ok(1)
                }
                None => Ok(0),
            }
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn line_bytes() {
        let mut adapter = BitBangAdapter::new(Wire::default());
        adapter.set_lines(false, false, false).unwrap();
        adapter.set_lines(false, true, true).unwrap();
        adapter.set_lines(true, true, false).unwrap();
        adapter.set_lines(true, true, true).unwrap();
        assert_eq!(adapter.get_ref().sent, b"0367");
    }

    #[test]
    fn reset_bytes() {
        let mut adapter = BitBangAdapter::new(Wire::default());
        adapter.set_reset(false, false).unwrap();
        adapter.set_reset(false, true).unwrap();
        adapter.set_reset(true, false).unwrap();
        adapter.set_reset(true, true).unwrap();
        assert_eq!(adapter.get_ref().sent, b"rstu");
    }

    #[test]
    fn tdo_sample_round_trip() {
        let mut adapter = BitBangAdapter::new(Wire {
            replies: VecDeque::from(b"10x".to_vec()),
            ..Default::default()
        });
        assert!(adapter.sample_tdo().unwrap());
        assert!(!adapter.sample_tdo().unwrap());
        assert!(matches!(
            adapter.sample_tdo(),
            Err(JtagError::UnexpectedResponse(b'x'))
        ));
        assert!(matches!(
            adapter.sample_tdo(),
            Err(JtagError::ConnectionClosed)
        ));
        assert_eq!(adapter.get_ref().sent, b"RRRR");
    }

    #[test]
    fn quit_is_sent_once() {
        let mut adapter = BitBangAdapter::new(Wire::default());
        adapter.quit().unwrap();
        adapter.quit().unwrap();
        assert_eq!(adapter.get_ref().sent, b"Q");
    }

    #[test]
    fn controller_shift_with_capture() {
        let mut controller = BitBangController::new(BitBangAdapter::new(Wire {
            replies: VecDeque::from(b"01".to_vec()),
            ..Default::default()
        }));

        // Shift two bits, the upper one deferred, then leave the shift state.
        controller.write("10".parse().unwrap(), true).unwrap();
        controller.write_tms("1".parse().unwrap()).unwrap();

        assert_eq!(controller.driver().get_ref().sent, b"0R43R7");
        assert_eq!(
            controller.read(2).unwrap(),
            "10".parse::<BitSequence>().unwrap()
        );
    }
}
