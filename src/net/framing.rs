//! Newline framing over a byte stream

use bytes::{Buf, BytesMut};

/// Accumulates raw reads and hands back complete lines.
///
/// A read may end halfway through a line, the tail waits in the buffer for the
/// next read. Lines are decoded lossily so one bad byte can't wedge the link.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer for the reader to fill directly
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete line without its terminator. `\r\n` is accepted too.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(end);
        self.buf.advance(1);
        let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
        Some(String::from_utf8_lossy(line).into_owned())
    }

    /// Drain every complete line
    pub fn lines(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Bytes of an unfinished line
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Terminate a line for the wire
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + 1);
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    out
}
