//! Git pkt-line framing
//!
//! Each frame is 4 ASCII hex digits giving the total frame length (including
//! the 4 length bytes) followed by that many payload bytes. "0000" is a flush
//! packet. The delimiter ("0001") and response-end ("0002") markers belong to
//! protocol v2 and are rejected here.

use crate::{Error, Result};

/// Flush packet, marks end of a message
pub const FLUSH_PKT: &[u8] = b"0000";

/// Maximum payload bytes in a single pkt-line (65520-byte frame)
pub const MAX_PKT_DATA: usize = 65516;

/// Encode one pkt-line frame
pub fn pkt_line(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_PKT_DATA {
        return Err(Error::ProtocolError(format!(
            "pkt-line too long: {} bytes",
            data.len()
        )));
    }
    let mut pkt = format!("{:04x}", data.len() + 4).into_bytes();
    pkt.extend_from_slice(data);
    Ok(pkt)
}

/// A parsed pkt-line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine<'a> {
    Flush,
    Data(&'a [u8]),
}

/// Parse pkt-lines out of a buffer
pub struct PktLineReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktLineReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read the next pkt-line; `None` at end of input
    pub fn read(&mut self) -> Result<Option<PktLine<'a>>> {
        if self.pos + 4 > self.data.len() {
            return Ok(None);
        }

        let header = &self.data[self.pos..self.pos + 4];
        let len_hex = std::str::from_utf8(header)
            .map_err(|_| Error::ProtocolError("invalid pkt-line header".into()))?;
        let len = usize::from_str_radix(len_hex, 16)
            .map_err(|_| Error::ProtocolError(format!("invalid pkt-line header: {}", len_hex)))?;

        match len {
            0 => {
                self.pos += 4;
                return Ok(Some(PktLine::Flush));
            }
            1 => return Err(Error::ProtocolError("delimiter packet not supported".into())),
            2 => return Err(Error::ProtocolError("response-end packet not supported".into())),
            3 => return Err(Error::ProtocolError("invalid pkt-line length: 3".into())),
            _ => {}
        }

        if len > MAX_PKT_DATA + 4 {
            return Err(Error::ProtocolError(format!("pkt-line too large: {}", len)));
        }
        if self.pos + len > self.data.len() {
            return Err(Error::ProtocolError("pkt-line truncated".into()));
        }

        let payload = &self.data[self.pos + 4..self.pos + len];
        self.pos += len;

        Ok(Some(PktLine::Data(payload)))
    }

    /// Read the next data line as a string, trimming one trailing newline.
    /// `None` on flush or end of input.
    pub fn read_string(&mut self) -> Result<Option<String>> {
        match self.read()? {
            Some(PktLine::Data(mut data)) => {
                if let [rest @ .., b'\n'] = data {
                    data = rest;
                }
                let s = std::str::from_utf8(data)
                    .map_err(|_| Error::ProtocolError("invalid utf8 in pkt-line".into()))?;
                Ok(Some(s.to_string()))
            }
            Some(PktLine::Flush) | None => Ok(None),
        }
    }

    /// Accumulate data lines until a flush or end of input
    pub fn read_all(&mut self) -> Result<Vec<&'a [u8]>> {
        let mut lines = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Data(data)) => lines.push(data),
                Some(PktLine::Flush) | None => break,
            }
        }
        Ok(lines)
    }
}

/// Build pkt-line responses into a buffer
#[derive(Default)]
pub struct PktLineWriter {
    buffer: Vec<u8>,
}

impl PktLineWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one frame; empty data writes a flush packet
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            self.flush();
            return Ok(());
        }
        self.buffer.extend_from_slice(&pkt_line(data)?);
        Ok(())
    }

    /// Write a string frame with a trailing newline
    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write(format!("{}\n", s).as_bytes())
    }

    pub fn flush(&mut self) {
        self.buffer.extend_from_slice(FLUSH_PKT);
    }

    /// Append bytes without pkt-line framing
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

/// Capabilities advertised on the first ref line. Most of these exist so that
/// mainstream clients pick code paths the server can satisfy; only side-band /
/// side-band-64k changes behavior here.
pub const UPLOAD_PACK_CAPABILITIES: &[&str] = &[
    "multi_ack",
    "thin-pack",
    "side-band",
    "side-band-64k",
    "ofs-delta",
    "shallow",
    "no-progress",
    "include-tag",
    "multi_ack_detailed",
    "no-done",
    "symref=HEAD:refs/heads/main",
    "agent=infinite-git/1.0",
];

/// Format capabilities for the advertisement line
pub fn format_capabilities(caps: &[&str]) -> String {
    caps.join(" ")
}

/// Parse a space-separated capability list
pub fn parse_capabilities(caps_str: &str) -> Vec<String> {
    caps_str
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Side-band channel IDs
pub mod sideband {
    pub const DATA: u8 = 1;
    pub const PROGRESS: u8 = 2;
    pub const ERROR: u8 = 3;
}

/// Maximum pack bytes per side-band frame, leaving room for the channel byte
pub const SIDEBAND_CHUNK: usize = 65515;

/// Frame data for a side-band channel
pub fn sideband_pkt(channel: u8, data: &[u8]) -> Result<Vec<u8>> {
    let mut payload = vec![channel];
    payload.extend_from_slice(data);
    pkt_line(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkt_line() {
        assert_eq!(pkt_line(b"hello").unwrap(), b"0009hello");
    }

    #[test]
    fn test_pkt_line_too_long() {
        assert!(pkt_line(&vec![0u8; MAX_PKT_DATA]).is_ok());
        assert!(pkt_line(&vec![0u8; MAX_PKT_DATA + 1]).is_err());
    }

    #[test]
    fn test_reader() {
        let data = b"0009hello0006ab0000";
        let mut reader = PktLineReader::new(data);

        assert_eq!(reader.read().unwrap(), Some(PktLine::Data(b"hello")));
        assert_eq!(reader.read().unwrap(), Some(PktLine::Data(b"ab")));
        assert_eq!(reader.read().unwrap(), Some(PktLine::Flush));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn test_reader_rejects_special_markers() {
        assert!(PktLineReader::new(b"0001").read().is_err());
        assert!(PktLineReader::new(b"0002").read().is_err());
        assert!(PktLineReader::new(b"zzzz").read().is_err());
        assert!(PktLineReader::new(b"0009ab").read().is_err());
    }

    #[test]
    fn test_read_string_trims_newline() {
        let mut reader = PktLineReader::new(b"000awant x\n0000");
        assert_eq!(reader.read_string().unwrap(), Some("want x".to_string()));
        assert_eq!(reader.read_string().unwrap(), None);
    }

    #[test]
    fn test_read_all_stops_at_flush() {
        let mut reader = PktLineReader::new(b"0005a0005b00000005c");
        let lines = reader.read_all().unwrap();
        assert_eq!(lines, vec![b"a".as_slice(), b"b".as_slice()]);
    }

    #[test]
    fn test_writer() {
        let mut writer = PktLineWriter::new();
        writer.write_str("hello").unwrap();
        writer.flush();
        assert_eq!(writer.as_bytes(), b"000ahello\n0000");
    }

    #[test]
    fn test_writer_empty_write_is_flush() {
        let mut writer = PktLineWriter::new();
        writer.write(b"").unwrap();
        assert_eq!(writer.as_bytes(), b"0000");
    }

    #[test]
    fn test_sideband_pkt() {
        let pkt = sideband_pkt(sideband::DATA, b"PACK").unwrap();
        assert_eq!(pkt, b"0009\x01PACK");
    }
}
