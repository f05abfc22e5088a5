//! Little-endian field access over a message body.

use bytes::BufMut;

use crate::error::{MessageError, Result};

/// Default cap on null-terminated strings (titles, messages, paths).
pub const DEFAULT_MAX_STRING_LEN: usize = 64 * 1024;

/// Cursor over a decoded frame payload.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    max_string: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_max_string(buf, DEFAULT_MAX_STRING_LEN)
    }

    pub fn with_max_string(buf: &'a [u8], max_string: usize) -> Self {
        Self {
            buf,
            pos: 0,
            max_string,
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(MessageError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a null-terminated string, bytes taken as Latin-1 characters.
    ///
    /// Scans at most `max_string` bytes for the terminator; a longer string
    /// means the stream is malformed.
    pub fn cstring(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let window = &rest[..rest.len().min(self.max_string + 1)];
        match window.iter().position(|&b| b == 0) {
            Some(len) => {
                let text = window[..len].iter().map(|&b| char::from(b)).collect();
                self.pos += len + 1;
                Ok(text)
            }
            None if window.len() > self.max_string => Err(MessageError::StringTooLong {
                max: self.max_string,
            }),
            None => Err(MessageError::Truncated {
                needed: window.len() + 1,
                remaining: window.len(),
            }),
        }
    }
}

/// Append `text` as a null-terminated Latin-1 string.
pub fn put_cstring(dst: &mut impl BufMut, text: &str) -> Result<()> {
    let mut encoded = Vec::with_capacity(text.len() + 1);
    for c in text.chars() {
        match u8::try_from(u32::from(c)) {
            Ok(b) if b != 0 => encoded.push(b),
            _ => return Err(MessageError::InvalidString(text.to_string())),
        }
    }
    encoded.push(0);
    dst.put_slice(&encoded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let buf = [
            0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02,
            0x01,
        ];
        let mut r = WireReader::new(&buf);
        assert_eq!(r.u8().unwrap(), 0x01);
        assert_eq!(r.u16().unwrap(), 0x1234);
        assert_eq!(r.u32().unwrap(), 0x1234_5678);
        assert_eq!(r.u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(r.remaining(), 0);
        assert!(matches!(r.u8(), Err(MessageError::Truncated { .. })));
    }

    #[test]
    fn cstring_reads_until_terminator() {
        let mut r = WireReader::new(b"CraftOS-PC Terminal\0rest\0");
        assert_eq!(r.cstring().unwrap(), "CraftOS-PC Terminal");
        assert_eq!(r.cstring().unwrap(), "rest");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn cstring_maps_high_bytes_to_latin1() {
        let mut r = WireReader::new(&[0x41, 0xE9, 0x00]);
        assert_eq!(r.cstring().unwrap(), "A\u{e9}");
    }

    #[test]
    fn cstring_without_terminator_is_truncated() {
        let mut r = WireReader::new(b"no end");
        assert!(matches!(r.cstring(), Err(MessageError::Truncated { .. })));
    }

    #[test]
    fn cstring_scan_is_bounded() {
        let long = vec![b'x'; 64];
        let mut r = WireReader::with_max_string(&long, 16);
        assert!(matches!(
            r.cstring(),
            Err(MessageError::StringTooLong { max: 16 })
        ));

        let mut exact = vec![b'y'; 16];
        exact.push(0);
        let mut r = WireReader::with_max_string(&exact, 16);
        assert_eq!(r.cstring().unwrap().len(), 16);
    }

    #[test]
    fn put_cstring_rejects_nul_and_wide_chars() {
        let mut out = Vec::new();
        put_cstring(&mut out, "/rom/programs").unwrap();
        assert_eq!(out.last(), Some(&0));

        assert!(put_cstring(&mut out, "a\0b").is_err());
        assert!(put_cstring(&mut out, "snow\u{2603}").is_err());
    }
}
