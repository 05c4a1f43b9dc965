//! Request charsets accepted by the JSON decoder.
//!
//! JSON is parsed as UTF-8, so UTF-16 and UTF-32 bodies are transcoded on the
//! fly while they are read.

use std::fmt;
use std::io::{self, BufReader, Read};

use crate::api::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Utf16,
    Utf32,
}

impl Charset {
    /// Resolves the charset declared by a request. No declaration means UTF-8.
    pub fn from_label(label: Option<&str>) -> Result<Charset, IngestError> {
        let Some(label) = label else {
            return Ok(Charset::Utf8);
        };

        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" => Ok(Charset::Utf8),
            "utf-16" => Ok(Charset::Utf16),
            "utf-32" => Ok(Charset::Utf32),
            _ => Err(IngestError::UnsupportedCharset(label.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Utf16 => "UTF-16",
            Charset::Utf32 => "UTF-32",
        }
    }

    /// Wraps `source` so that reads yield UTF-8 regardless of the charset.
    pub fn decoding_reader<R: Read>(self, source: R) -> CharsetReader<R> {
        match self {
            Charset::Utf8 => CharsetReader::Utf8(source),
            Charset::Utf16 => CharsetReader::Transcoded(Transcoder::new(source, UnitWidth::Two)),
            Charset::Utf32 => CharsetReader::Transcoded(Transcoder::new(source, UnitWidth::Four)),
        }
    }

    /// Encodes text in this charset. UTF-16 output is big-endian with a byte
    /// order mark, UTF-32 output is big-endian without one.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Utf16 => {
                let mut out = Vec::with_capacity(2 + text.len() * 2);
                out.extend_from_slice(&[0xFE, 0xFF]);
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
                out
            }
            Charset::Utf32 => text
                .chars()
                .flat_map(|c| u32::from(c).to_be_bytes())
                .collect(),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum CharsetReader<R: Read> {
    Utf8(R),
    Transcoded(Transcoder<R>),
}

impl<R: Read> Read for CharsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CharsetReader::Utf8(inner) => inner.read(buf),
            CharsetReader::Transcoded(inner) => inner.read(buf),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum UnitWidth {
    Two,
    Four,
}

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    Big,
    Little,
}

/// Turns a UTF-16 or UTF-32 byte stream into UTF-8. A leading byte order mark
/// selects the byte order and is dropped; without one big-endian is assumed.
pub struct Transcoder<R: Read> {
    source: BufReader<R>,
    width: UnitWidth,
    order: ByteOrder,
    at_start: bool,
    encoded: [u8; 4],
    encoded_len: usize,
    encoded_pos: usize,
    deferred: Option<io::Error>,
}

impl<R: Read> Transcoder<R> {
    fn new(source: R, width: UnitWidth) -> Self {
        Self {
            source: BufReader::new(source),
            width,
            order: ByteOrder::Big,
            at_start: true,
            encoded: [0; 4],
            encoded_len: 0,
            encoded_pos: 0,
            deferred: None,
        }
    }

    fn next_unit(&mut self) -> io::Result<Option<u32>> {
        let width = match self.width {
            UnitWidth::Two => 2,
            UnitWidth::Four => 4,
        };
        let mut raw = [0u8; 4];
        let mut filled = 0;
        while filled < width {
            match self.source.read(&mut raw[filled..width]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(invalid_text("stream ends inside a code unit")),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let unit = match (self.width, self.order) {
            (UnitWidth::Two, ByteOrder::Big) => u32::from(u16::from_be_bytes([raw[0], raw[1]])),
            (UnitWidth::Two, ByteOrder::Little) => {
                u32::from(u16::from_le_bytes([raw[0], raw[1]]))
            }
            (UnitWidth::Four, ByteOrder::Big) => u32::from_be_bytes(raw),
            (UnitWidth::Four, ByteOrder::Little) => u32::from_le_bytes(raw),
        };
        Ok(Some(unit))
    }

    fn next_char(&mut self) -> io::Result<Option<char>> {
        loop {
            let Some(unit) = self.next_unit()? else {
                return Ok(None);
            };

            if self.at_start {
                self.at_start = false;
                match (self.width, unit) {
                    (_, 0xFEFF) => continue,
                    (UnitWidth::Two, 0xFFFE) | (UnitWidth::Four, 0xFFFE_0000) => {
                        self.order = ByteOrder::Little;
                        continue;
                    }
                    _ => {}
                }
            }

            return match self.width {
                UnitWidth::Four => char::from_u32(unit)
                    .map(Some)
                    .ok_or_else(|| invalid_text("invalid UTF-32 code point")),
                UnitWidth::Two => self.finish_utf16(unit).map(Some),
            };
        }
    }

    fn finish_utf16(&mut self, unit: u32) -> io::Result<char> {
        match unit {
            0xD800..=0xDBFF => {
                let low = self
                    .next_unit()?
                    .ok_or_else(|| invalid_text("stream ends inside a surrogate pair"))?;
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(invalid_text("unpaired UTF-16 surrogate"));
                }
                let code = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                char::from_u32(code).ok_or_else(|| invalid_text("invalid UTF-16 surrogate pair"))
            }
            0xDC00..=0xDFFF => Err(invalid_text("unpaired UTF-16 surrogate")),
            _ => char::from_u32(unit).ok_or_else(|| invalid_text("invalid UTF-16 code unit")),
        }
    }
}

impl<R: Read> Read for Transcoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let mut written = 0;
        while written < buf.len() {
            if self.encoded_pos == self.encoded_len {
                match self.next_char() {
                    Ok(Some(c)) => {
                        self.encoded_len = c.encode_utf8(&mut self.encoded).len();
                        self.encoded_pos = 0;
                    }
                    Ok(None) => break,
                    // hand out what was decoded so far, fail on the next call
                    Err(err) if written > 0 => {
                        self.deferred = Some(err);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            let n = (self.encoded_len - self.encoded_pos).min(buf.len() - written);
            buf[written..written + n]
                .copy_from_slice(&self.encoded[self.encoded_pos..self.encoded_pos + n]);
            self.encoded_pos += n;
            written += n;
        }
        Ok(written)
    }
}

fn invalid_text(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcode(charset: Charset, bytes: &[u8]) -> io::Result<String> {
        let mut out = String::new();
        charset.decoding_reader(bytes).read_to_string(&mut out)?;
        Ok(out)
    }

    #[test]
    fn resolves_declared_charsets() {
        assert_eq!(Charset::from_label(None).unwrap(), Charset::Utf8);
        assert_eq!(Charset::from_label(Some("UTF-8")).unwrap(), Charset::Utf8);
        assert_eq!(Charset::from_label(Some("utf-16")).unwrap(), Charset::Utf16);
        assert_eq!(Charset::from_label(Some("Utf-32")).unwrap(), Charset::Utf32);

        for label in ["ISO-8859-1", "latin1", "utf8", ""] {
            assert!(
                matches!(
                    Charset::from_label(Some(label)),
                    Err(IngestError::UnsupportedCharset(_))
                ),
                "{label} should be rejected"
            );
        }
    }

    #[test]
    fn utf16_round_trips_through_encode() {
        let text = r#"{"city":"Zürich","emoji":"🦀"}"#;
        let encoded = Charset::Utf16.encode(text);
        assert_eq!(&encoded[..2], &[0xFE, 0xFF]);
        assert_eq!(transcode(Charset::Utf16, &encoded).unwrap(), text);
    }

    #[test]
    fn utf16_honours_little_endian_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "{\"a\":1}".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(transcode(Charset::Utf16, &bytes).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn utf32_defaults_to_big_endian() {
        let text = "{\"k\":\"€\"}";
        let encoded = Charset::Utf32.encode(text);
        assert_eq!(encoded.len(), text.chars().count() * 4);
        assert_eq!(transcode(Charset::Utf32, &encoded).unwrap(), text);
    }

    #[test]
    fn rejects_broken_utf16() {
        // lone high surrogate followed by a regular unit
        let bytes = [0xD8, 0x3D, 0x00, 0x41];
        let err = transcode(Charset::Utf16, &bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // odd number of bytes
        let err = transcode(Charset::Utf16, &[0x00, 0x7B, 0x00]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn utf8_passes_through() {
        assert_eq!(transcode(Charset::Utf8, "{}".as_bytes()).unwrap(), "{}");
        assert_eq!(Charset::Utf8.encode("ß"), "ß".as_bytes());
    }
}
