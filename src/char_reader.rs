//! Encoding-aware chunked reader producing a refillable character buffer (§4.1).

use std::fs::File;
use std::io::Read as IoRead;
use std::path::Path;

use encoding_rs::{Decoder as RsDecoder, Encoding, UTF_16BE, UTF_16LE, UTF_8};

use crate::error::{Error, Result};

/// Size, in bytes, of each raw chunk pulled from the underlying source
/// before decoding. Unrelated to the parser's `MIN_BUFFER_SIZE` (§4.3),
/// which operates on decoded `char`s.
const CHUNK_SIZE: usize = 8192;

/// How the encoding in use was determined, mirroring the teacher's
/// `EncodingRef` state machine (`Implicit -> BomDetected -> XmlDetected`,
/// see `examples/999eagle-quick-xml/src/reader.rs`): a BOM-detected guess
/// can still be overridden by a later `<?xml encoding="..."?>` declaration,
/// but an explicit declaration is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodingState {
    Implicit(&'static Encoding),
    BomDetected(&'static Encoding),
    Explicit(&'static Encoding),
}

impl EncodingState {
    fn encoding(&self) -> &'static Encoding {
        match self {
            Self::Implicit(e) | Self::BomDetected(e) | Self::Explicit(e) => e,
        }
    }

    fn can_be_refined(&self) -> bool {
        !matches!(self, Self::Explicit(_))
    }
}

/// Sniffs a byte-order mark at the front of `bytes`, returning the encoding
/// and the number of BOM bytes to discard.
fn detect_bom(bytes: &[u8]) -> Option<(&'static Encoding, usize)> {
    if bytes.starts_with(b"\xEF\xBB\xBF") {
        Some((UTF_8, 3))
    } else if bytes.starts_with(b"\xFF\xFE") {
        Some((UTF_16LE, 2))
    } else if bytes.starts_with(b"\xFE\xFF") {
        Some((UTF_16BE, 2))
    } else {
        None
    }
}

/// Best-effort sniff of a leading `<?xml ... encoding="..." ?>` declaration
/// directly in the raw byte prefix, used only to pick the initial decoder
/// before any character has been produced. The parser re-parses the
/// declaration properly once decoding is underway and may call
/// [`CharReader::set_encoding`] to refine the guess (§4.3 "XML declaration").
fn sniff_declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let prefix = &bytes[..bytes.len().min(256)];
    let text = String::from_utf8_lossy(prefix);
    let decl_start = text.find("<?xml")?;
    let decl_end = text[decl_start..].find("?>")? + decl_start;
    let decl = &text[decl_start..decl_end];
    let key = "encoding";
    let idx = decl.find(key)?;
    let rest = decl[idx + key.len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[quote.len_utf8()..];
    let end = rest.find(quote)?;
    let name = &rest[..end];
    Encoding::for_label(name.as_bytes())
}

/// Encoding-aware chunked reader producing a refillable character buffer.
///
/// Reads raw bytes from an underlying [`std::io::Read`] in fixed-size
/// chunks and incrementally decodes them with `encoding_rs`, so multi-byte
/// sequences split across a chunk boundary are carried over rather than
/// mangled. `read()` returns the next decoded chunk (empty string at EOF).
pub struct CharReader<R> {
    source: R,
    decoder: RsDecoder,
    state: EncodingState,
    raw_buf: Vec<u8>,
    first_chunk: bool,
    eof: bool,
}

impl CharReader<File> {
    /// Opens `path` and sniffs its encoding, unless `forced_encoding` is
    /// given (in which case sniffing is skipped and the decoder is locked).
    pub fn open(path: impl AsRef<Path>, forced_encoding: Option<&str>) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {}", path.as_ref().display(), e))))?;
        Self::new(file, forced_encoding)
    }
}

impl<R: IoRead> CharReader<R> {
    pub fn new(source: R, forced_encoding: Option<&str>) -> Result<Self> {
        let state = match forced_encoding {
            Some(label) => {
                let enc = Encoding::for_label(label.as_bytes())
                    .ok_or_else(|| Error::Encoding(format!("unknown encoding label `{}`", label)))?;
                EncodingState::Explicit(enc)
            }
            None => EncodingState::Implicit(UTF_8),
        };
        Ok(Self {
            source,
            decoder: state.encoding().new_decoder(),
            state,
            raw_buf: Vec::with_capacity(CHUNK_SIZE),
            first_chunk: true,
            eof: false,
        })
    }

    /// The encoding currently in effect.
    pub fn encoding(&self) -> &'static Encoding {
        self.state.encoding()
    }

    /// Called by the parser once it has parsed an `<?xml ... encoding=?>`
    /// declaration; refines the guess unless an encoding was already forced
    /// or already confirmed from the declaration itself (§4.1/§4.3).
    pub fn set_encoding(&mut self, label: &str) -> Result<()> {
        if !self.state.can_be_refined() {
            return Ok(());
        }
        let enc = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| Error::Encoding(format!("unknown encoding label `{}`", label)))?;
        self.state = EncodingState::Explicit(enc);
        self.decoder = enc.new_decoder();
        Ok(())
    }

    /// Returns the next decoded chunk, or an empty string at end of input.
    pub fn read(&mut self) -> Result<String> {
        if self.eof {
            return Ok(String::new());
        }
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let n = self.source.read(&mut chunk).map_err(Error::from)?;
        if n == 0 {
            self.eof = true;
            let mut out = String::new();
            let (_, _, had_errors) = self.decoder.decode_to_string(&[], &mut out, true);
            if had_errors {
                return Err(Error::Encoding("invalid code unit at end of input".to_string()));
            }
            return Ok(out);
        }
        chunk.truncate(n);

        if self.first_chunk {
            self.first_chunk = false;
            if self.state.can_be_refined() {
                if let Some((enc, bom_len)) = detect_bom(&chunk) {
                    self.state = EncodingState::BomDetected(enc);
                    self.decoder = enc.new_decoder();
                    chunk.drain(..bom_len);
                } else if let Some(enc) = sniff_declared_encoding(&chunk) {
                    self.state = EncodingState::BomDetected(enc);
                    self.decoder = enc.new_decoder();
                }
            }
        }

        let mut out = String::with_capacity(chunk.len());
        let (_, _, had_errors) = self.decoder.decode_to_string(&chunk, &mut out, false);
        if had_errors {
            return Err(Error::Encoding(format!(
                "invalid {} code unit encountered while decoding",
                self.state.encoding().name()
            )));
        }
        Ok(out)
    }

    /// Whether a further call to [`CharReader::read`] could return more
    /// than an empty string.
    pub fn data_available(&self) -> bool {
        !self.eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_plain_utf8_in_one_chunk() {
        let mut r = CharReader::new(Cursor::new(b"<root/>".to_vec()), None).unwrap();
        let mut collected = String::new();
        loop {
            let s = r.read().unwrap();
            if s.is_empty() && !r.data_available() {
                break;
            }
            collected.push_str(&s);
        }
        assert_eq!(collected, "<root/>");
    }

    #[test]
    fn strips_utf8_bom() {
        let mut bytes = b"\xEF\xBB\xBF<root/>".to_vec();
        let mut r = CharReader::new(Cursor::new(std::mem::take(&mut bytes)), None).unwrap();
        let mut collected = String::new();
        loop {
            let s = r.read().unwrap();
            if s.is_empty() && !r.data_available() {
                break;
            }
            collected.push_str(&s);
        }
        assert_eq!(collected, "<root/>");
        assert_eq!(r.encoding(), UTF_8);
    }

    #[test]
    fn decodes_utf16le_with_bom() {
        let text = "<r/>";
        let mut bytes = vec![0xFF, 0xFE];
        for u in text.encode_utf16() {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        let mut r = CharReader::new(Cursor::new(bytes), None).unwrap();
        let mut collected = String::new();
        loop {
            let s = r.read().unwrap();
            if s.is_empty() && !r.data_available() {
                break;
            }
            collected.push_str(&s);
        }
        assert_eq!(collected, "<r/>");
        assert_eq!(r.encoding(), UTF_16LE);
    }

    #[test]
    fn forced_encoding_is_not_refined() {
        let mut r = CharReader::new(Cursor::new(b"<root/>".to_vec()), Some("utf-8")).unwrap();
        assert!(r.set_encoding("utf-16").is_ok());
        assert_eq!(r.encoding(), UTF_8);
    }

    #[test]
    fn unknown_forced_encoding_is_an_error() {
        let result = CharReader::new(Cursor::new(b"".to_vec()), Some("not-a-real-encoding"));
        assert!(result.is_err());
    }
}
