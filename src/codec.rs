use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;

/// Incremental charset → UTF-8 decoder, framed over a raw byte stream.
///
/// Partial multi-byte sequences at a read boundary stay inside the
/// `encoding_rs` decoder state until the next read; malformed input becomes
/// U+FFFD. The final flush happens once, in `decode_eof`.
pub struct Utf8Transcoder {
    decoder: encoding_rs::Decoder,
    flushed: bool,
}

impl Utf8Transcoder {
    pub fn new(encoding: &'static encoding_rs::Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
            flushed: false,
        }
    }

    /// Decodes as much of `input` as fits and returns `(consumed, utf8)`.
    fn transcode(&mut self, input: &[u8], last: bool) -> (usize, BytesMut) {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(input.len())
            .unwrap_or_else(|| input.len().saturating_mul(3) + 4);
        let mut out = BytesMut::zeroed(capacity);
        let (_result, consumed, written, _replaced) =
            self.decoder.decode_to_utf8(input, &mut out, last);
        out.truncate(written);
        (consumed, out)
    }
}

impl Decoder for Utf8Transcoder {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let (consumed, out) = self.transcode(src, false);
        src.advance(consumed);
        Ok((!out.is_empty()).then_some(out))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.flushed {
            src.clear();
            return Ok(None);
        }
        let (_consumed, out) = self.transcode(src, true);
        src.clear();
        self.flushed = true;
        Ok((!out.is_empty()).then_some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_1252_bytes_become_utf8() {
        let mut codec = Utf8Transcoder::new(encoding_rs::WINDOWS_1252);
        let mut src = BytesMut::from(&b"caf\xe9,1\n"[..]);
        let out = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&out[..], "café,1\n".as_bytes());
        assert!(src.is_empty());
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
    }

    #[test]
    fn split_utf16_unit_is_held_until_next_read() {
        let mut codec = Utf8Transcoder::new(encoding_rs::UTF_16LE);
        let mut src = BytesMut::from(&b"a\x00b"[..]);
        let first = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&first[..], b"a");
        src.extend_from_slice(b"\x00");
        let second = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&second[..], b"b");
    }
}
