//! OpenPGP packet framing.
//!
//! The writer side emits a single packet body in partial length parts
//! so an arbitrarily large body never has to be buffered whole; the
//! reader side parses headers in both the current and the legacy packet
//! format and follows partial length continuations.

use std::io::{self, Read, Write};

use pgp::types::{Tag, Version};

/// Largest partial body part the length encoding can express.
pub const MAX_PARTIAL: usize = 1 << 30;

/// Body length announced by a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    Fixed(u64),
    /// First part of a partially framed body; continuations follow.
    Partial(u32),
    /// Legacy length type 3: the body runs to the end of the input.
    Indeterminate,
}

#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub tag: u8,
    pub version: Version,
    pub length: BodyLength,
}

pub(crate) fn read_u8(reader: &mut (impl Read + ?Sized)) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16_be(reader: &mut (impl Read + ?Sized)) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32_be(reader: &mut (impl Read + ?Sized)) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn invalid(reason: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

/// Reads the next packet header; `Ok(None)` on clean end of input.
pub fn read_header(reader: &mut (impl Read + ?Sized)) -> io::Result<Option<PacketHeader>> {
    let mut first = [0u8; 1];
    if reader.read(&mut first)? == 0 {
        return Ok(None);
    }
    let first = first[0];
    if first & 0x80 == 0 {
        return Err(invalid("invalid packet header"));
    }
    if first & 0x40 != 0 {
        return Ok(Some(PacketHeader {
            tag: first & 0x3f,
            version: Version::New,
            length: read_new_length(reader)?,
        }));
    }
    let length = match first & 0x03 {
        0 => BodyLength::Fixed(u64::from(read_u8(reader)?)),
        1 => BodyLength::Fixed(u64::from(read_u16_be(reader)?)),
        2 => BodyLength::Fixed(u64::from(read_u32_be(reader)?)),
        _ => BodyLength::Indeterminate,
    };
    Ok(Some(PacketHeader {
        tag: (first >> 2) & 0x0f,
        version: Version::Old,
        length,
    }))
}

/// Reads a new-format length field, as used both in headers and in
/// partial length continuations.
fn read_new_length(reader: &mut (impl Read + ?Sized)) -> io::Result<BodyLength> {
    let first = read_u8(reader)?;
    Ok(match first {
        0..=191 => BodyLength::Fixed(u64::from(first)),
        192..=223 => {
            let second = read_u8(reader)?;
            BodyLength::Fixed(((u64::from(first) - 192) << 8) + u64::from(second) + 192)
        }
        255 => BodyLength::Fixed(u64::from(read_u32_be(reader)?)),
        _ => BodyLength::Partial(1u32 << (first & 0x1f)),
    })
}

fn write_fixed_length(writer: &mut impl Write, len: usize) -> io::Result<()> {
    if len < 192 {
        writer.write_all(&[len as u8])
    } else if len < 8384 {
        let adjusted = len - 192;
        writer.write_all(&[(adjusted >> 8) as u8 + 192, adjusted as u8])
    } else {
        let mut buf = [0u8; 5];
        buf[0] = 255;
        buf[1..].copy_from_slice(&(len as u32).to_be_bytes());
        writer.write_all(&buf)
    }
}

/// Streams one packet body.
///
/// Data is buffered up to `chunk` bytes and flushed as partial length
/// parts; whatever remains at [`PacketBodyWriter::finish`] becomes the
/// final fixed length part, or the whole packet if nothing was flushed
/// before. `chunk` must be a power of two between 1 KiB and
/// [`MAX_PARTIAL`].
pub struct PacketBodyWriter<W: Write> {
    sink: W,
    tag: Tag,
    chunk: usize,
    buf: Vec<u8>,
    started: bool,
}

impl<W: Write> PacketBodyWriter<W> {
    pub fn new(sink: W, tag: Tag, chunk: usize) -> Self {
        debug_assert!(chunk.is_power_of_two() && (1024..=MAX_PARTIAL).contains(&chunk));
        PacketBodyWriter {
            sink,
            tag,
            chunk,
            buf: Vec::with_capacity(chunk.min(64 * 1024)),
            started: false,
        }
    }

    fn emit_partial(&mut self) -> io::Result<()> {
        if !self.started {
            self.sink.write_all(&[self.tag.encode()])?;
            self.started = true;
        }
        let exponent = self.chunk.trailing_zeros() as u8;
        self.sink.write_all(&[224 + exponent])?;
        self.sink.write_all(&self.buf[..self.chunk])?;
        self.buf.drain(..self.chunk);
        Ok(())
    }

    /// Writes the final length part and returns the wrapped sink.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.started {
            self.sink.write_all(&[self.tag.encode()])?;
        }
        write_fixed_length(&mut self.sink, self.buf.len())?;
        self.sink.write_all(&self.buf)?;
        Ok(self.sink)
    }
}

impl<W: Write> Write for PacketBodyWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while self.buf.len() > self.chunk {
            self.emit_partial()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Reads exactly one packet body, following partial length
/// continuations, and leaves the underlying reader positioned at the
/// next packet header.
pub struct BodyReader<R> {
    source: R,
    remaining: u64,
    partial: bool,
    indeterminate: bool,
    done: bool,
}

impl<R: Read> BodyReader<R> {
    pub fn new(source: R, length: BodyLength) -> Self {
        let (remaining, partial, indeterminate) = match length {
            BodyLength::Fixed(n) => (n, false, false),
            BodyLength::Partial(n) => (u64::from(n), true, false),
            BodyLength::Indeterminate => (u64::MAX, false, true),
        };
        BodyReader {
            source,
            remaining,
            partial,
            indeterminate,
            done: false,
        }
    }
}

impl<R: Read> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.done || buf.is_empty() {
                return Ok(0);
            }
            if self.remaining == 0 {
                if !self.partial {
                    self.done = true;
                    return Ok(0);
                }
                match read_new_length(&mut self.source)? {
                    BodyLength::Fixed(n) => {
                        self.remaining = n;
                        self.partial = false;
                    }
                    BodyLength::Partial(n) => self.remaining = u64::from(n),
                    BodyLength::Indeterminate => {
                        return Err(invalid("invalid partial length continuation"))
                    }
                }
                continue;
            }
            let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
            let read = self.source.read(&mut buf[..want])?;
            if read == 0 {
                if self.indeterminate {
                    self.done = true;
                    return Ok(0);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated packet body",
                ));
            }
            self.remaining -= read as u64;
            return Ok(read);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(len: usize, chunk: usize) {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let mut writer = PacketBodyWriter::new(Vec::new(), Tag::LiteralData, chunk);
        writer.write_all(&data).unwrap();
        let encoded = writer.finish().unwrap();

        let mut cursor = &encoded[..];
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, u8::from(Tag::LiteralData));
        let mut body = Vec::new();
        BodyReader::new(&mut cursor, header.length)
            .read_to_end(&mut body)
            .unwrap();
        assert_eq!(body, data, "len {} chunk {}", len, chunk);
        assert!(cursor.is_empty(), "trailing bytes for len {}", len);
    }

    #[test]
    fn partial_framing_roundtrips() {
        for len in [0, 1, 191, 192, 1024, 1025, 5000, 8384, 70_000] {
            roundtrip(len, 1024);
        }
        roundtrip(100_000, 4096);
    }

    #[test]
    fn small_body_is_a_single_fixed_packet() {
        let mut writer = PacketBodyWriter::new(Vec::new(), Tag::Marker, 1024);
        writer.write_all(b"PGP").unwrap();
        let encoded = writer.finish().unwrap();
        assert_eq!(encoded, [Tag::Marker.encode(), 3, b'P', b'G', b'P']);
    }

    #[test]
    fn legacy_header_formats() {
        // old format, tag 1, one octet length
        let bytes = [0x84, 0x03, 0xAA, 0xBB, 0xCC];
        let mut cursor = &bytes[..];
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, 1);
        assert_eq!(header.version, Version::Old);
        assert_eq!(header.length, BodyLength::Fixed(3));

        // old format, two octet length
        let bytes = [0x85, 0x01, 0x0C];
        let mut cursor = &bytes[..];
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.length, BodyLength::Fixed(268));

        // not a header at all
        let bytes = [0x2A];
        assert!(read_header(&mut &bytes[..]).is_err());
        // clean end of input
        assert!(read_header(&mut &[][..]).unwrap().is_none());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut writer = PacketBodyWriter::new(Vec::new(), Tag::LiteralData, 1024);
        writer.write_all(&[7u8; 2000]).unwrap();
        let mut encoded = writer.finish().unwrap();
        encoded.truncate(encoded.len() - 10);

        let mut cursor = &encoded[..];
        let header = read_header(&mut cursor).unwrap().unwrap();
        let err = BodyReader::new(&mut cursor, header.length)
            .read_to_end(&mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
