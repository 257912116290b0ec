//! Streaming ASCII armor writer.
//!
//! Base64 output is wrapped at 64 characters per line and followed by
//! the CRC-24 checksum line and the end marker. Reading armored input
//! is handled by rPGP's `Dearmor`, which already streams.

use std::hash::Hasher;
use std::io::{self, Write};

use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use base64::Engine;
use crc24::Crc24Hasher;

const LINE_WIDTH: usize = 64;

/// Armor block label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLabel {
    Message,
    Signature,
}

impl BlockLabel {
    fn text(self) -> &'static str {
        match self {
            BlockLabel::Message => "PGP MESSAGE",
            BlockLabel::Signature => "PGP SIGNATURE",
        }
    }
}

/// Inserts a newline after every [`LINE_WIDTH`] bytes written.
struct LineWrapper<W: Write> {
    sink: W,
    column: usize,
}

impl<W: Write> Write for LineWrapper<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let room = LINE_WIDTH - self.column;
        let len = buf.len().min(room);
        self.sink.write_all(&buf[..len])?;
        self.column += len;
        if self.column == LINE_WIDTH {
            self.sink.write_all(b"\n")?;
            self.column = 0;
        }
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Writes one armor block around a binary packet stream.
pub struct ArmorWriter<W: Write> {
    encoder: EncoderWriter<'static, base64::engine::GeneralPurpose, LineWrapper<W>>,
    crc: Crc24Hasher,
    label: BlockLabel,
}

impl<W: Write> ArmorWriter<W> {
    pub fn new(mut sink: W, label: BlockLabel) -> io::Result<Self> {
        write!(sink, "-----BEGIN {}-----\n\n", label.text())?;
        Ok(ArmorWriter {
            encoder: EncoderWriter::new(LineWrapper { sink, column: 0 }, &STANDARD),
            crc: Crc24Hasher::new(),
            label,
        })
    }

    /// Closes the base64 stream, writes the checksum line and the end
    /// marker, and returns the sink.
    pub fn finish(self) -> io::Result<W> {
        let ArmorWriter { mut encoder, crc, label } = self;
        let wrapper = encoder.finish()?;
        let column = wrapper.column;
        let mut sink = wrapper.sink;
        if column != 0 {
            sink.write_all(b"\n")?;
        }
        let checksum = crc.finish();
        let bytes = [
            (checksum >> 16) as u8,
            (checksum >> 8) as u8,
            checksum as u8,
        ];
        writeln!(sink, "={}", STANDARD.encode(bytes))?;
        writeln!(sink, "-----END {}-----", label.text())?;
        Ok(sink)
    }
}

impl<W: Write> Write for ArmorWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.encoder.write(buf)?;
        self.crc.write(&buf[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn armored_block_dearmores_to_the_input() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let mut armor = ArmorWriter::new(Vec::new(), BlockLabel::Message).unwrap();
        armor.write_all(&data).unwrap();
        let armored = armor.finish().unwrap();

        let text = String::from_utf8(armored.clone()).unwrap();
        assert!(text.starts_with("-----BEGIN PGP MESSAGE-----\n\n"));
        assert!(text.trim_end().ends_with("-----END PGP MESSAGE-----"));
        assert!(text.lines().all(|line| line.len() <= LINE_WIDTH));

        // rPGP's reader validates the embedded checksum
        let mut decoded = Vec::new();
        pgp::armor::Dearmor::new(&armored[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn signature_label() {
        let mut armor = ArmorWriter::new(Vec::new(), BlockLabel::Signature).unwrap();
        armor.write_all(b"xyz").unwrap();
        let text = String::from_utf8(armor.finish().unwrap()).unwrap();
        assert!(text.starts_with("-----BEGIN PGP SIGNATURE-----"));
        assert!(text.contains("\n=")); // checksum line
    }
}
