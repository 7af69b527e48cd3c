use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::store::{Section, NUM_SECTIONS, VERSION};
use crate::Result;

pub trait StreamWriter {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<usize>;
}

/// The `[frequencies]` section: for each n-gram level, a u32 length followed
/// by that many u32 count values in ascending order.
pub struct FreqTables<'a>(pub &'a [Vec<u64>]);

impl StreamWriter for FreqTables<'_> {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<usize> {
        let mut n = 0;
        for level in self.0 {
            w.write_u32::<LittleEndian>(level.len() as u32)?;
            n += 4;
            for &count in level {
                debug_assert!(count < 1 << 32);
                w.write_u32::<LittleEndian>(count as u32)?;
                n += 4;
            }
        }
        Ok(n)
    }
}

/// The `[vocab]` section: a u32 index-entry count, the u32 entries (byte
/// offsets into the uncompressed blob), then the gzip-compressed blob of
/// null-terminated tokens in id order.
pub struct VocabSection<'a> {
    pub index: &'a [u32],
    pub blob: &'a [u8],
}

impl StreamWriter for VocabSection<'_> {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<usize> {
        let mut n = 0;
        w.write_u32::<LittleEndian>(self.index.len() as u32)?;
        n += 4;
        for &off in self.index {
            w.write_u32::<LittleEndian>(off)?;
            n += 4;
        }
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(self.blob)?;
        let packed = enc.finish()?;
        w.write_all(&packed)?;
        Ok(n + packed.len())
    }
}

/// Assembles the artifact in memory: the version tag, the fixed table of ten
/// section offsets, and the labeled section bodies. The whole buffer is
/// emitted with a single write so consumers never observe a partial file.
pub struct ArtifactWriter {
    buf: Vec<u8>,
}

impl ArtifactWriter {
    pub fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(VERSION);
        buf.resize(buf.len() + 4 * NUM_SECTIONS, 0);
        Self { buf }
    }

    pub fn pos(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Write a 16-byte zero-padded section label, 4-byte aligned.
    pub fn label(&mut self, text: &str) {
        while self.buf.len() & 3 != 0 {
            self.buf.push(0);
        }
        assert!(text.len() <= 16);
        self.buf.extend_from_slice(text.as_bytes());
        self.buf.resize(self.buf.len() + (16 - text.len()), 0);
    }

    /// Point a header slot at the current position.
    pub fn begin(&mut self, section: Section) {
        let pos = self.pos();
        self.set_offset(section, pos);
    }

    /// Point a header slot at an already-written position.
    pub fn set_offset(&mut self, section: Section, pos: u32) {
        let at = VERSION.len() + 4 * section as usize;
        LittleEndian::write_u32(&mut self.buf[at..at + 4], pos);
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for ArtifactWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut w = ArtifactWriter::new();
        assert_eq!(w.pos() as usize, 16 + 4 * NUM_SECTIONS);
        w.label("[frequencies]");
        // The label is 16 bytes and the header table is already aligned.
        assert_eq!(w.pos() as usize, 16 + 4 * NUM_SECTIONS + 16);
        w.begin(Section::Freqs);
        let here = w.pos();
        w.write_bytes(&[1, 2, 3]);
        w.label("[trie]");
        assert_eq!(w.pos() % 4, 0);
        let bytes = w.finish();
        assert_eq!(&bytes[..16], VERSION);
        let slot = 16 + 4 * Section::Freqs as usize;
        assert_eq!(LittleEndian::read_u32(&bytes[slot..slot + 4]), here);
    }
}
