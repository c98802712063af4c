//! SSTable footer constants and read/write helpers.
//!
//! ```text
//! [max_seq: u64 LE][range_del_offset: u64 LE][index_offset: u64 LE][magic: u32 LE]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Result as IoResult, Seek, SeekFrom, Write};

/// Magic number identifying an SSTable file (ASCII "SPL1").
pub const SSTABLE_MAGIC: u32 = 0x5350_4C31;

/// Footer size: 8 (`max_seq`) + 8 (`range_del_offset`) + 8 (`index_offset`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 8 + 8 + 4;

/// Parsed SSTable footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub max_seq: u64,
    pub range_del_offset: u64,
    pub index_offset: u64,
}

pub fn write_footer<W: Write>(w: &mut W, footer: &Footer) -> IoResult<()> {
    w.write_u64::<LittleEndian>(footer.max_seq)?;
    w.write_u64::<LittleEndian>(footer.range_del_offset)?;
    w.write_u64::<LittleEndian>(footer.index_offset)?;
    w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
    Ok(())
}

/// Reads and validates the footer at the end of `r`.
pub fn read_footer<R: Read + Seek>(r: &mut R) -> IoResult<Footer> {
    let filesize = r.seek(SeekFrom::End(0))?;
    if filesize < FOOTER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file too small for SSTable footer",
        ));
    }

    r.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
    let max_seq = r.read_u64::<LittleEndian>()?;
    let range_del_offset = r.read_u64::<LittleEndian>()?;
    let index_offset = r.read_u64::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;

    if magic != SSTABLE_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown SSTable magic: {:#x}", magic),
        ));
    }
    let data_end = filesize - FOOTER_BYTES;
    if range_del_offset > index_offset || index_offset > data_end {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "SSTable section offsets out of order",
        ));
    }

    Ok(Footer {
        max_seq,
        range_del_offset,
        index_offset,
    })
}
