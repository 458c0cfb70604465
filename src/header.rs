//! Fixed layout of the UPX `l_info` / `p_info` headers that follow a marker.
//!
//! Byte offsets are relative to the start of the marker occurrence:
//!
//! | Offset | Size | Field         | Struct   |
//! |--------|------|---------------|----------|
//! | 0      | 4    | `l_magic`     | `l_info` |
//! | 4      | 2    | `l_lsize`     | `l_info` |
//! | 6      | 1    | `l_version`   | `l_info` |
//! | 7      | 1    | `l_format`    | `l_info` |
//! | 8      | 4    | `p_progid`    | `p_info` |
//! | 12     | 4    | `p_filesize`  | `p_info` |
//! | 16     | 4    | `p_blocksize` | `p_info` |

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};
use thiserror::Error;

/// Distance from the trailer marker to the canonical size word:
/// six doublewords past the start of the marker.
pub const TRAILER_VALUE_OFFSET: usize = 6 * 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Unknown header field: {0}")]
    UnknownField(String),
}

/// One named, fixed-size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub size: usize,
}

/// An ordered run of contiguous fields.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub fields: &'static [FieldSpec],
}

pub const L_MAGIC:     FieldSpec = FieldSpec { name: "l_magic",     size: 4 };
pub const L_LSIZE:     FieldSpec = FieldSpec { name: "l_lsize",     size: 2 };
pub const L_VERSION:   FieldSpec = FieldSpec { name: "l_version",   size: 1 };
pub const L_FORMAT:    FieldSpec = FieldSpec { name: "l_format",    size: 1 };
pub const P_PROGID:    FieldSpec = FieldSpec { name: "p_progid",    size: 4 };
pub const P_FILESIZE:  FieldSpec = FieldSpec { name: "p_filesize",  size: 4 };
pub const P_BLOCKSIZE: FieldSpec = FieldSpec { name: "p_blocksize", size: 4 };

/// `l_info` as seen from the marker onward.
pub const LOADER_LAYOUT: Layout = Layout {
    fields: &[L_MAGIC, L_LSIZE, L_VERSION, L_FORMAT],
};

/// `p_info`, which sits directly after `l_info`.
pub const PACKED_BLOCK_LAYOUT: Layout = Layout {
    fields: &[P_PROGID, P_FILESIZE, P_BLOCKSIZE],
};

/// `l_info` followed by `p_info`; the order offsets are computed against.
pub const UPX_HEADER: Layout = Layout {
    fields: &[L_MAGIC, L_LSIZE, L_VERSION, L_FORMAT, P_PROGID, P_FILESIZE, P_BLOCKSIZE],
};

impl Layout {
    /// Offset of `name` from the start of the layout: the sum of the sizes of
    /// every field declared before it.
    pub fn offset_of(&self, name: &str) -> Result<usize, LayoutError> {
        let mut offset = 0usize;
        for field in self.fields {
            if field.name == name {
                return Ok(offset);
            }
            offset += field.size;
        }
        Err(LayoutError::UnknownField(name.to_string()))
    }

    /// Total byte size of the layout.
    pub fn size(&self) -> usize {
        self.fields.iter().map(|f| f.size).sum()
    }
}

/// Offset of `name` within [`UPX_HEADER`].
pub fn offset_of(name: &str) -> Result<usize, LayoutError> {
    UPX_HEADER.offset_of(name)
}

/// Decoded view of the header following one marker occurrence.
///
/// Used for diagnostics only; repair works on raw bytes and never
/// interprets the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackHeader {
    pub magic:       [u8; 4],
    pub lsize:       u16,
    pub version:     u8,
    pub format:      u8,
    pub progid:      u32,
    pub filesize:    u32,
    pub blocksize:   u32,
}

impl PackHeader {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            lsize:     reader.read_u16::<LittleEndian>()?,
            version:   reader.read_u8()?,
            format:    reader.read_u8()?,
            progid:    reader.read_u32::<LittleEndian>()?,
            filesize:  reader.read_u32::<LittleEndian>()?,
            blocksize: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// Read the header at `offset` in `data`, if enough bytes remain.
    pub fn at(data: &[u8], offset: usize) -> Option<Self> {
        let end = offset.checked_add(UPX_HEADER.size())?;
        let slice = data.get(offset..end)?;
        Self::read(slice).ok()
    }

    /// Zeroed size fields are the signature of `p_info` corruption.
    pub fn sizes_zeroed(&self) -> bool {
        self.filesize == 0 && self.blocksize == 0
    }
}
