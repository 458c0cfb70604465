//! `p_info` repair and marker normalisation.
//!
//! # How it works
//!
//! A UPX-packed ELF carries the `UPX!` marker several times: once in the
//! primary `l_info` header near the start of the file, and again in the
//! trailer near the end.  Mozi zeroes `p_filesize` and `p_blocksize` in the
//! primary header so `upx -d` refuses the file with "p_info corrupted".  The
//! true value survives six doublewords past the trailer marker, so the
//! repair copies those four bytes back into both zeroed slots.
//!
//! Some samples also replace every marker with a private value.  Rewriting
//! the markers to `UPX!` ([`normalize_markers`]) must happen before the size
//! repair so that upx recognises the structure at all.
//!
//! ## Marker count
//!
//! | Occurrences | Outcome |
//! |-------------|---------|
//! | 0 | [`RepairError::NoOccurrences`] |
//! | 1 or 2 | Repaired, flagged [`MarkerAnomaly::TooFew`] |
//! | 3 | Repaired, no anomaly |
//! | more than 3 | Repaired from first and last only, flagged [`MarkerAnomaly::TooMany`] |

use thiserror::Error;
use tracing::{debug, warn};

use crate::header::{self, LayoutError, P_BLOCKSIZE, P_FILESIZE, TRAILER_VALUE_OFFSET};

/// Marker count of a well-formed UPX ELF: `l_info`, packed stub and trailer.
pub const EXPECTED_MARKERS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RepairError {
    #[error("No magic number occurrences to repair from")]
    NoOccurrences,
    #[error("Repair offset {offset} is outside the {len}-byte buffer")]
    OutOfBounds { offset: usize, len: usize },
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Non-fatal observation about the marker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerAnomaly {
    /// Fewer markers than expected; the file may still be unpackable.
    TooFew(usize),
    /// Extra markers; only the first and last were used.
    TooMany(usize),
}

impl MarkerAnomaly {
    pub fn classify(count: usize) -> Option<Self> {
        match count {
            c if c < EXPECTED_MARKERS => Some(MarkerAnomaly::TooFew(c)),
            c if c > EXPECTED_MARKERS => Some(MarkerAnomaly::TooMany(c)),
            _ => None,
        }
    }
}

/// What [`repair_filesize_and_blocksize`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Offset of `p_filesize` that was overwritten.
    pub filesize_offset:  usize,
    /// Offset of `p_blocksize` that was overwritten.
    pub blocksize_offset: usize,
    /// Offset the canonical value was copied from.
    pub source_offset:    usize,
    /// The four bytes written into both slots.
    pub value:            [u8; 4],
    pub anomaly:          Option<MarkerAnomaly>,
}

impl RepairReport {
    /// True when the marker count suggests the result may still not unpack.
    pub fn possibly_unrepairable(&self) -> bool {
        matches!(self.anomaly, Some(MarkerAnomaly::TooFew(_)))
    }
}

/// Overwrite every occurrence with `canonical`.
///
/// Offsets whose span would run past the end of `data` are rejected before
/// anything is written.
pub fn normalize_markers(
    data:        &mut [u8],
    occurrences: &[usize],
    canonical:   &[u8],
) -> Result<(), RepairError> {
    let len = data.len();
    if let Some(&bad) = occurrences.iter().find(|&&o| o + canonical.len() > len) {
        return Err(RepairError::OutOfBounds { offset: bad, len });
    }
    for &offset in occurrences {
        data[offset..offset + canonical.len()].copy_from_slice(canonical);
    }
    debug!(count = occurrences.len(), "normalised magic numbers");
    Ok(())
}

/// Restore `p_filesize` and `p_blocksize` of the first header from the word
/// six doublewords past the last marker.
pub fn repair_filesize_and_blocksize(
    data:        &mut [u8],
    occurrences: &[usize],
) -> Result<RepairReport, RepairError> {
    let (&primary, &trailer) = match (occurrences.first(), occurrences.last()) {
        (Some(p), Some(t)) => (p, t),
        _ => return Err(RepairError::NoOccurrences),
    };

    let anomaly = MarkerAnomaly::classify(occurrences.len());
    match anomaly {
        Some(MarkerAnomaly::TooFew(n)) => warn!(
            found = n,
            "missing one or more UPX magic numbers, file may not be able to be unpacked"
        ),
        Some(MarkerAnomaly::TooMany(n)) => warn!(found = n, "file contains more than 3 UPX magic numbers"),
        None => {}
    }

    let filesize_offset = primary + header::offset_of(P_FILESIZE.name)?;
    let blocksize_offset = primary + header::offset_of(P_BLOCKSIZE.name)?;
    let source_offset = trailer + TRAILER_VALUE_OFFSET;

    let len = data.len();
    for offset in [source_offset, filesize_offset, blocksize_offset] {
        if offset + 4 > len {
            return Err(RepairError::OutOfBounds { offset, len });
        }
    }

    let mut value = [0u8; 4];
    value.copy_from_slice(&data[source_offset..source_offset + 4]);
    data[filesize_offset..filesize_offset + 4].copy_from_slice(&value);
    data[blocksize_offset..blocksize_offset + 4].copy_from_slice(&value);

    debug!(
        primary,
        trailer,
        value = %hex::encode(value),
        "restored p_filesize and p_blocksize"
    );

    Ok(RepairReport {
        filesize_offset,
        blocksize_offset,
        source_offset,
        value,
        anomaly,
    })
}
