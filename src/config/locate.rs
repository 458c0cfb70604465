//! Locating the encrypted config window inside a sample.

use super::{ConfigError, CONFIG_TOTAL_SIZE, MOZI_CONFIG_HEADER};
use crate::magic::find_first;

/// The encrypted config span: `CONFIG_TOTAL_SIZE` bytes from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigWindow<'a> {
    /// Offset of the encrypted header in the sample.
    pub offset: usize,
    pub bytes:  &'a [u8],
}

/// Find the first encrypted header and borrow the window that follows it.
///
/// A header too close to the end of the buffer to hold a full window is
/// treated the same as no header at all.
pub fn locate(data: &[u8]) -> Result<ConfigWindow<'_>, ConfigError> {
    let offset = find_first(data, &MOZI_CONFIG_HEADER).ok_or(ConfigError::HeaderNotFound)?;
    let end = offset
        .checked_add(CONFIG_TOTAL_SIZE)
        .filter(|&end| end <= data.len())
        .ok_or(ConfigError::HeaderNotFound)?;

    tracing::debug!(offset, "found encrypted config header");
    Ok(ConfigWindow { offset, bytes: &data[offset..end] })
}
