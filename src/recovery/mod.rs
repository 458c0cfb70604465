//! Repair of deliberately corrupted UPX headers.

pub mod repair;

pub use repair::{
    normalize_markers, repair_filesize_and_blocksize, MarkerAnomaly, RepairError, RepairReport,
};
