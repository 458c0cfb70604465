//! UPX unpacking with corrupted-header repair.
//!
//! [`Unpacker::unpack`] drives one sample through:
//!
//! 1. read the file;
//! 2. require the configured marker, else [`UnpackError::NotUpxPacked`];
//! 3. run the decompressor; success ends here;
//! 4. with a custom marker, rewrite it to `UPX!`, persist and retry once;
//! 5. classify the diagnostic and repair `p_info`, or give up;
//! 6. persist and run the decompressor a final time.
//!
//! ```no_run
//! use mozibgone::unpack::{Unpacker, UnpackOptions, UpxTool};
//!
//! let unpacker = Unpacker::new("sample.bin", UnpackOptions::default(), UpxTool::default());
//! unpacker.unpack()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod tool;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::header::PackHeader;
use crate::magic::{find_all, UPX_MAGIC};
use crate::recovery::{normalize_markers, repair_filesize_and_blocksize, RepairError, RepairReport};

pub use tool::{classify, interpret, Attempt, Decompressor, RepairStrategy, ToolOutput, UpxTool};

#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("The file in question is not packed with UPX.")]
    NotUpxPacked,
    #[error("{0}")]
    Unpack(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<RepairError> for UnpackError {
    fn from(e: RepairError) -> Self {
        UnpackError::Unpack(format!("Header repair failed: {e}"))
    }
}

// ── UnpackOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`Unpacker::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackOptions {
    /// Marker to look for; anything other than `UPX!` is treated as an
    /// obfuscated stand-in and normalised before repair.
    pub magic:  Vec<u8>,
    /// Where the unpacked file goes.  `None` overwrites the input.
    pub output: Option<PathBuf>,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            magic:  UPX_MAGIC.to_vec(),
            output: None,
        }
    }
}

impl UnpackOptions {
    pub fn is_custom_magic(&self) -> bool {
        self.magic.as_slice() != UPX_MAGIC
    }
}

/// What it took to unpack a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnpackOutcome {
    /// The decompressor accepted the file as-is.
    Clean,
    /// Rewriting the custom marker was enough.
    Normalized,
    /// `p_info` was repaired.
    Repaired(RepairReport),
}

// ── Unpacker ──────────────────────────────────────────────────────────────────

/// Unpacks one sample.  Owns its buffer for the duration of [`Self::unpack`].
#[derive(Debug)]
pub struct Unpacker<D> {
    path: PathBuf,
    opts: UnpackOptions,
    tool: D,
}

impl<D: Decompressor> Unpacker<D> {
    pub fn new(path: impl Into<PathBuf>, opts: UnpackOptions, tool: D) -> Self {
        debug!(magic = %hex::encode(&opts.magic), "using magic number");
        Self { path: path.into(), opts, tool }
    }

    /// The file that ends up holding the unpacked (or repaired) sample.
    pub fn output_path(&self) -> &Path {
        self.opts.output.as_deref().unwrap_or(self.path.as_path())
    }

    pub fn unpack(&self) -> Result<UnpackOutcome, UnpackError> {
        debug!(path = %self.path.display(), "reading sample");
        let mut data = fs::read(&self.path)?;

        let occurrences = find_all(&data, &self.opts.magic);
        if occurrences.is_empty() {
            return Err(UnpackError::NotUpxPacked);
        }
        debug!(?occurrences, "found magic number");
        if let Some(h) = PackHeader::at(&data, occurrences[0]) {
            debug!(progid = h.progid, filesize = h.filesize, blocksize = h.blocksize,
                   "primary p_info");
        }

        let mut message = match self.run(&self.path, self.opts.output.as_deref())? {
            Attempt::Unpacked => return Ok(UnpackOutcome::Clean),
            Attempt::Failed(msg) => msg,
        };
        debug!(%message, "first unpack attempt failed");

        // Set when the retry gave nothing to classify; the first message
        // predates normalisation and no longer describes the file.
        let mut strategy = None;
        if self.opts.is_custom_magic() {
            debug!("using custom magic number, fixing magics now");
            normalize_markers(&mut data, &occurrences, UPX_MAGIC)?;
            self.persist(&data)?;
            match self.run(self.output_path(), None) {
                Ok(Attempt::Unpacked) => return Ok(UnpackOutcome::Normalized),
                Ok(Attempt::Failed(msg)) => message = msg,
                Err(e) => {
                    debug!(error = %e, "retry after normalising magics was not diagnosable");
                    strategy = Some(RepairStrategy::FixPInfo);
                }
            }
        }

        let report = match strategy.unwrap_or_else(|| classify(&message)) {
            RepairStrategy::FixPInfo => repair_filesize_and_blocksize(&mut data, &occurrences)?,
            RepairStrategy::NotPacked => return Err(UnpackError::NotUpxPacked),
            RepairStrategy::Unsupported(msg) => {
                return Err(UnpackError::Unpack(format!("Cannot handle UPX error: `{msg}`")))
            }
        };
        if report.possibly_unrepairable() {
            warn!(path = %self.path.display(), "repaired with too few magic numbers");
        }

        self.persist(&data)?;
        match self.run(self.output_path(), None)? {
            Attempt::Unpacked => {
                info!(path = %self.output_path().display(), "unpacked after p_info repair");
                Ok(UnpackOutcome::Repaired(report))
            }
            Attempt::Failed(msg) => Err(UnpackError::Unpack(msg)),
        }
    }

    fn run(&self, input: &Path, output: Option<&Path>) -> Result<Attempt, UnpackError> {
        let out = self.tool.decompress(input, output).map_err(|e| {
            UnpackError::Unpack(format!("Failed to run the decompressor: {e}"))
        })?;
        interpret(&out)
    }

    fn persist(&self, data: &[u8]) -> Result<(), UnpackError> {
        let target = self.output_path();
        fs::write(target, data).map_err(|e| {
            UnpackError::Unpack(format!("Failed to write {}: {e}", target.display()))
        })?;
        debug!(path = %target.display(), bytes = data.len(), "written data");
        Ok(())
    }
}
