//! The external decompressor and the reading of its diagnostics.
//!
//! upx reports failures on stderr as
//!
//! ```text
//! upx: <file>: <ExceptionType>: <message>
//! ```
//!
//! Only that four-segment shape is diagnosable.  Every string contract the
//! repair strategy depends on lives in [`classify`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use super::UnpackError;

/// Captured result of one decompressor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub code:   i32,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Something that can decompress a packed file.
///
/// `output`, when set, receives the result instead of `input` being
/// overwritten.
pub trait Decompressor {
    fn decompress(&self, input: &Path, output: Option<&Path>) -> io::Result<ToolOutput>;
}

/// Runs the `upx` binary as a blocking child process.
#[derive(Debug, Clone)]
pub struct UpxTool {
    program: PathBuf,
}

impl UpxTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for UpxTool {
    fn default() -> Self {
        Self::new("upx")
    }
}

impl Decompressor for UpxTool {
    fn decompress(&self, input: &Path, output: Option<&Path>) -> io::Result<ToolOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-d").arg(input);
        if let Some(out) = output {
            cmd.arg("-o").arg(out);
        }
        debug!(program = %self.program.display(), input = %input.display(),
               output = ?output.map(Path::display), "running upx");

        let res = cmd.output()?;
        Ok(ToolOutput {
            // Killed by a signal: no code, report as a plain failure.
            code:   res.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&res.stderr).into_owned(),
        })
    }
}

/// How one decompressor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Unpacked,
    /// Failed with a structured diagnostic; holds the message segment.
    Failed(String),
}

/// Read a run's exit code and stderr.
///
/// A failure whose stderr is not `tool: file: Type: message` cannot be
/// diagnosed and becomes an [`UnpackError::Unpack`] carrying the raw text.
pub fn interpret(out: &ToolOutput) -> Result<Attempt, UnpackError> {
    if out.success() {
        return Ok(Attempt::Unpacked);
    }
    match operative_message(&out.stderr) {
        Some(msg) => Ok(Attempt::Failed(msg)),
        None => Err(UnpackError::Unpack(format!(
            "UPX returned error with output:\n> {}",
            out.stderr.trim_end()
        ))),
    }
}

/// The fourth colon-separated segment of a diagnostic, if there are exactly four.
pub fn operative_message(stderr: &str) -> Option<String> {
    let segments: Vec<&str> = stderr.trim_end().split(':').collect();
    match segments.as_slice() {
        [_, _, _, msg] => Some(msg.trim().to_string()),
        _ => None,
    }
}

/// What to do about a failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairStrategy {
    /// `p_filesize`/`p_blocksize` were zeroed; restore them from the trailer.
    FixPInfo,
    /// upx does not see a packed file at all.
    NotPacked,
    /// Anything else; carries the message.
    Unsupported(String),
}

pub fn classify(message: &str) -> RepairStrategy {
    if message.contains("p_info corrupted") {
        RepairStrategy::FixPInfo
    } else if message.contains("not packed by UPX") {
        RepairStrategy::NotPacked
    } else {
        RepairStrategy::Unsupported(message.to_string())
    }
}
