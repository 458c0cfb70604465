//! Mozi configuration extraction.
//!
//! # Layout
//!
//! Every Mozi build embeds one XOR-encrypted config record:
//!
//! ```text
//! [ 15 15 29 d2 ... ]   524 bytes, XOR MOZI_XOR_KEY
//!   └ "[ss]" encrypted
//! decrypted: [ tag text ......... (428 B) | signatures + padding (96 B) ]
//! ```
//!
//! Decoding is read → [`locate`] → [`crate::crypto::decrypt`] →
//! [`fields::validate`] → [`fields::parse`].  The two ECDSA-384 signature
//! blobs are recognised as known byte sequences but never verified.
//!
//! ```no_run
//! use mozibgone::config::ConfigDecoder;
//!
//! let config = ConfigDecoder::new("sample.bin").decode()?;
//! println!("reports to {}", config.fields["count"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod fields;
pub mod locate;

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto;
use crate::magic::find_first;

pub use fields::{describe, FIELD_TAGS, ParsedFields};
pub use locate::{locate, ConfigWindow};

/// `b"[ss]"` XOR the first four key bytes.
pub const MOZI_CONFIG_HEADER: [u8; 4] = [0x15, 0x15, 0x29, 0xd2];

/// Every decrypted config opens with this tag.
pub const PLAINTEXT_MARKER: &str = "[ss]";

/// Encrypted window size, signatures included.
pub const CONFIG_TOTAL_SIZE: usize = 524;

/// Size of the tag text at the head of the window.
pub const CONFIG_SIZE: usize = 428;

/// First ECDSA-384 signature, as it appears XOR-encrypted in the sample.
pub const MOZI_SIGNATURE_A: [u8; 49] = [
    0x4C,0xB3,0x8F,0x68,0xC1,0x26,0x70,0xEB,
    0x9D,0xC1,0x68,0x4E,0xD8,0x4B,0x7D,0x5F,
    0x69,0x5F,0x9D,0xCA,0x8D,0xE2,0x7D,0x63,
    0xFF,0xAD,0x96,0x8D,0x18,0x8B,0x79,0x1B,
    0x38,0x31,0x9B,0x12,0x69,0x73,0xA9,0x2E,
    0xB6,0x63,0x29,0x76,0xAC,0x2F,0x9E,0x94,
    0xA1,
];

/// Second ECDSA-384 signature, as it appears XOR-encrypted in the sample.
pub const MOZI_SIGNATURE_B: [u8; 49] = [
    0x4C,0xA6,0xFB,0xCC,0xF8,0x9B,0x12,0x1F,
    0x49,0x64,0x4D,0x2F,0x3C,0x17,0xD0,0xB8,
    0xE9,0x7D,0x24,0x24,0xF2,0xDD,0xB1,0x47,
    0xE9,0x34,0xD2,0xC2,0xBF,0x07,0xAC,0x53,
    0x22,0x5F,0xD8,0x92,0xFE,0xED,0x5F,0xA3,
    0xC9,0x5B,0x6A,0x16,0xBE,0x84,0x40,0x77,
    0x88,
];

// ── Errors ────────────────────────────────────────────────────────────────────

/// Which decode check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    IncorrectHeader,
    NoSignatureA,
    NoSignatureB,
    Default,
}

impl DecodeErrorKind {
    pub fn message(self) -> &'static str {
        match self {
            DecodeErrorKind::IncorrectHeader =>
                "Provided config does not start with magic byte sequence b'[ss]'",
            DecodeErrorKind::NoSignatureA => "Provided binary does not contain signature A",
            DecodeErrorKind::NoSignatureB => "Provided binary does not contain signature B",
            DecodeErrorKind::Default      => "There was an error in decoding the config",
        }
    }
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find Mozi config header within sample binary")]
    HeaderNotFound,
    #[error("An error occurred while parsing the config: {0}")]
    Parsing(String),
    #[error("{0}")]
    Decode(DecodeErrorKind),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Decoded record ────────────────────────────────────────────────────────────

/// One decoded config.  Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedConfig {
    /// Offset of the encrypted header in the sample.
    pub offset:      usize,
    /// Tag text, truncated to `CONFIG_SIZE` and stripped of trailing NULs.
    pub raw:         String,
    /// Extracted tag values, in tag-table order.
    pub fields:      IndexMap<String, String>,
    /// `count` carried the `[idp]` report flag.
    pub idp:         bool,
    /// Hex of signature A, when present in the sample.
    pub signature_a: Option<String>,
    /// Hex of signature B, when present in the sample.
    pub signature_b: Option<String>,
}

/// A view of a [`DecodedConfig`] that can be printed or dumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigView {
    Raw,
    Parsed,
    SignatureA,
    SignatureB,
}

/// Outcome of [`DecodedConfig::lookup`] and [`DecodedConfig::field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(String),
    RawMissing,
    ParsedMissing,
    SignatureAMissing,
    SignatureBMissing,
    /// The request itself made no sense, e.g. an unknown tag.
    Other(String),
}

impl Lookup {
    /// Map a miss to the error a caller would report for it.
    pub fn into_result(self) -> Result<String, ConfigError> {
        match self {
            Lookup::Found(text)       => Ok(text),
            Lookup::ParsedMissing     => Err(ConfigError::Parsing("no fields were parsed".into())),
            Lookup::SignatureAMissing => Err(ConfigError::Decode(DecodeErrorKind::NoSignatureA)),
            Lookup::SignatureBMissing => Err(ConfigError::Decode(DecodeErrorKind::NoSignatureB)),
            Lookup::RawMissing        => Err(ConfigError::Decode(DecodeErrorKind::Default)),
            Lookup::Other(msg)        => Err(ConfigError::Parsing(msg)),
        }
    }
}

impl DecodedConfig {
    pub fn lookup(&self, view: ConfigView) -> Lookup {
        match view {
            ConfigView::Raw if self.raw.is_empty() => Lookup::RawMissing,
            ConfigView::Raw => Lookup::Found(self.raw.clone()),
            ConfigView::Parsed if self.fields.is_empty() => Lookup::ParsedMissing,
            ConfigView::Parsed => Lookup::Found(self.render_fields()),
            ConfigView::SignatureA => self
                .signature_a
                .clone()
                .map_or(Lookup::SignatureAMissing, Lookup::Found),
            ConfigView::SignatureB => self
                .signature_b
                .clone()
                .map_or(Lookup::SignatureBMissing, Lookup::Found),
        }
    }

    /// Value of a single tag.  `idp` without a span of its own reads the
    /// report flag.
    pub fn field(&self, tag: &str) -> Lookup {
        if describe(tag).is_none() {
            return Lookup::Other(format!("unknown config tag `{tag}`"));
        }
        match self.fields.get(tag) {
            Some(value) => Lookup::Found(value.clone()),
            None if tag == "idp" => Lookup::Found(self.idp.to_string()),
            None => Lookup::ParsedMissing,
        }
    }

    /// One `tag (description): value` line per field, in tag-table order.
    pub fn render_fields(&self) -> String {
        let mut lines: Vec<String> =
            self.fields.iter().map(|(tag, v)| field_line(tag, v)).collect();
        lines.push(field_line("idp", self.idp));
        lines.join("\n")
    }

    /// Write the record as JSON to `path`.
    pub fn dump_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        debug!(path = %path.as_ref().display(), "dumped config as JSON");
        Ok(())
    }
}

fn field_line(tag: &str, value: impl fmt::Display) -> String {
    format!("{tag} ({}): {value}", describe(tag).unwrap_or("unknown tag"))
}

// ── Decoder ───────────────────────────────────────────────────────────────────

/// Decode the config from a sample already in memory.
pub fn decode_bytes(data: &[u8]) -> Result<DecodedConfig, ConfigError> {
    let window = locate(data)?;
    let decrypted = crypto::decrypt(window.bytes);
    fields::validate(&decrypted)?;
    let ParsedFields { fields, idp, raw } = fields::parse(&decrypted)?;

    let signature_a = find_first(data, &MOZI_SIGNATURE_A).map(|_| hex::encode(MOZI_SIGNATURE_A));
    let signature_b = find_first(data, &MOZI_SIGNATURE_B).map(|_| hex::encode(MOZI_SIGNATURE_B));

    Ok(DecodedConfig {
        offset: window.offset,
        raw,
        fields,
        idp,
        signature_a,
        signature_b,
    })
}

/// Reads a sample from disk and decodes its config.
#[derive(Debug, Clone)]
pub struct ConfigDecoder {
    path: PathBuf,
}

impl ConfigDecoder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn decode(&self) -> Result<DecodedConfig, ConfigError> {
        debug!(path = %self.path.display(), "reading sample");
        let data = fs::read(&self.path)?;
        let config = decode_bytes(&data)?;
        info!(
            offset = config.offset,
            fields = config.fields.len(),
            "decoded Mozi config"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(plain: &str, prefix: usize) -> Vec<u8> {
        let mut window = plain.as_bytes().to_vec();
        window.resize(CONFIG_TOTAL_SIZE, 0);
        crypto::xor_in_place(&mut window);
        let mut data = vec![0x90u8; prefix];
        data.extend_from_slice(&window);
        data.extend_from_slice(&[0x90; 32]);
        data
    }

    #[test]
    fn header_constant_is_encrypted_marker() {
        assert_eq!(crypto::decrypt(&MOZI_CONFIG_HEADER), PLAINTEXT_MARKER.as_bytes());
    }

    #[test]
    fn decodes_embedded_config() {
        let data = sample("[ss]bot[/ss][hp]88888888[/hp][count]http://a/[idp][/count]", 77);
        let cfg = decode_bytes(&data).unwrap();
        assert_eq!(cfg.offset, 77);
        assert_eq!(cfg.fields["ss"], "bot");
        assert_eq!(cfg.fields["hp"], "88888888");
        assert_eq!(cfg.fields["count"], "http://a/");
        assert!(cfg.idp);
        assert_eq!(cfg.lookup(ConfigView::SignatureA), Lookup::SignatureAMissing);
    }

    #[test]
    fn recognises_signatures_in_sample() {
        let mut data = sample("[ss]bot[/ss][count]x[/count]", 0);
        data.extend_from_slice(&MOZI_SIGNATURE_A);
        let cfg = decode_bytes(&data).unwrap();
        assert_eq!(
            cfg.lookup(ConfigView::SignatureA),
            Lookup::Found(hex::encode(MOZI_SIGNATURE_A))
        );
        assert!(matches!(
            cfg.lookup(ConfigView::SignatureB).into_result(),
            Err(ConfigError::Decode(DecodeErrorKind::NoSignatureB))
        ));
    }

    #[test]
    fn lookup_reports_each_view() {
        let cfg = DecodedConfig {
            offset:      0,
            raw:         String::new(),
            fields:      IndexMap::new(),
            idp:         false,
            signature_a: None,
            signature_b: Some("ab".into()),
        };
        assert_eq!(cfg.lookup(ConfigView::Raw), Lookup::RawMissing);
        assert_eq!(cfg.lookup(ConfigView::Parsed), Lookup::ParsedMissing);
        assert_eq!(cfg.lookup(ConfigView::SignatureB), Lookup::Found("ab".into()));
        assert!(matches!(
            Lookup::ParsedMissing.into_result(),
            Err(ConfigError::Parsing(_))
        ));
    }

    #[test]
    fn field_lookup_by_tag() {
        let data = sample("[ss]bot[/ss][count]c[idp][/count]", 0);
        let cfg = decode_bytes(&data).unwrap();
        assert_eq!(cfg.field("ss"), Lookup::Found("bot".into()));
        assert_eq!(cfg.field("idp"), Lookup::Found("true".into()));
        assert_eq!(cfg.field("dip"), Lookup::ParsedMissing);
        assert_eq!(cfg.field("xyz"), Lookup::Other("unknown config tag `xyz`".into()));
        match cfg.field("xyz").into_result() {
            Err(ConfigError::Parsing(msg)) => assert!(msg.contains("xyz")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parsed_view_follows_tag_table_order() {
        let data = sample("[ss]bot[/ss][count]c[/count][cpu]mips[/cpu]", 0);
        let cfg = decode_bytes(&data).unwrap();
        let text = cfg.lookup(ConfigView::Parsed).into_result().unwrap();
        assert_eq!(
            text,
            "ss (bot role): bot\ncpu (cpu arch): mips\ncount (url to report to): c\nidp (report bot info): false"
        );
    }

    #[test]
    fn json_keeps_tag_table_order() {
        let data = sample("[ss]bot[/ss][dip]1.2.3.4[/dip][count]c[/count][cpu]arm[/cpu]", 0);
        let json = serde_json::to_string(&decode_bytes(&data).unwrap()).unwrap();
        let at = |key: &str| json.find(&format!("\"{key}\":")).unwrap();
        assert!(at("ss") < at("cpu"));
        assert!(at("cpu") < at("count"));
        assert!(at("count") < at("dip"));
    }

    #[test]
    fn error_messages_match_decode_kinds() {
        let err = ConfigError::Decode(DecodeErrorKind::IncorrectHeader);
        assert_eq!(
            err.to_string(),
            "Provided config does not start with magic byte sequence b'[ss]'"
        );
    }
}
