//! Tag extraction from the decrypted config text.
//!
//! The plaintext is a run of `[tag]value[/tag]` spans followed by signature
//! bytes and zero padding.  Tags come from a fixed vocabulary documented by
//! Netlab 360's Mozi write-up.

use indexmap::IndexMap;
use regex::Regex;

use super::{ConfigError, DecodeErrorKind, CONFIG_SIZE, PLAINTEXT_MARKER};

/// Known tags and what they carry, in declaration order.
pub const FIELD_TAGS: [(&str, &str); 11] = [
    // declaration
    ("ss",    "bot role"),
    ("cpu",   "cpu arch"),
    ("nd",    "new DHT node"),
    ("count", "url to report to"),
    // control
    ("atk",   "ddos attack type"),
    ("ver",   "verify"),
    ("hp",    "DHT id prefix"),
    ("dip",   "address to get new sample"),
    // subtasks
    ("rn",    "execute command"),
    ("dr",    "download and exec payload"),
    ("idp",   "report bot info"),
];

/// Flag embedded inside the `count` value, with no closing tag.
const IDP_FLAG: &str = "[idp]";

/// Human-readable description of `tag`, if it is known.
pub fn describe(tag: &str) -> Option<&'static str> {
    FIELD_TAGS.iter().find(|(t, _)| *t == tag).map(|(_, d)| *d)
}

/// Result of parsing one decrypted window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFields {
    pub fields: IndexMap<String, String>,
    /// Set when `count` carried the `[idp]` flag.
    pub idp:    bool,
    /// First `CONFIG_SIZE` characters with trailing NULs removed.
    pub raw:    String,
}

/// Map each byte to the code point of the same value.
///
/// The window is binary past the tag text; a lossless one-byte-per-char
/// mapping keeps offsets stable where UTF-8 decoding would not.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Check that the decrypted window opens with `[ss]`.
pub fn validate(decrypted: &[u8]) -> Result<(), ConfigError> {
    if decrypted.starts_with(PLAINTEXT_MARKER.as_bytes()) {
        Ok(())
    } else {
        Err(ConfigError::Decode(DecodeErrorKind::IncorrectHeader))
    }
}

/// Extract the first `[tag]value[/tag]` span of every tag in `tags`.
///
/// Values are captured non-greedily and may be empty.  Tags without a match
/// are left out.
pub fn extract(text: &str, tags: &[(&str, &str)]) -> Result<IndexMap<String, String>, ConfigError> {
    let mut fields = IndexMap::new();
    for (tag, _) in tags {
        let escaped = regex::escape(tag);
        let re = Regex::new(&format!(r"\[{escaped}\](.*?)\[/{escaped}\]"))
            .map_err(|e| ConfigError::Parsing(e.to_string()))?;
        if let Some(value) = re.captures(text).and_then(|c| c.get(1)) {
            fields.insert((*tag).to_string(), value.as_str().to_string());
        }
    }
    Ok(fields)
}

/// Full field parse of a decrypted window.
pub fn parse(decrypted: &[u8]) -> Result<ParsedFields, ConfigError> {
    let text = latin1(decrypted);
    let mut fields = extract(&text, &FIELD_TAGS)?;

    let count = fields
        .get_mut("count")
        .ok_or(ConfigError::Decode(DecodeErrorKind::Default))?;
    let idp = count.contains(IDP_FLAG);
    if idp {
        *count = count.replace(IDP_FLAG, "");
    }

    let raw: String = text.chars().take(CONFIG_SIZE).collect();
    let raw = raw.trim_end_matches('\0').to_string();

    Ok(ParsedFields { fields, idp, raw })
}
