pub mod magic;
pub mod header;
pub mod recovery;
pub mod unpack;
pub mod crypto;
pub mod config;

pub use magic::{find_all, parse_magic, UPX_MAGIC};
pub use unpack::{Unpacker, UnpackError, UnpackOptions, UnpackOutcome, UpxTool};
pub use config::{ConfigDecoder, ConfigError, DecodedConfig, DecodeErrorKind};
