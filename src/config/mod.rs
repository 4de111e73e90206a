//! Two-tier configuration: the server-side repo-policy file and the
//! in-repo `atlantis.yaml`, parsed strictly and merged under the server's
//! override rules.

pub mod merge;
pub mod parser;
pub mod raw;
pub mod valid;

pub use merge::EffectivePolicy;
pub use parser::{ATLANTIS_YAML_FILENAME, ParserValidator};
