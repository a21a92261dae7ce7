pub mod magic;
pub mod codec;
pub mod carve;
pub mod mfa;
pub mod legacy;
pub mod scanner;
pub mod sink;
pub mod manifest;
pub mod extract;
pub mod logging;

pub use magic::{Family, MagicRegistry, MagicSignature};
pub use carve::{carve, ExtractedImage};
pub use mfa::{parse, ParsedContainer, ParseError};
pub use legacy::{carve_legacy, LegacyOutcome};
pub use extract::{ExtractError, ExtractOptions, Extractor};
pub use manifest::ExtractionReport;
pub use sink::{ArtifactSink, DirSink, MemorySink};
