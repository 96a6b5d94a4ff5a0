//! Vendor transcript model and enriched envelope assembly.

pub mod assembler;
pub mod model;
pub mod speakers;

pub use assembler::{ResponseShape, TranscriptAssembler, TranscriptEnvelope};
pub use model::{ItemKind, TranscriptAlternative, TranscriptEvent, TranscriptItem, TranscriptResult};
pub use speakers::{CallMetadata, Speaker, SpeakerMap};
