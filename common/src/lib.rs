pub mod blobstream;
pub mod error;
pub mod job;
pub mod notification;
pub mod outputs;
pub mod pngmeta;

pub use blobstream::{encode_artifact, encode_artifacts, Artifact, BlobStreamDecoder, BLOB_SEPARATOR};
pub use error::ComfyError;
pub use job::{
    apply_inputs, ClientId, OutputFile, PromptId, PromptOutcome, PromptRequest, PromptResponse,
    Workflow, WorkflowInput,
};
pub use notification::{event_matches_prompt, EngineEvent, EventKind};
pub use outputs::{scan_outputs, OutputEntry};
pub use pngmeta::{extract_prompt, find_text_chunk, PromptText};
