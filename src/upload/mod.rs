//! Resumable Upload Module
//!
//! Implements reliable ingestion of large sequence files with:
//! - Policy validation before any bytes are accepted
//! - MD5-verified chunks, accepted in any order and safe to re-send
//! - Streaming reassembly with a SHA-256 content digest
//! - Content-addressed storage and deduplication by (digest, size)
//!
//! Protocol Flow:
//! 1. Client initiates with name, size, MIME type and declared file type
//! 2. Server validates and answers with chunk size and chunk count
//! 3. Client uploads each chunk with its MD5
//! 4. Client completes; server assembles, validates, extracts metadata and
//!    returns the stored asset

pub mod assembler;
pub mod chunk_store;
pub mod deduplication;
pub mod hashing;
pub mod orchestrator;
pub mod session;
pub mod types;
pub mod validation;

pub use assembler::{AssembledFile, ChunkAssembler};
pub use chunk_store::ChunkStore;
pub use deduplication::DeduplicationService;
pub use hashing::{chunk_checksum, content_digest, ContentHasher};
pub use orchestrator::UploadOrchestrator;
pub use session::SessionStore;
pub use types::*;
pub use validation::{validate, validate_file_name, validate_signature};
