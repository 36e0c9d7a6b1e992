//! Structural metadata extraction
//!
//! - `sequence`: fixed-offset header of the binary FSEQ playback format
//! - `project`: xLights XML project / sequence files
//!
//! Other file types are recorded with an explicit `Unsupported` marker so an
//! asset is never stored without a metadata decision.

pub mod project;
pub mod sequence;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;

pub use project::{ExtractionMethod, ProjectExtractor, ProjectSummary};
pub use sequence::{Compression, HeaderReader, SequenceHeader};

use crate::upload::FileType;

/// Metadata extraction errors
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("missing PSEQ magic marker at offset 0")]
    BadMagic,

    #[error("header truncated reading {field}: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unrecognized project root element: {0}")]
    UnrecognizedRoot(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata stored with a file asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FileMetadata {
    Sequence(SequenceHeader),
    Project(ProjectSummary),
    /// No extractor exists for this type
    Unsupported {
        #[serde(rename = "fileType")]
        file_type: FileType,
    },
}

/// Extract metadata from a file held in memory
pub fn extract_from_bytes(file_type: FileType, data: &[u8]) -> Result<FileMetadata, MetadataError> {
    match file_type {
        FileType::Rendered => SequenceHeader::parse(data).map(FileMetadata::Sequence),
        FileType::Source => {
            let text = String::from_utf8_lossy(data);
            project::extract(&text).map(FileMetadata::Project)
        }
        other => Ok(FileMetadata::Unsupported { file_type: other }),
    }
}

/// Extract metadata from a file on disk
///
/// Sequence files are read only up to the header limit.
pub async fn extract_from_path(file_type: FileType, path: &Path) -> Result<FileMetadata, MetadataError> {
    match file_type {
        FileType::Rendered => {
            let file = tokio::fs::File::open(path).await?;
            let mut header = Vec::with_capacity(sequence::HEADER_READ_LIMIT);
            file.take(sequence::HEADER_READ_LIMIT as u64)
                .read_to_end(&mut header)
                .await?;
            SequenceHeader::parse(&header).map(FileMetadata::Sequence)
        }
        FileType::Source => {
            let data = tokio::fs::read(path).await?;
            let text = String::from_utf8_lossy(&data);
            project::extract(&text).map(FileMetadata::Project)
        }
        other => Ok(FileMetadata::Unsupported { file_type: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dispatch_by_type() {
        let header = sequence::tests::header_bytes(8, 40, 25);
        assert!(matches!(
            extract_from_bytes(FileType::Rendered, &header).unwrap(),
            FileMetadata::Sequence(h) if h.frame_count == 40
        ));

        assert!(matches!(
            extract_from_bytes(FileType::Source, project::tests::SEQUENCE_XML.as_bytes()).unwrap(),
            FileMetadata::Project(p) if p.effect_count == 3
        ));

        assert_eq!(
            extract_from_bytes(FileType::Preview, b"\x89PNG").unwrap(),
            FileMetadata::Unsupported { file_type: FileType::Preview }
        );
    }

    #[tokio::test]
    async fn test_path_reads_header_only() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("show.fseq");

        let mut data = sequence::tests::header_bytes(100, 200, 50);
        data.resize(64 * 1024, 0xAB);
        tokio::fs::write(&path, &data).await.unwrap();

        let metadata = extract_from_path(FileType::Rendered, &path).await.unwrap();
        assert_eq!(metadata, extract_from_bytes(FileType::Rendered, &data).unwrap());
    }

    #[test]
    fn test_serialized_shape() {
        let metadata = FileMetadata::Unsupported { file_type: FileType::Asset };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["kind"], "unsupported");
        assert_eq!(json["fileType"], "ASSET");
    }
}
