use crate::chunking::{build_chunks, ChunkingConfig};
use crate::config::{RagConfig, BYTES_PER_MB};
use crate::error::{IngestError, SessionError};
use crate::extractor::{extract_page_texts, PageRecord};
use crate::models::{Chunk, DocumentFingerprint};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// A file received from a user, held in memory until it is indexed.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn validate(&self, config: &RagConfig) -> Result<(), SessionError> {
        validate_upload(
            &self.file_name,
            self.content_type.as_deref(),
            self.size_bytes(),
            config,
        )
    }
}

/// Rejects anything that is not a PDF or exceeds the configured size limit.
pub fn validate_upload(
    file_name: &str,
    content_type: Option<&str>,
    size_bytes: u64,
    config: &RagConfig,
) -> Result<(), SessionError> {
    let is_pdf_name = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    let is_pdf_type = content_type.map_or(true, |kind| {
        let kind = kind.to_ascii_lowercase();
        kind == "application/pdf" || kind == "application/octet-stream"
    });

    if !is_pdf_name || !is_pdf_type {
        return Err(SessionError::UploadRejected(format!(
            "{file_name} is not a PDF file"
        )));
    }

    if size_bytes > config.max_file_size_bytes() {
        return Err(SessionError::UploadRejected(format!(
            "File too large! Max size is {}MB (got {:.1}MB).",
            config.max_file_size_mb,
            size_bytes as f64 / BYTES_PER_MB as f64
        )));
    }

    Ok(())
}

/// Copies upload bytes into a temporary `.pdf` file that is deleted on drop.
pub fn persist_upload(bytes: &[u8]) -> Result<NamedTempFile, IngestError> {
    let mut file = tempfile::Builder::new()
        .prefix("pdf-chat-")
        .suffix(".pdf")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub struct IngestedDocument {
    pub fingerprint: DocumentFingerprint,
    pub pages: Vec<PageRecord>,
    pub chunks: Vec<Chunk>,
}

/// Extracts and chunks one PDF. All-or-nothing: any failure yields no chunks.
pub fn ingest_pdf(
    path: &Path,
    display_name: &str,
    config: ChunkingConfig,
) -> Result<IngestedDocument, IngestError> {
    let checksum = digest_file(path)?;
    let pages = extract_page_texts(path)?;
    let chunks = build_chunks(&pages, config);

    if chunks.is_empty() {
        return Err(IngestError::NoExtractableText(display_name.to_string()));
    }

    let fingerprint = DocumentFingerprint {
        document_id: generate_document_id(display_name, &checksum),
        file_name: display_name.to_string(),
        checksum,
        page_count: pages.len(),
        ingested_at: Utc::now(),
    };

    info!(
        file = %fingerprint.file_name,
        pages = fingerprint.page_count,
        chunks = chunks.len(),
        checksum = %fingerprint.checksum,
        "ingested pdf"
    );

    Ok(IngestedDocument {
        fingerprint,
        pages,
        chunks,
    })
}

/// Writes the upload to a scoped temp file, ingests it, and removes the file on every path.
pub fn ingest_upload(upload: &Upload, config: ChunkingConfig) -> Result<IngestedDocument, IngestError> {
    if upload.bytes.is_empty() {
        return Err(IngestError::EmptyFile(upload.file_name.clone()));
    }
    let file = persist_upload(&upload.bytes)?;
    ingest_pdf(file.path(), &upload.file_name, config)
}

fn generate_document_id(name: &str, checksum: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(checksum.as_bytes());
    format!("{:x}", hasher.finalize())
}
