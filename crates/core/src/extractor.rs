use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;
use tracing::{debug, warn};

/// Text of one PDF page. `number` is zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, IngestError> {
        let size = std::fs::metadata(path)?.len();
        if size == 0 {
            return Err(IngestError::EmptyFile(path.display().to_string()));
        }

        let document = match Document::load(path) {
            Ok(document) => document,
            Err(_) if declares_encryption(path) => {
                return Err(IngestError::Encrypted(path.display().to_string()))
            }
            Err(error) => return Err(IngestError::PdfParse(error.to_string())),
        };

        if document.trailer.get(b"Encrypt").is_ok() {
            return Err(IngestError::Encrypted(path.display().to_string()));
        }

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    warn!(page = page_no, %error, "page text extraction failed");
                    String::new()
                }
            };

            pages.push(PageRecord {
                number: page_no.saturating_sub(1),
                text,
            });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(IngestError::NoExtractableText(path.display().to_string()));
        }

        debug!(pages = pages.len(), path = %path.display(), "extracted page text");
        Ok(pages)
    }
}

/// Whether the raw file carries an `/Encrypt` entry. Used when the parser gives up
/// on a file it could not decrypt.
fn declares_encryption(path: &Path) -> bool {
    std::fs::read(path)
        .map(|bytes| bytes.windows(b"/Encrypt".len()).any(|window| window == b"/Encrypt"))
        .unwrap_or(false)
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageRecord>, IngestError> {
    LopdfExtractor.extract_pages(path)
}
