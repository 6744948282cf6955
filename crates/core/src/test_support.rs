use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::models::ChatMessage;
use crate::traits::LanguageModel;
use crate::ProviderError;
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::VecDeque;
use std::time::Duration;
use std::path::Path;
use std::sync::Mutex;

/// Builds a PDF with one text line per page. An empty string yields a blank page.
pub fn pdf_document(pages: &[&str]) -> Result<Document, lopdf::Error> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let operations = if text.is_empty() {
            Vec::new()
        } else {
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

pub fn pdf_bytes(pages: &[&str]) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = pdf_document(pages)?;
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

/// A PDF whose trailer declares standard-handler encryption.
pub fn encrypted_pdf_bytes(pages: &[&str]) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = pdf_document(pages)?;
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "O" => Object::string_literal(vec![0x2au8; 32]),
        "U" => Object::string_literal(vec![0x2au8; 32]),
        "P" => -4,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

pub fn write_pdf(path: &Path, pages: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, pdf_bytes(pages)?)?;
    Ok(())
}

/// Replays canned replies in order and records every prompt. Fails once the script runs out.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(messages.to_vec());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .ok_or_else(|| ProviderError::Response {
                provider: "scripted".to_string(),
                details: "script exhausted".to_string(),
            })
    }
}

/// Never finishes embedding, so a build using it only ends when its future is dropped.
pub struct StallingEmbedder;

#[async_trait]
impl Embedder for StallingEmbedder {
    fn model_name(&self) -> &str {
        "stalling"
    }

    fn dimensions(&self) -> usize {
        8
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        std::future::pending().await
    }
}

/// Trigram embeddings that arrive only after `delay`, for exercising in-flight indexing.
pub struct DelayedEmbedder {
    pub delay: Duration,
    pub inner: CharacterNgramEmbedder,
}

impl DelayedEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: CharacterNgramEmbedder::default(),
        }
    }
}

#[async_trait]
impl Embedder for DelayedEmbedder {
    fn model_name(&self) -> &str {
        "delayed-trigram"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.inner.embed_text(text))
    }
}
