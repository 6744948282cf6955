use crate::chain::{ChainFactory, RagChain};
use crate::error::SessionError;
use crate::ingest::Upload;
use crate::models::{Answer, ChatMessage, ConversationTurn, DocumentFingerprint, Role};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoDocument,
    Indexing,
    Ready,
}

/// One user's conversation with one indexed document.
///
/// The turn log is the single source of truth; the model-facing and
/// display-facing histories are projections of it. A question and its answer
/// are committed together, only after the answer has been synthesized.
pub struct Session {
    id: Uuid,
    phase: SessionPhase,
    chain: Option<Arc<RagChain>>,
    turns: Vec<ConversationTurn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: SessionPhase::NoDocument,
            chain: None,
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn document(&self) -> Option<&DocumentFingerprint> {
        self.chain.as_deref().map(RagChain::document)
    }

    pub fn chain(&self) -> Option<&RagChain> {
        self.chain.as_deref()
    }

    pub fn chunk_count(&self) -> usize {
        self.chain.as_deref().map_or(0, RagChain::chunk_count)
    }

    /// Turns with their sources, for rendering.
    pub fn display_history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Role and content only, for conditioning the model.
    pub fn model_history(&self) -> Vec<ChatMessage> {
        self.turns.iter().map(ConversationTurn::to_message).collect()
    }

    pub fn message_count(&self) -> usize {
        self.turns.len()
    }

    /// Marks the session as indexing so the build can run without holding the session.
    pub fn begin_indexing(&mut self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Indexing {
            return Err(SessionError::Indexing);
        }
        self.phase = SessionPhase::Indexing;
        Ok(())
    }

    /// Installs a freshly built chain, or restores the pre-upload state on failure.
    pub fn finish_indexing(
        &mut self,
        outcome: Result<RagChain, SessionError>,
    ) -> Result<usize, SessionError> {
        match outcome {
            Ok(chain) => {
                let chunk_count = chain.chunk_count();
                info!(
                    session = %self.id,
                    file = %chain.document().file_name,
                    chunks = chunk_count,
                    "session ready"
                );
                self.chain = Some(Arc::new(chain));
                self.turns.clear();
                self.phase = SessionPhase::Ready;
                Ok(chunk_count)
            }
            Err(error) => {
                warn!(session = %self.id, %error, "document processing failed");
                self.phase = self.settled_phase();
                Err(error)
            }
        }
    }

    /// Drops an unfinished indexing run and keeps whatever document was ready before it.
    pub fn abandon_indexing(&mut self) {
        if self.phase == SessionPhase::Indexing {
            warn!(session = %self.id, "indexing abandoned before completion");
            self.phase = self.settled_phase();
        }
    }

    pub async fn process_upload(
        &mut self,
        factory: &ChainFactory,
        upload: Upload,
    ) -> Result<usize, SessionError> {
        upload.validate(factory.config())?;
        let mut run = IndexingRun::begin(self)?;
        let outcome = factory.build_from_upload(upload).await;
        run.session.finish_indexing(outcome)
    }

    pub async fn process_path(
        &mut self,
        factory: &ChainFactory,
        path: &Path,
    ) -> Result<usize, SessionError> {
        let mut run = IndexingRun::begin(self)?;
        let outcome = factory.build_from_path(path).await;
        run.session.finish_indexing(outcome)
    }

    /// Chain for the next exchange, or the reason the session cannot answer yet.
    pub fn ready_chain(&self) -> Result<Arc<RagChain>, SessionError> {
        match (self.phase, &self.chain) {
            (SessionPhase::Indexing, _) => Err(SessionError::Indexing),
            (_, Some(chain)) => Ok(Arc::clone(chain)),
            (_, None) => Err(SessionError::NoDocument),
        }
    }

    /// Appends a completed exchange: the user turn followed by the assistant turn.
    pub fn commit(&mut self, answer: &Answer) {
        self.turns.push(ConversationTurn::user(answer.question.clone()));
        self.turns.push(ConversationTurn::assistant(
            answer.answer.clone(),
            answer.source_chunks(),
        ));
    }

    pub async fn ask(&mut self, question: &str) -> Result<Answer, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        let id = self.id;
        let chain = self.ready_chain()?;
        let history = self.model_history();
        let answer = chain.answer(&history, question).await.map_err(|error| {
            warn!(session = %id, %error, "exchange failed");
            error
        })?;

        self.commit(&answer);
        Ok(answer)
    }

    /// Resets the conversation and keeps the index.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn settled_phase(&self) -> SessionPhase {
        if self.chain.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::NoDocument
        }
    }

    /// Whether the user turns and assistant turns alternate, starting with a user turn.
    pub fn is_well_formed(&self) -> bool {
        self.turns.len() % 2 == 0
            && self.turns.iter().enumerate().all(|(position, turn)| {
                let expected = if position % 2 == 0 {
                    Role::User
                } else {
                    Role::Assistant
                };
                turn.role == expected
            })
    }
}

/// Holds a session in [`SessionPhase::Indexing`] for one build. If the build future is
/// dropped before `finish_indexing` runs, the session falls back to its settled phase.
struct IndexingRun<'a> {
    session: &'a mut Session,
}

impl<'a> IndexingRun<'a> {
    fn begin(session: &'a mut Session) -> Result<Self, SessionError> {
        session.begin_indexing()?;
        Ok(Self { session })
    }
}

impl Drop for IndexingRun<'_> {
    fn drop(&mut self) {
        self.session.abandon_indexing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::test_support::{pdf_bytes, ScriptedModel, StallingEmbedder};
    use std::time::Duration;
    use tokio::time::timeout;

    fn factory(model: Arc<ScriptedModel>) -> ChainFactory {
        ChainFactory::new(
            RagConfig::default(),
            Arc::new(CharacterNgramEmbedder::default()),
            model,
        )
        .expect("default config is valid")
    }

    fn biology_upload() -> Upload {
        Upload::new(
            "biology.pdf",
            pdf_bytes(&["Mitochondria make ATP", "Ribosomes build proteins"])
                .expect("fixture pdf"),
        )
    }

    #[tokio::test]
    async fn new_session_has_no_document() {
        let mut session = Session::new();
        assert_eq!(session.phase(), SessionPhase::NoDocument);
        assert_eq!(session.chunk_count(), 0);
        assert!(matches!(
            session.ask("anything?").await,
            Err(SessionError::NoDocument)
        ));
    }

    #[tokio::test]
    async fn histories_stay_in_sync_across_exchanges() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new([
            "ATP is made by mitochondria.",
            "What do ribosomes build?",
            "Proteins.",
            "What else do mitochondria do?",
            "I don't know.",
        ]));
        let factory = factory(model);
        let mut session = Session::new();
        session.process_upload(&factory, biology_upload()).await?;

        session.ask("Who makes ATP?").await?;
        session.ask("And ribosomes?").await?;
        session.ask("What else?").await?;

        assert_eq!(session.message_count(), 6);
        assert_eq!(session.model_history().len(), 6);
        assert_eq!(session.display_history().len(), 6);
        assert!(session.is_well_formed());
        for (message, turn) in session.model_history().iter().zip(session.display_history()) {
            assert_eq!(message.role, turn.role);
            assert_eq!(message.content, turn.content);
        }
        assert!(session.display_history()[1].sources.len() <= 4);
        assert!(!session.display_history()[1].sources.is_empty());
        assert!(session.display_history()[0].sources.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_synthesis_commits_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new(["First answer.", "What about ATP?"]));
        let factory = factory(Arc::clone(&model));
        let mut session = Session::new();
        session.process_upload(&factory, biology_upload()).await?;
        session.ask("Who makes ATP?").await?;

        let result = session.ask("What about it?").await;

        assert!(matches!(result, Err(SessionError::Provider(_))));
        assert_eq!(model.calls().len(), 3);
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(session.is_well_formed());
        Ok(())
    }

    #[tokio::test]
    async fn clear_resets_conversation_and_keeps_index() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new(["Answer."]));
        let factory = factory(model);
        let mut session = Session::new();
        let chunks = session.process_upload(&factory, biology_upload()).await?;
        session.ask("Who makes ATP?").await?;

        session.clear();

        assert_eq!(session.message_count(), 0);
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.chunk_count(), chunks);
        Ok(())
    }

    #[tokio::test]
    async fn reupload_resets_conversation_and_rebuilds_index(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new(["Answer."]));
        let factory = factory(model);
        let mut session = Session::new();
        session.process_upload(&factory, biology_upload()).await?;
        session.ask("Who makes ATP?").await?;

        let replacement = Upload::new("geology.pdf", pdf_bytes(&["Rivers erode rock"])?);
        let chunks = session.process_upload(&factory, replacement).await?;

        assert_eq!(chunks, 1);
        assert_eq!(session.message_count(), 0);
        assert_eq!(
            session.document().map(|doc| doc.file_name.as_str()),
            Some("geology.pdf")
        );
        Ok(())
    }

    #[tokio::test]
    async fn oversized_upload_leaves_session_untouched() -> Result<(), Box<dyn std::error::Error>>
    {
        let model = Arc::new(ScriptedModel::new(["Answer."]));
        let factory = factory(model);
        let mut session = Session::new();
        session.process_upload(&factory, biology_upload()).await?;
        session.ask("Who makes ATP?").await?;

        let oversized = Upload::new("huge.pdf", vec![0u8; 15 * 1024 * 1024]);
        let result = session.process_upload(&factory, oversized).await;

        assert!(matches!(result, Err(SessionError::UploadRejected(_))));
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.message_count(), 2);
        assert_eq!(
            session.document().map(|doc| doc.file_name.as_str()),
            Some("biology.pdf")
        );
        Ok(())
    }

    #[tokio::test]
    async fn broken_pdf_restores_previous_state() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new(["Answer."]));
        let factory = factory(model);
        let mut session = Session::new();

        let broken = Upload::new("broken.pdf", b"%PDF-1.4\n%broken".to_vec());
        let result = session.process_upload(&factory, broken).await;
        assert!(matches!(result, Err(SessionError::Ingestion(_))));
        assert_eq!(session.phase(), SessionPhase::NoDocument);

        session.process_upload(&factory, biology_upload()).await?;
        session.ask("Who makes ATP?").await?;
        let broken = Upload::new("broken.pdf", b"%PDF-1.4\n%broken".to_vec());
        assert!(session.process_upload(&factory, broken).await.is_err());
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.message_count(), 2);
        Ok(())
    }

    #[test]
    fn indexing_blocks_questions_and_second_upload() {
        let mut session = Session::new();
        assert!(session.begin_indexing().is_ok());
        assert!(matches!(session.begin_indexing(), Err(SessionError::Indexing)));
        assert!(matches!(session.ready_chain(), Err(SessionError::Indexing)));

        let result = session.finish_indexing(Err(SessionError::NoDocument));
        assert!(result.is_err());
        assert_eq!(session.phase(), SessionPhase::NoDocument);
    }

    #[tokio::test]
    async fn dropped_upload_releases_indexing_phase() -> Result<(), Box<dyn std::error::Error>> {
        let stalled = ChainFactory::new(
            RagConfig::default(),
            Arc::new(StallingEmbedder),
            Arc::new(ScriptedModel::new(std::iter::empty::<String>())),
        )?;
        let mut session = Session::new();

        let attempt = timeout(
            Duration::from_millis(200),
            session.process_upload(&stalled, biology_upload()),
        )
        .await;
        assert!(attempt.is_err(), "stalled build should time out");
        assert_eq!(session.phase(), SessionPhase::NoDocument);

        let factory = factory(Arc::new(ScriptedModel::new(["Answer."])));
        session.process_upload(&factory, biology_upload()).await?;
        session.ask("Who makes ATP?").await?;

        let attempt = timeout(
            Duration::from_millis(200),
            session.process_upload(&stalled, biology_upload()),
        )
        .await;
        assert!(attempt.is_err(), "stalled build should time out");
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.message_count(), 2);
        assert_eq!(
            session.document().map(|doc| doc.file_name.as_str()),
            Some("biology.pdf")
        );
        Ok(())
    }

    #[tokio::test]
    async fn dropped_path_build_releases_indexing_phase() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notes.pdf");
        crate::test_support::write_pdf(&path, &["Enzymes speed up reactions"])?;
        let stalled = ChainFactory::new(
            RagConfig::default(),
            Arc::new(StallingEmbedder),
            Arc::new(ScriptedModel::new(std::iter::empty::<String>())),
        )?;
        let mut session = Session::new();

        let attempt = timeout(Duration::from_millis(200), session.process_path(&stalled, &path)).await;

        assert!(attempt.is_err(), "stalled build should time out");
        assert_eq!(session.phase(), SessionPhase::NoDocument);
        assert!(session.begin_indexing().is_ok());
        Ok(())
    }

    #[test]
    fn abandon_only_affects_indexing_sessions() {
        let mut session = Session::new();
        session.abandon_indexing();
        assert_eq!(session.phase(), SessionPhase::NoDocument);

        assert!(session.begin_indexing().is_ok());
        session.abandon_indexing();
        assert_eq!(session.phase(), SessionPhase::NoDocument);
        assert!(matches!(session.ready_chain(), Err(SessionError::NoDocument)));
    }

    #[tokio::test]
    async fn blank_question_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let factory = factory(Arc::new(ScriptedModel::new(["Answer."])));
        let mut session = Session::new();
        session.process_upload(&factory, biology_upload()).await?;

        assert!(matches!(session.ask("   ").await, Err(SessionError::EmptyQuestion)));
        assert_eq!(session.message_count(), 0);
        Ok(())
    }
}
