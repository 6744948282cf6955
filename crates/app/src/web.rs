use crate::render::{self, Flash};
use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use pdf_chat_core::{ChainFactory, DisplayText, Session, SessionError, Upload};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

const SESSION_COOKIE: &str = "pdf_chat_session";

/// Session plus the status message waiting to be shown on the next page load.
pub struct BrowserSession {
    pub session: Session,
    pub flash: Option<Flash>,
}

type SessionHandle = Arc<Mutex<BrowserSession>>;

/// One isolated [`Session`] per browser, keyed by the session cookie.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<Uuid, SessionHandle>>>,
}

impl SessionStore {
    pub async fn resolve(&self, headers: &HeaderMap) -> (Uuid, SessionHandle) {
        let mut sessions = self.inner.lock().await;
        if let Some(id) = session_id_from(headers) {
            if let Some(handle) = sessions.get(&id) {
                return (id, Arc::clone(handle));
            }
        }

        let session = Session::new();
        let id = session.id();
        let handle = Arc::new(Mutex::new(BrowserSession {
            session,
            flash: None,
        }));
        sessions.insert(id, Arc::clone(&handle));
        info!(session = %id, live = sessions.len(), "session created");
        (id, handle)
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        self.inner.lock().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

pub fn session_id_from(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find_map(|raw| Uuid::parse_str(raw.trim()).ok())
}

#[derive(Clone)]
pub struct AppState {
    pub factory: ChainFactory,
    pub display: Arc<DisplayText>,
    pub sessions: SessionStore,
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state
        .factory
        .config()
        .max_file_size_bytes()
        .saturating_mul(2)
        .saturating_add(1024 * 1024);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/ask", post(ask))
        .route("/clear", post(clear))
        .route("/session/end", post(end_session))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "pdf-chat listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .context("server shutdown")?;
    Ok(())
}

fn with_cookie(id: Uuid, response: impl IntoResponse) -> Response {
    (
        [(
            SET_COOKIE,
            format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"),
        )],
        response,
    )
        .into_response()
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (id, handle) = state.sessions.resolve(&headers).await;
    let mut guard = handle.lock().await;
    let flash = guard.flash.take();
    let html = render::page(
        &state.display,
        state.factory.config(),
        state.factory.embedder().model_name(),
        &guard.session,
        flash.as_ref(),
    );
    with_cookie(id, Html(html))
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, String> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err("Choose a PDF to upload.".to_string()),
            Err(error) if error.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err("File too large!".to_string())
            }
            Err(error) => return Err(format!("Failed to read upload: {}", error.body_text())),
        };

        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|error| {
            if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
                "File too large!".to_string()
            } else {
                format!("Failed to read upload: {}", error.body_text())
            }
        })?;

        return Ok(Upload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
}

async fn process_upload(state: &AppState, handle: &SessionHandle, upload: Upload) {
    if let Err(error) = upload.validate(state.factory.config()) {
        warn!(file = %upload.file_name, size = upload.size_bytes(), %error, "upload rejected");
        handle.lock().await.flash = Some(Flash::error(error.to_string()));
        return;
    }

    {
        let mut guard = handle.lock().await;
        if let Err(error) = guard.session.begin_indexing() {
            guard.flash = Some(Flash::error(error.to_string()));
            return;
        }
    }

    // The build owns its own handle: a client that disconnects mid-upload does not
    // cancel it, and the session lock stays free so the page can report progress.
    let job = tokio::spawn(index_upload(state.factory.clone(), Arc::clone(handle), upload));
    if let Err(error) = job.await {
        warn!(%error, "indexing task did not complete");
        let mut guard = handle.lock().await;
        guard.session.abandon_indexing();
        guard.flash = Some(Flash::error("Error processing PDF: indexing was interrupted"));
    }
}

async fn index_upload(factory: ChainFactory, handle: SessionHandle, upload: Upload) {
    let outcome = factory.build_from_upload(upload).await;
    let mut guard = handle.lock().await;
    let flash = match guard.session.finish_indexing(outcome) {
        Ok(chunks) => Flash::success(format!("✅ Ready! {chunks} chunks indexed.")),
        Err(error) => Flash::error(error.to_string()),
    };
    guard.flash = Some(flash);
}

async fn upload(State(state): State<AppState>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    let (id, handle) = state.sessions.resolve(&headers).await;
    match read_upload(&mut multipart).await {
        Ok(upload) => process_upload(&state, &handle, upload).await,
        Err(message) => handle.lock().await.flash = Some(Flash::error(message)),
    }
    with_cookie(id, Redirect::to("/"))
}

#[derive(Debug, Deserialize)]
pub struct AskForm {
    question: String,
}

async fn ask(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<AskForm>) -> Response {
    let (id, handle) = state.sessions.resolve(&headers).await;
    let mut guard = handle.lock().await;

    match guard.session.ask(&form.question).await {
        Ok(answer) => {
            info!(
                session = %id,
                sources = answer.sources.len(),
                standalone = %answer.standalone_question,
                "question answered"
            );
        }
        Err(SessionError::EmptyQuestion) => {}
        Err(error) => {
            guard.flash = Some(Flash::error(error.to_string()));
        }
    }
    drop(guard);

    with_cookie(id, Redirect::to("/#latest"))
}

async fn clear(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (id, handle) = state.sessions.resolve(&headers).await;
    handle.lock().await.session.clear();
    with_cookie(id, Redirect::to("/"))
}

async fn end_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id_from(&headers) {
        if state.sessions.remove(&id).await {
            let live = state.sessions.len().await;
            info!(session = %id, live, "session ended");
        }
    }
    (
        [(
            SET_COOKIE,
            format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"),
        )],
        Redirect::to("/"),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::FlashLevel;
    use axum::http::HeaderValue;
    use pdf_chat_core::test_support::{pdf_bytes, DelayedEmbedder, ScriptedModel};
    use pdf_chat_core::{Embedder, RagConfig, SessionPhase};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn state_with(embedder: Arc<dyn Embedder>) -> AppState {
        let factory = ChainFactory::new(
            RagConfig::default(),
            embedder,
            Arc::new(ScriptedModel::new(std::iter::empty::<String>())),
        )
        .expect("default config is valid");
        AppState {
            factory,
            display: Arc::new(DisplayText::default()),
            sessions: SessionStore::default(),
        }
    }

    async fn settled_phase(handle: &SessionHandle) -> SessionPhase {
        for _ in 0..100 {
            let phase = handle.lock().await.session.phase();
            if phase != SessionPhase::Indexing {
                return phase;
            }
            sleep(Duration::from_millis(50)).await;
        }
        SessionPhase::Indexing
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={id}; lang=en"))
                .expect("valid header"),
        );
        assert_eq!(session_id_from(&headers), Some(id));
    }

    #[test]
    fn malformed_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("pdf_chat_session=not-a-uuid"),
        );
        assert_eq!(session_id_from(&headers), None);
        assert_eq!(session_id_from(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn store_reuses_known_sessions_and_isolates_new_ones() {
        let store = SessionStore::default();
        let (first, _) = store.resolve(&HeaderMap::new()).await;

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={first}")).expect("valid header"),
        );
        let (again, _) = store.resolve(&headers).await;
        let (other, _) = store.resolve(&HeaderMap::new()).await;

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(store.len().await, 2);

        assert!(store.remove(&first).await);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn indexing_finishes_after_the_request_is_dropped() {
        let state = state_with(Arc::new(DelayedEmbedder::new(Duration::from_millis(150))));
        let (_, handle) = state.sessions.resolve(&HeaderMap::new()).await;
        let upload = Upload::new(
            "biology.pdf",
            pdf_bytes(&["Mitochondria make ATP"]).expect("fixture pdf"),
        );

        let request = timeout(
            Duration::from_millis(20),
            process_upload(&state, &handle, upload),
        )
        .await;
        assert!(request.is_err(), "request should be dropped mid-build");

        assert_eq!(settled_phase(&handle).await, SessionPhase::Ready);
        let guard = handle.lock().await;
        assert_eq!(guard.session.chunk_count(), 1);
        assert_eq!(
            guard.flash.as_ref().map(|flash| flash.level),
            Some(FlashLevel::Success)
        );
    }

    #[tokio::test]
    async fn failed_indexing_reports_and_allows_retry() {
        let state = state_with(Arc::new(DelayedEmbedder::new(Duration::ZERO)));
        let (_, handle) = state.sessions.resolve(&HeaderMap::new()).await;

        let broken = Upload::new("broken.pdf", b"%PDF-1.4\n%broken".to_vec());
        process_upload(&state, &handle, broken).await;
        {
            let mut guard = handle.lock().await;
            assert_eq!(guard.session.phase(), SessionPhase::NoDocument);
            let flash = guard.flash.take().expect("failure is reported");
            assert_eq!(flash.level, FlashLevel::Error);
        }

        let upload = Upload::new(
            "biology.pdf",
            pdf_bytes(&["Mitochondria make ATP"]).expect("fixture pdf"),
        );
        process_upload(&state, &handle, upload).await;
        let guard = handle.lock().await;
        assert_eq!(guard.session.phase(), SessionPhase::Ready);
        assert!(guard
            .flash
            .as_ref()
            .is_some_and(|flash| flash.message.contains("1 chunks indexed")));
    }

    #[tokio::test]
    async fn wrong_extension_is_rejected_before_indexing() {
        let state = state_with(Arc::new(DelayedEmbedder::new(Duration::ZERO)));
        let (_, handle) = state.sessions.resolve(&HeaderMap::new()).await;

        process_upload(&state, &handle, Upload::new("notes.txt", b"hello".to_vec())).await;

        let guard = handle.lock().await;
        assert_eq!(guard.session.phase(), SessionPhase::NoDocument);
        assert_eq!(
            guard.flash.as_ref().map(|flash| flash.level),
            Some(FlashLevel::Error)
        );
    }
}
