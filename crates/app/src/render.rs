use pdf_chat_core::{Chunk, ConversationTurn, DisplayText, RagConfig, Role, Session, SessionPhase};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLevel {
    Success,
    Error,
}

/// One-shot status message shown after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Error,
            message: message.into(),
        }
    }
}

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; display: flex; min-height: 100vh; color: #111827; }
aside { width: 300px; background: #f9fafb; padding: 1.5rem; border-right: 1px solid #e5e7eb; }
main { flex: 1; padding: 2rem 3rem; max-width: 900px; }
.main-header { font-size: 2.2rem; font-weight: 700; color: #1a56db; margin: 0; }
.sub-header { font-size: 1rem; color: #6b7280; margin-bottom: 1.5rem; }
.stat-row { display: flex; gap: 1rem; }
.stat-box { background: #f0f4ff; border-radius: 10px; padding: 1rem; text-align: center; flex: 1; }
.turn { border-radius: 10px; padding: 0.75rem 1rem; margin: 0.75rem 0; white-space: pre-wrap; }
.turn.user { background: #f3f4f6; }
.turn.assistant { background: #eef2ff; }
.flash { border-radius: 8px; padding: 0.75rem 1rem; margin-bottom: 1rem; }
.flash.success { background: #ecfdf5; color: #065f46; }
.flash.error { background: #fef2f2; color: #991b1b; }
.info { background: #eff6ff; border-radius: 8px; padding: 0.75rem 1rem; margin-top: 1rem; }
.source { border-top: 1px solid #e5e7eb; padding: 0.5rem 0; }
.caption { color: #6b7280; font-size: 0.85rem; white-space: pre-wrap; }
.footer { text-align: center; color: #9ca3af; font-size: 0.8rem; margin-top: 2rem; }
form.chat { display: flex; gap: 0.5rem; margin-top: 1rem; }
form.chat input { flex: 1; padding: 0.6rem; }
button { padding: 0.5rem 0.9rem; cursor: pointer; }
"#;

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// "Chunk 1 · Page 3", with a one-based chunk position and page number.
pub fn source_label(position: usize, chunk: &Chunk) -> String {
    format!("Chunk {} · Page {}", position + 1, chunk.display_page())
}

/// Full page for one session. `embedder` names the embedding backend actually serving the index.
pub fn page(
    display: &DisplayText,
    config: &RagConfig,
    embedder: &str,
    session: &Session,
    flash: Option<&Flash>,
) -> String {
    let mut html = String::new();
    let refresh = if session.phase() == SessionPhase::Indexing {
        r#"<meta http-equiv="refresh" content="2">"#
    } else {
        ""
    };

    let _ = write!(
        html,
        r#"<!doctype html><html><head><meta charset="utf-8">{refresh}<title>{icon} {title}</title><style>{STYLE}</style></head><body>"#,
        icon = escape_html(&display.app_icon),
        title = escape_html(&display.app_title),
    );

    sidebar(&mut html, display, config, embedder, session);

    let _ = write!(
        html,
        r#"<main><p class="main-header">{icon} {title}</p><p class="sub-header">{description}</p>"#,
        icon = escape_html(&display.app_icon),
        title = escape_html(&display.app_title),
        description = escape_html(&display.app_description),
    );

    if let Some(flash) = flash {
        let class = match flash.level {
            FlashLevel::Success => "success",
            FlashLevel::Error => "error",
        };
        let _ = write!(
            html,
            r#"<div class="flash {class}">{}</div>"#,
            escape_html(&flash.message)
        );
    }

    match session.phase() {
        SessionPhase::NoDocument => landing(&mut html, config),
        SessionPhase::Indexing => {
            html.push_str(r#"<div class="info">Indexing your document...</div>"#);
        }
        SessionPhase::Ready => transcript(&mut html, config, session.display_history()),
    }

    let _ = write!(
        html,
        r#"<div class="footer">{title} · Built by {author} · Powered by Rust, axum &amp; lopdf</div></main></body></html>"#,
        title = escape_html(&display.app_title),
        author = escape_html(&display.author_name),
    );
    html
}

fn sidebar(
    html: &mut String,
    display: &DisplayText,
    config: &RagConfig,
    embedder: &str,
    session: &Session,
) {
    let _ = write!(
        html,
        r#"<aside><h2>Upload Document</h2>
<form action="/upload" method="post" enctype="multipart/form-data">
<label>Choose a PDF (max {max}MB)<br><input type="file" name="file" accept=".pdf,application/pdf" required></label><br><br>
<button type="submit">⚡ Process PDF</button>
</form><hr>"#,
        max = config.max_file_size_mb,
    );

    if session.phase() == SessionPhase::Ready {
        let _ = write!(
            html,
            r#"<strong>📊 Session Stats</strong><div class="stat-row"><div class="stat-box">Chunks<br><b>{chunks}</b></div><div class="stat-box">Messages<br><b>{messages}</b></div></div>"#,
            chunks = session.chunk_count(),
            messages = session.message_count(),
        );
        if let Some(document) = session.document() {
            let _ = write!(
                html,
                r#"<p class="caption">{name} · {pages} pages<br>sha256 {checksum}<br>indexed {at}</p>"#,
                name = escape_html(&document.file_name),
                pages = document.page_count,
                checksum = escape_html(document.checksum.get(..12).unwrap_or(document.checksum.as_str())),
                at = document.ingested_at.format("%Y-%m-%d %H:%M UTC"),
            );
        }
        html.push_str(
            r#"<form action="/clear" method="post"><button type="submit">🗑️ Clear Chat</button></form>"#,
        );
    }

    let _ = write!(
        html,
        r#"<hr><strong>⚙️ Model Config</strong><br>🤖 <code>{model}</code><br>🌡️ Temp: <code>{temperature}</code><br>🔍 Top-K: <code>{k}</code><br>🧬 Embeddings: <code>{embedder}</code>
<form action="/session/end" method="post"><br><button type="submit">End session</button></form>
<hr><div class="caption">Built by <b>{author}</b><br><a href="{github}" target="_blank">GitHub</a> · <a href="{linkedin}" target="_blank">LinkedIn</a></div></aside>"#,
        model = escape_html(&config.llm_model),
        temperature = config.llm_temperature,
        k = config.retriever_k,
        embedder = escape_html(embedder),
        author = escape_html(&display.author_name),
        github = escape_html(&display.github_url),
        linkedin = escape_html(&display.linkedin_url),
    );
}

fn landing(html: &mut String, config: &RagConfig) {
    let _ = write!(
        html,
        r#"<div class="stat-row">
<div class="stat-box">⚡<br><b>{model}</b><br><small>OpenAI-compatible API</small></div>
<div class="stat-box">🔍<br><b>RAG Pipeline</b><br><small>in-memory index</small></div>
<div class="stat-box">📄<br><b>{size}MB PDFs</b><br><small>{k} sources per answer</small></div>
</div><div class="info">👈 Upload a PDF from the sidebar to start chatting with your document!</div>"#,
        model = escape_html(&config.llm_model),
        size = config.max_file_size_mb,
        k = config.retriever_k,
    );
}

fn transcript(html: &mut String, config: &RagConfig, turns: &[ConversationTurn]) {
    for (position, turn) in turns.iter().enumerate() {
        let (class, who) = match turn.role {
            Role::User => ("user", "🧑"),
            Role::Assistant | Role::System => ("assistant", "🤖"),
        };
        let anchor = if position + 1 == turns.len() {
            r#" id="latest""#
        } else {
            ""
        };
        let _ = write!(
            html,
            r#"<div class="turn {class}"{anchor}>{who} {}"#,
            escape_html(&turn.content)
        );
        if turn.role == Role::Assistant && !turn.sources.is_empty() {
            sources(html, config, &turn.sources);
        }
        html.push_str("</div>");
    }

    html.push_str(
        r#"<form class="chat" action="/ask" method="post"><input name="question" placeholder="Ask anything about your document..." autocomplete="off" required autofocus><button type="submit">Send</button></form>"#,
    );
}

fn sources(html: &mut String, config: &RagConfig, chunks: &[Chunk]) {
    html.push_str("<details><summary>📖 View Sources</summary>");
    for (position, chunk) in chunks.iter().enumerate() {
        let _ = write!(
            html,
            r#"<div class="source"><b>{}</b><div class="caption">{}</div></div>"#,
            escape_html(&source_label(position, chunk)),
            escape_html(&chunk.preview(config.source_preview_chars)),
        );
    }
    html.push_str("</details>");
}
