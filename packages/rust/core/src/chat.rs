//! Single-flight question/answer session over one cached document.
//!
//! A [`ChatSession`] owns the message log and the `pending` flag. Only one
//! question is in flight at a time: a `send` issued while another is awaiting
//! its answer is ignored, not queued. The state lock is never held across an
//! await.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use docchat_cache::DocumentCache;
use docchat_client::{Endpoint, Payload, RemoteClient};
use docchat_shared::{
    ChatMessage, DocChatError, DocumentId, DocumentRef, SessionId, SessionState,
};

/// Assistant message appended when a turn fails.
pub const CONSULTATION_ERROR: &str = "consultation error";

/// Assistant message appended when the QA service answers without an answer field.
pub const NO_ANSWER_PLACEHOLDER: &str = "no answer could be obtained";

/// Answer fields, in order of precedence.
const ANSWER_FIELDS: [&str; 2] = ["resposta", "output"];

#[derive(Debug, Serialize)]
struct QaRequest<'a> {
    #[serde(rename = "docId")]
    doc_id: &'a str,
    pergunta: &'a str,
    conteudo: &'a str,
}

/// Why a `send` left the session untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyQuestion,
    NoDocument,
    Pending,
}

/// Result of one `send`.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The QA service answered; the text was appended.
    Answered(String),
    /// The turn failed and [`CONSULTATION_ERROR`] was appended.
    Failed(DocChatError),
    /// The caller cancelled; the question stays in the log without an answer.
    Cancelled,
    /// Preconditions not met; nothing changed.
    Ignored(IgnoreReason),
}

impl TurnOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

/// Pick the answer out of a QA response: `resposta`, then `output`, then the placeholder.
///
/// Scalar answers are rendered as text. Empty strings, `0`, `false`, `null`,
/// and nested objects or arrays count as absent.
pub fn extract_answer(response: &serde_json::Value) -> String {
    ANSWER_FIELDS
        .iter()
        .find_map(|field| response.get(field).and_then(answer_text))
        .unwrap_or_else(|| NO_ANSWER_PLACEHOLDER.to_string())
}

fn answer_text(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;

    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

pub struct ChatSession {
    client: RemoteClient,
    cache: DocumentCache,
    state: Mutex<SessionState>,
}

impl ChatSession {
    pub fn new(client: RemoteClient, cache: DocumentCache) -> Self {
        Self {
            client,
            cache,
            state: Mutex::new(SessionState::new()),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.lock().session_id
    }

    /// Bind the session to a document. Documents with empty content are refused.
    pub fn bind(&self, document: &DocumentRef) -> bool {
        if !document.activates_chat() {
            debug!(doc_id = %document.id, "document has no content, chat stays inactive");
            return false;
        }
        let mut state = self.lock();
        info!(session_id = %state.session_id, doc_id = %document.id, "chat activated");
        state.document_id = Some(document.id.clone());
        true
    }

    /// Detach the bound document. The message log is kept.
    pub fn unbind(&self) {
        self.lock().document_id = None;
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.lock().document_id.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    /// Copy of the full session state for rendering.
    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    /// Ask a question about the bound document.
    pub async fn send(&self, question: &str) -> TurnOutcome {
        self.send_with_cancel(question, &CancellationToken::new())
            .await
    }

    /// Ask a question; firing `cancel` abandons the QA call and clears `pending`.
    ///
    /// Dropping the returned future mid-flight also clears `pending`.
    #[instrument(skip_all, fields(session_id = %self.session_id()))]
    pub async fn send_with_cancel(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let doc_id = {
            let mut state = self.lock();
            if question.trim().is_empty() {
                return TurnOutcome::Ignored(IgnoreReason::EmptyQuestion);
            }
            let Some(doc_id) = state.document_id.clone() else {
                return TurnOutcome::Ignored(IgnoreReason::NoDocument);
            };
            if state.pending {
                debug!("question already in flight, ignoring");
                return TurnOutcome::Ignored(IgnoreReason::Pending);
            }
            state.messages.push(ChatMessage::user(question));
            state.pending = true;
            doc_id
        };
        let turn = PendingTurn::new(&self.state);

        let content = match self.cache.get(&doc_id) {
            Ok(content) => content,
            Err(e) => {
                warn!(doc_id = %doc_id, error = %e, "document content missing, QA not contacted");
                turn.finish(Some(ChatMessage::assistant(CONSULTATION_ERROR)));
                return TurnOutcome::Failed(e);
            }
        };

        let request = QaRequest {
            doc_id: doc_id.as_str(),
            pergunta: question,
            conteudo: &content,
        };
        let payload = match Payload::json(&request) {
            Ok(payload) => payload,
            Err(e) => {
                turn.finish(Some(ChatMessage::assistant(CONSULTATION_ERROR)));
                return TurnOutcome::Failed(e);
            }
        };

        match self
            .client
            .call_with_cancel(Endpoint::Qa, payload, cancel)
            .await
        {
            Ok(response) => {
                let answer = extract_answer(&response);
                info!(doc_id = %doc_id, answer_len = answer.len(), "question answered");
                turn.finish(Some(ChatMessage::assistant(answer.clone())));
                TurnOutcome::Answered(answer)
            }
            Err(e) if e.is_cancelled() => {
                info!(doc_id = %doc_id, "question cancelled");
                turn.finish(None);
                TurnOutcome::Cancelled
            }
            Err(e) => {
                warn!(doc_id = %doc_id, error = %e, "QA call failed");
                turn.finish(Some(ChatMessage::assistant(CONSULTATION_ERROR)));
                TurnOutcome::Failed(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears `pending` when a turn ends, including when its future is dropped.
struct PendingTurn<'a> {
    state: &'a Mutex<SessionState>,
    finished: bool,
}

impl<'a> PendingTurn<'a> {
    fn new(state: &'a Mutex<SessionState>) -> Self {
        Self {
            state,
            finished: false,
        }
    }

    fn finish(mut self, reply: Option<ChatMessage>) {
        let mut state = lock_state(self.state);
        if let Some(reply) = reply {
            state.messages.push(reply);
        }
        state.pending = false;
        self.finished = true;
    }
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("turn abandoned, clearing pending");
            lock_state(self.state).pending = false;
        }
    }
}
