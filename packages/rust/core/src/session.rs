//! Session-scoped entry point wiring client, cache, pipeline, and chat.
//!
//! A [`DocChat`] owns a fresh [`DocumentCache`]; dropping it tears the cache
//! and the chat log down with it.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use docchat_cache::DocumentCache;
use docchat_client::RemoteClient;
use docchat_shared::{AppConfig, ClientConfig, DocumentRef, Result};

use crate::chat::{ChatSession, TurnOutcome};
use crate::pipeline::{ConversionOrchestrator, ProgressReporter};

pub struct DocChat {
    orchestrator: ConversionOrchestrator,
    chat: ChatSession,
    cache: DocumentCache,
}

impl DocChat {
    /// Build a session from application config.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = RemoteClient::new(&ClientConfig::try_from(config)?)?;
        Ok(Self::with_parts(
            client,
            DocumentCache::new(config.cache.capacity),
        ))
    }

    /// Build a session from an existing client and cache.
    pub fn with_parts(client: RemoteClient, cache: DocumentCache) -> Self {
        Self {
            orchestrator: ConversionOrchestrator::new(client.clone(), cache.clone()),
            chat: ChatSession::new(client, cache.clone()),
            cache,
        }
    }

    /// Convert and persist a document, then bind the chat to it if it has content.
    ///
    /// The previous document is unbound first, so a failed or empty upload
    /// leaves the chat inactive.
    #[instrument(skip_all, fields(session_id = %self.chat.session_id()))]
    pub async fn upload(
        &mut self,
        file_name: &str,
        bytes: Vec<u8>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<DocumentRef> {
        self.chat.unbind();
        let document = self
            .orchestrator
            .submit_with_cancel(file_name, bytes, progress, cancel)
            .await?;
        self.activate(&document);
        Ok(document)
    }

    /// Re-attempt storage of a converted-but-unpersisted document.
    pub async fn retry_persist(&mut self, progress: &dyn ProgressReporter) -> Result<DocumentRef> {
        let document = self.orchestrator.retry_persist(progress).await?;
        self.activate(&document);
        Ok(document)
    }

    /// Ask a question about the active document.
    pub async fn ask(&self, question: &str) -> TurnOutcome {
        self.chat.send(question).await
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    pub fn orchestrator(&self) -> &ConversionOrchestrator {
        &self.orchestrator
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    fn activate(&self, document: &DocumentRef) {
        if !self.chat.bind(document) {
            info!(doc_id = %document.id, "document stored without content, chat not opened");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::IgnoreReason;
    use crate::pipeline::{PipelineState, SilentProgress};
    use crate::test_support::client_for;
    use docchat_shared::{DocumentId, Sender};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount(server: &MockServer, route: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    fn session(server: &MockServer) -> DocChat {
        DocChat::with_parts(client_for(server), DocumentCache::new(8))
    }

    #[tokio::test]
    async fn upload_then_ask() {
        let server = MockServer::start().await;
        mount(&server, "/convert", 200, json!({ "markdown": "# Report", "json": {} })).await;
        mount(&server, "/store", 200, json!({ "id": "doc-1" })).await;
        mount(&server, "/webhook/qa", 200, json!({ "resposta": "42" })).await;

        let mut chat = session(&server);
        let doc = chat
            .upload("report.pdf", b"pdf".to_vec(), &SilentProgress, &CancellationToken::new())
            .await
            .expect("upload");

        assert_eq!(chat.cache().get(&doc.id).unwrap(), "# Report");
        assert_eq!(chat.chat().document_id(), Some(DocumentId::from("doc-1")));

        let outcome = chat.ask("What is the total?").await;
        assert!(matches!(outcome, TurnOutcome::Answered(ref a) if a == "42"));

        let state = chat.chat().snapshot();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].sender, Sender::User);
        assert!(!state.pending);
    }

    #[tokio::test]
    async fn empty_conversion_does_not_open_chat() {
        let server = MockServer::start().await;
        mount(&server, "/convert", 200, json!({ "markdown": "" })).await;
        mount(&server, "/store", 200, json!({ "id": "doc-0" })).await;

        let mut chat = session(&server);
        let doc = chat
            .upload("blank.pdf", b"pdf".to_vec(), &SilentProgress, &CancellationToken::new())
            .await
            .expect("upload");

        assert!(!doc.activates_chat());
        assert!(chat.chat().document_id().is_none());
        assert!(chat.ask("anything?").await.is_ignored());
    }

    #[tokio::test]
    async fn storage_failure_keeps_chat_inactive_until_retry() {
        let server = MockServer::start().await;
        mount(&server, "/convert", 200, json!({ "markdown": "# Notes" })).await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount(&server, "/store", 200, json!({ "id": "doc-2" })).await;

        let mut chat = session(&server);
        let err = chat
            .upload("notes.docx", b"docx".to_vec(), &SilentProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, docchat_shared::DocChatError::Storage(_)));
        assert!(chat.cache().is_empty());
        assert!(chat.chat().document_id().is_none());
        assert!(matches!(
            chat.orchestrator().state(),
            PipelineState::ConvertedNotPersisted(_)
        ));

        let doc = chat.retry_persist(&SilentProgress).await.expect("retry");
        assert_eq!(chat.chat().document_id(), Some(doc.id));
    }

    #[tokio::test]
    async fn new_upload_replaces_previous_binding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "markdown": "# First" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "markdown": "" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "doc-1" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount(&server, "/store", 200, json!({ "id": "doc-2" })).await;
        Mock::given(method("POST"))
            .and(path("/webhook/qa"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resposta": "stale" })))
            .expect(0)
            .mount(&server)
            .await;

        let mut chat = session(&server);
        let first = chat
            .upload("first.pdf", b"one".to_vec(), &SilentProgress, &CancellationToken::new())
            .await
            .expect("first upload");
        assert_eq!(chat.chat().document_id(), Some(first.id));

        let empty = chat
            .upload("blank.pdf", b"two".to_vec(), &SilentProgress, &CancellationToken::new())
            .await
            .expect("empty upload");
        assert_eq!(empty.id.as_str(), "doc-2");
        assert!(chat.chat().document_id().is_none());
        assert!(matches!(
            chat.ask("what does it say?").await,
            TurnOutcome::Ignored(IgnoreReason::NoDocument)
        ));

        chat.chat().bind(&DocumentRef {
            id: DocumentId::from("doc-1"),
            content_len: 7,
        });
        let err = chat
            .upload("broken.pdf", b"three".to_vec(), &SilentProgress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, docchat_shared::DocChatError::Conversion(_)));
        assert!(chat.chat().document_id().is_none());
        assert!(matches!(
            chat.ask("what does it say?").await,
            TurnOutcome::Ignored(IgnoreReason::NoDocument)
        ));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.services.qa_url = "mailto:someone@example.com".into();
        assert!(DocChat::new(&config).is_err());

        let config = AppConfig::default();
        let chat = DocChat::new(&config).expect("defaults are valid");
        assert_eq!(chat.cache().capacity(), 64);
    }
}
