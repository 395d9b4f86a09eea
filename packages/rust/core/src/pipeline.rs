//! Document pipeline: upload → convert → store → cache.
//!
//! The two remote steps are not transactional. When storage fails after a
//! successful conversion the converted document is kept in
//! [`PipelineState::ConvertedNotPersisted`] so the caller can show it or
//! re-attempt only the storage step with [`ConversionOrchestrator::retry_persist`].

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use docchat_cache::{DocumentCache, PutOutcome};
use docchat_client::{Endpoint, Payload, RemoteClient};
use docchat_shared::{DocChatError, DocumentId, DocumentRef, Result};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Conversion service response. A missing or null `markdown` means "nothing extracted".
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertResponse {
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub json: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StoreRequest<'a> {
    markdown: &'a str,
}

#[derive(Debug, Deserialize)]
struct StoreResponse {
    #[serde(default)]
    id: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Pipeline types
// ---------------------------------------------------------------------------

/// Output of a successful conversion call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedDocument {
    /// Name the file was uploaded under.
    pub file_name: String,
    /// Extracted markdown; empty when the service could not extract any.
    pub markdown: String,
    /// Structured representation returned alongside the markdown.
    pub json: Option<serde_json::Value>,
}

/// Where the last submission ended up.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PipelineState {
    /// Nothing submitted yet.
    #[default]
    Idle,
    /// Converted, persisted, and cached.
    Ready(DocumentRef),
    /// Converted, but the storage step failed; nothing was cached.
    ConvertedNotPersisted(ConvertedDocument),
    /// The conversion step failed; nothing was stored or cached.
    ConversionFailed,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the document is cached.
    fn done(&self, document: &DocumentRef);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _document: &DocumentRef) {}
}

// ---------------------------------------------------------------------------
// ConversionOrchestrator
// ---------------------------------------------------------------------------

/// Drives the convert-then-store sequence and populates the document cache.
pub struct ConversionOrchestrator {
    client: RemoteClient,
    cache: DocumentCache,
    state: PipelineState,
}

impl ConversionOrchestrator {
    pub fn new(client: RemoteClient, cache: DocumentCache) -> Self {
        Self {
            client,
            cache,
            state: PipelineState::Idle,
        }
    }

    /// Outcome of the most recent submission.
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// The conversion result still waiting to be persisted, if any.
    pub fn converted(&self) -> Option<&ConvertedDocument> {
        match &self.state {
            PipelineState::ConvertedNotPersisted(doc) => Some(doc),
            _ => None,
        }
    }

    /// Convert `bytes`, persist the markdown, and cache it under the issued id.
    ///
    /// 1. Conversion service (multipart upload)
    /// 2. Storage service (JSON `{ markdown }`)
    /// 3. Cache write
    ///
    /// The cache is written exactly once, and only when both calls succeed.
    pub async fn submit(
        &mut self,
        file_name: &str,
        bytes: Vec<u8>,
        progress: &dyn ProgressReporter,
    ) -> Result<DocumentRef> {
        self.submit_with_cancel(file_name, bytes, progress, &CancellationToken::new())
            .await
    }

    /// Like [`submit`](Self::submit), aborting the in-flight call when `cancel` fires.
    /// A cancelled storage step still keeps the converted document.
    #[instrument(skip_all, fields(file_name = %file_name, size = bytes.len()))]
    pub async fn submit_with_cancel(
        &mut self,
        file_name: &str,
        bytes: Vec<u8>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<DocumentRef> {
        if bytes.is_empty() {
            return Err(DocChatError::validation(format!(
                "'{file_name}' is empty, nothing to convert"
            )));
        }

        progress.phase("Converting document");
        let converted = match self.convert(file_name, bytes, cancel).await {
            Ok(converted) => converted,
            Err(e) => {
                error!(error = %e, "conversion failed, no document created");
                self.state = PipelineState::ConversionFailed;
                return Err(e);
            }
        };

        if converted.markdown.is_empty() {
            warn!("conversion extracted no markdown, document will not open a chat");
        }

        self.persist(converted, cancel, progress).await
    }

    /// Re-attempt only the storage step for a document stuck in
    /// [`PipelineState::ConvertedNotPersisted`].
    pub async fn retry_persist(
        &mut self,
        progress: &dyn ProgressReporter,
    ) -> Result<DocumentRef> {
        match std::mem::take(&mut self.state) {
            PipelineState::ConvertedNotPersisted(converted) => {
                info!(file_name = %converted.file_name, "retrying storage step");
                self.persist(converted, &CancellationToken::new(), progress)
                    .await
            }
            other => {
                self.state = other;
                Err(DocChatError::validation(
                    "no converted document is awaiting persistence",
                ))
            }
        }
    }

    async fn convert(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<ConvertedDocument> {
        let response: ConvertResponse = self
            .client
            .call_as(Endpoint::Convert, Payload::file(file_name, bytes), cancel)
            .await
            .map_err(|e| match e {
                cancelled @ DocChatError::Cancelled { .. } => cancelled,
                other => DocChatError::Conversion(other.to_string()),
            })?;

        let markdown = response.markdown.unwrap_or_default();
        info!(
            markdown_len = markdown.len(),
            has_json = response.json.is_some(),
            "document converted"
        );

        Ok(ConvertedDocument {
            file_name: file_name.to_string(),
            markdown,
            json: response.json,
        })
    }

    async fn persist(
        &mut self,
        converted: ConvertedDocument,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<DocumentRef> {
        progress.phase("Storing document");
        let id = match self.store(&converted.markdown, cancel).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    error = %e,
                    markdown_len = converted.markdown.len(),
                    "storage failed after conversion, keeping converted document"
                );
                self.state = PipelineState::ConvertedNotPersisted(converted);
                return Err(e);
            }
        };

        let document = DocumentRef {
            id: id.clone(),
            content_len: converted.markdown.len(),
        };

        if self.cache.put(id, converted.markdown) == PutOutcome::Replaced {
            warn!(doc_id = %document.id, "storage service reissued an existing id");
        }

        info!(doc_id = %document.id, content_len = document.content_len, "document ready");
        progress.done(&document);
        self.state = PipelineState::Ready(document.clone());
        Ok(document)
    }

    async fn store(&self, markdown: &str, cancel: &CancellationToken) -> Result<DocumentId> {
        let payload = Payload::json(&StoreRequest { markdown })?;
        let response: StoreResponse = self
            .client
            .call_as(Endpoint::Store, payload, cancel)
            .await
            .map_err(|e| match e {
                cancelled @ DocChatError::Cancelled { .. } => cancelled,
                other => DocChatError::Storage(other.to_string()),
            })?;

        let id = match response.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(DocChatError::Storage(format!(
                    "store response has no usable id: {other}"
                )));
            }
        };

        if id.is_empty() {
            return Err(DocChatError::Storage("store response id is empty".into()));
        }
        Ok(DocumentId::new(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::client_for;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_convert(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn orchestrator(server: &MockServer) -> (ConversionOrchestrator, DocumentCache) {
        let cache = DocumentCache::unbounded();
        (ConversionOrchestrator::new(client_for(server), cache.clone()), cache)
    }

    #[tokio::test]
    async fn convert_store_and_cache() {
        let server = MockServer::start().await;
        mount_convert(
            &server,
            json!({ "markdown": "# Report", "json": { "pages": 1 } }),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .and(body_json(json!({ "markdown": "# Report" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "doc-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let (mut orch, cache) = orchestrator(&server);
        let doc = orch
            .submit("report.pdf", b"%PDF-1.7".to_vec(), &SilentProgress)
            .await
            .expect("submit");

        assert_eq!(doc.id, DocumentId::from("doc-1"));
        assert!(doc.activates_chat());
        assert_eq!(cache.get(&doc.id).unwrap(), "# Report");
        assert_eq!(orch.state(), &PipelineState::Ready(doc));
    }

    #[tokio::test]
    async fn storage_failure_leaves_cache_untouched() {
        let server = MockServer::start().await;
        mount_convert(&server, json!({ "markdown": "# Report", "json": null })).await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (mut orch, cache) = orchestrator(&server);
        let err = orch
            .submit("report.pdf", b"bytes".to_vec(), &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, DocChatError::Storage(_)), "got {err:?}");
        assert!(cache.is_empty());

        let converted = orch.converted().expect("converted document is kept");
        assert_eq!(converted.markdown, "# Report");
        assert_eq!(converted.file_name, "report.pdf");
    }

    #[tokio::test]
    async fn retry_persist_completes_after_storage_recovers() {
        let server = MockServer::start().await;
        mount_convert(&server, json!({ "markdown": "# Report" })).await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "doc-9" })))
            .mount(&server)
            .await;

        let (mut orch, cache) = orchestrator(&server);
        assert!(
            orch.submit("a.docx", b"bytes".to_vec(), &SilentProgress)
                .await
                .is_err()
        );
        assert!(cache.is_empty());

        let doc = orch.retry_persist(&SilentProgress).await.expect("retry");
        assert_eq!(doc.id.as_str(), "doc-9");
        assert_eq!(cache.get(&doc.id).unwrap(), "# Report");
        assert!(orch.converted().is_none());
    }

    #[tokio::test]
    async fn retry_persist_without_pending_document_is_rejected() {
        let server = MockServer::start().await;
        let (mut orch, _cache) = orchestrator(&server);
        let err = orch.retry_persist(&SilentProgress).await.unwrap_err();
        assert!(matches!(err, DocChatError::Validation { .. }));
        assert_eq!(orch.state(), &PipelineState::Idle);
    }

    #[tokio::test]
    async fn conversion_failure_skips_storage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(422).set_body_string("unsupported format"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "never" })))
            .expect(0)
            .mount(&server)
            .await;

        let (mut orch, cache) = orchestrator(&server);
        let err = orch
            .submit("x.bin", b"\x00\x01".to_vec(), &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, DocChatError::Conversion(_)), "got {err:?}");
        assert!(err.to_string().contains("422"));
        assert!(cache.is_empty());
        assert_eq!(orch.state(), &PipelineState::ConversionFailed);
    }

    #[tokio::test]
    async fn empty_markdown_is_stored_but_does_not_activate_chat() {
        let server = MockServer::start().await;
        mount_convert(&server, json!({ "markdown": null, "json": null })).await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .and(body_json(json!({ "markdown": "" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "doc-empty" })))
            .expect(1)
            .mount(&server)
            .await;

        let (mut orch, cache) = orchestrator(&server);
        let doc = orch
            .submit("scan.png", b"png".to_vec(), &SilentProgress)
            .await
            .expect("submit");

        assert!(!doc.activates_chat());
        assert_eq!(cache.get(&doc.id).unwrap(), "");
    }

    #[tokio::test]
    async fn numeric_store_id_is_accepted() {
        let server = MockServer::start().await;
        mount_convert(&server, json!({ "markdown": "text" })).await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 17 })))
            .mount(&server)
            .await;

        let (mut orch, cache) = orchestrator(&server);
        let doc = orch
            .submit("n.txt", b"text".to_vec(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(doc.id.as_str(), "17");
        assert!(cache.contains(&doc.id));
    }

    #[tokio::test]
    async fn missing_store_id_is_storage_error() {
        let server = MockServer::start().await;
        mount_convert(&server, json!({ "markdown": "text" })).await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "" })))
            .mount(&server)
            .await;

        let (mut orch, cache) = orchestrator(&server);
        let err = orch
            .submit("n.txt", b"text".to_vec(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DocChatError::Storage(_)));
        assert!(cache.is_empty());
        assert!(orch.converted().is_some());
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_before_any_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (mut orch, _cache) = orchestrator(&server);
        let err = orch
            .submit("empty.pdf", Vec::new(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DocChatError::Validation { .. }));
        assert_eq!(orch.state(), &PipelineState::Idle);
    }

    #[tokio::test]
    async fn cancelled_storage_keeps_converted_document() {
        let server = MockServer::start().await;
        mount_convert(&server, json!({ "markdown": "# Slow" })).await;
        Mock::given(method("POST"))
            .and(path("/store"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "late" }))
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let (mut orch, cache) = orchestrator(&server);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = orch
            .submit_with_cancel("slow.pdf", b"bytes".to_vec(), &SilentProgress, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled(), "got {err:?}");
        assert!(cache.is_empty());
        assert_eq!(orch.converted().map(|d| d.markdown.as_str()), Some("# Slow"));
    }
}
