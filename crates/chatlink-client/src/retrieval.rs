//! Pull-based retrieval API: conversation summaries, message history, and the
//! REST mark-as-read request.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use chatlink_core::error::{ChatError, ChatResult};
use chatlink_core::messages::{ConversationSummaryDto, MessageDto, ReadRequest};
use chatlink_core::model::{ConversationId, UserId};

use crate::transport::BoxFuture;

/// The request/response side of the chat backend.
pub trait RetrievalApi: Send + Sync + 'static {
    fn conversation_summaries(
        &self,
        user_id: UserId,
    ) -> BoxFuture<'_, ChatResult<Vec<ConversationSummaryDto>>>;

    /// Most recent page of a conversation, newest last.
    fn recent_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, ChatResult<Vec<MessageDto>>>;

    /// Older page `page` of `size` messages, newest last within the page.
    fn message_page(
        &self,
        conversation_id: ConversationId,
        page: u32,
        size: usize,
    ) -> BoxFuture<'_, ChatResult<Vec<MessageDto>>>;

    fn mark_read(&self, request: ReadRequest) -> BoxFuture<'_, ChatResult<()>>;
}

/// [`RetrievalApi`] over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpRetrievalApi {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpRetrievalApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> ChatResult<T> {
        debug!(%url, "GET");
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChatError::Retrieval(format!("GET {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ChatError::Retrieval(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ChatError::Retrieval(format!("GET {url}: invalid body: {e}")))
    }
}

impl RetrievalApi for HttpRetrievalApi {
    fn conversation_summaries(
        &self,
        user_id: UserId,
    ) -> BoxFuture<'_, ChatResult<Vec<ConversationSummaryDto>>> {
        Box::pin(self.get_json(self.url(&format!("/api/conversaciones/resumen/{user_id}"))))
    }

    fn recent_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, ChatResult<Vec<MessageDto>>> {
        Box::pin(self.get_json(self.url(&format!(
            "/api/mensajes/conversacion/{conversation_id}"
        ))))
    }

    fn message_page(
        &self,
        conversation_id: ConversationId,
        page: u32,
        size: usize,
    ) -> BoxFuture<'_, ChatResult<Vec<MessageDto>>> {
        Box::pin(self.get_json(self.url(&format!(
            "/api/mensajes/conversacion/{conversation_id}/paginado?page={page}&size={size}"
        ))))
    }

    fn mark_read(&self, request: ReadRequest) -> BoxFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let url = self.url("/api/mensajes/leer");
            debug!(%url, conversation_id = request.conversation_id, "PUT");
            let response = self
                .http_client
                .put(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| ChatError::Retrieval(format!("PUT {url} failed: {e}")))?;
            if !response.status().is_success() {
                return Err(ChatError::Retrieval(format!(
                    "PUT {url} returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}
