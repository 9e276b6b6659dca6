//! REST client for the chat persistence service.
//!
//! Endpoint layout, relative to the configured base URL:
//! - `GET  conversations/{id}/messages`: history
//! - `POST conversations/{id}/messages`: create, returns the record
//! - `POST conversations/{id}/read`: mark ids as read
//! - `POST conversations/{id}/attachments`: multipart upload

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::{BackendError, ChatBackend};
use crate::config::BackendConfig;
use crate::types::{
    Attachment, ConversationId, MediaType, MessageId, MessageRecord, NewMessage, PendingUpload,
};

/// Body of the mark-as-read call.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadRequest<'a> {
    message_ids: &'a [MessageId],
}

/// HTTP implementation of [`ChatBackend`].
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a client for the service at `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Url`] if the base URL does not parse.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut base_url = Url::parse(&config.base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });

        Ok(Self { client, base_url })
    }

    /// Base URL all endpoints are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `conversations/{id}/{leaf}`, escaping the conversation id.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Rejected`] if the base URL cannot carry a path.
    pub fn endpoint(&self, conversation_id: &ConversationId, leaf: &str) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::Rejected("backend URL cannot be a base".to_owned()))?
            .pop_if_empty()
            .extend(["conversations", conversation_id.as_str(), leaf]);
        Ok(url)
    }
}

/// Map non-success responses to [`BackendError`].
async fn check(resp: Response, conversation_id: &ConversationId) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(%status, conversation = %conversation_id, "backend call failed: {body}");
    Err(match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(conversation_id.to_string()),
        StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            BackendError::Rejected(body)
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
            BackendError::Unavailable(body)
        }
        other => BackendError::Status {
            status: other.as_u16(),
            body,
        },
    })
}

fn media_type_field(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Image => "image",
        MediaType::Video => "video",
        MediaType::Other => "other",
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessageRecord>, BackendError> {
        let url = self.endpoint(conversation_id, "messages")?;
        let resp = self.client.get(url).send().await?;
        let records: Vec<MessageRecord> = check(resp, conversation_id).await?.json().await?;
        debug!(conversation = %conversation_id, count = records.len(), "history fetched");
        Ok(records)
    }

    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, BackendError> {
        let url = self.endpoint(&message.conversation_id, "messages")?;
        let resp = self.client.post(url).json(&message).send().await?;
        let record: MessageRecord = check(resp, &message.conversation_id).await?.json().await?;
        debug!(local_id = %message.local_id, id = %record.id, "message persisted");
        Ok(record)
    }

    async fn mark_as_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), BackendError> {
        let url = self.endpoint(conversation_id, "read")?;
        let resp = self
            .client
            .post(url)
            .json(&ReadRequest { message_ids })
            .send()
            .await?;
        check(resp, conversation_id).await?;
        Ok(())
    }

    async fn upload_attachments(
        &self,
        conversation_id: &ConversationId,
        uploads: &[PendingUpload],
    ) -> Result<Vec<Attachment>, BackendError> {
        let url = self.endpoint(conversation_id, "attachments")?;
        let form = uploads.iter().fold(Form::new(), |form, upload| {
            form.text("mediaType", media_type_field(upload.media_type))
                .part(
                    "file",
                    Part::bytes(upload.data.clone()).file_name(upload.name.clone()),
                )
        });
        let resp = self.client.post(url).multipart(form).send().await?;
        let attachments: Vec<Attachment> = check(resp, conversation_id).await?.json().await?;
        if attachments.len() != uploads.len() {
            return Err(BackendError::Rejected(format!(
                "uploaded {} files but backend returned {} references",
                uploads.len(),
                attachments.len()
            )));
        }
        Ok(attachments)
    }
}
