//! Remote mail API: a JSON-over-HTTPS client and the trait the sync layer
//! talks to.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{Draft, Folder, Mailbox, Message, MessageDelta};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    /// Message already translated for the user, when the server has one.
    #[serde(default)]
    pub description: Option<String>,
}

/// Per-item outcome of a batch action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub uid: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Seen,
    Favorite,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: String,
    data: Option<T>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct SavedDraft {
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct ScheduledDraft {
    unschedule_url: String,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<ItemResult>,
}

#[async_trait]
pub trait MailApi: Send + Sync {
    async fn list_mailboxes(&self, user_id: i64) -> Result<Vec<Mailbox>, ApiError>;

    async fn list_folders(&self, mailbox: &Mailbox) -> Result<Vec<Folder>, ApiError>;

    async fn message_delta(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        cursor: Option<&str>,
    ) -> Result<MessageDelta, ApiError>;

    async fn fetch_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
    ) -> Result<Vec<Message>, ApiError>;

    /// UIDs of up to `limit` messages older than `before`, newest first.
    /// Without `before` the page starts at the newest message.
    async fn older_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, ApiError>;

    /// Saves the draft remotely and returns its remote id.
    async fn save_draft(&self, mailbox: &Mailbox, draft: &Draft) -> Result<String, ApiError>;

    async fn send_draft(&self, mailbox: &Mailbox, draft: &Draft) -> Result<(), ApiError>;

    /// Hands the draft to the server for sending at `send_at` and returns
    /// the URL that cancels it.
    async fn schedule_draft(
        &self,
        mailbox: &Mailbox,
        draft: &Draft,
        send_at: DateTime<Utc>,
    ) -> Result<String, ApiError>;

    async fn move_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
        destination: &str,
    ) -> Result<Vec<ItemResult>, ApiError>;

    async fn flag_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
        flag: FlagKind,
        value: bool,
    ) -> Result<Vec<ItemResult>, ApiError>;

    async fn snooze_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
        until: DateTime<Utc>,
    ) -> Result<Vec<ItemResult>, ApiError>;

    async fn unsnooze_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
    ) -> Result<Vec<ItemResult>, ApiError>;
}

/// `MailApi` over HTTPS with bearer-token auth.
pub struct HttpMailApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpMailApi {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ApiError> {
        debug!("GET {}", path);
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        required(read_envelope(response).await?)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, ApiError> {
        debug!("POST {}", path);
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        read_envelope(response).await
    }

    async fn batch(&self, path: &str, body: serde_json::Value) -> Result<Vec<ItemResult>, ApiError> {
        let response: BatchResponse = required(self.post(path, &body).await?)?;
        Ok(response.results)
    }
}

fn required<T>(data: Option<T>) -> Result<T, ApiError> {
    data.ok_or_else(|| ApiError::Decode("response has no data".to_string()))
}

/// Maps the HTTP status and the `{result, data, error}` envelope to a result.
async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let description = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body)
            .ok()
            .and_then(|envelope| envelope.error)
            .map(|error| error.description.unwrap_or(error.code));
        return Err(ApiError::from_status(status.as_u16(), description));
    }

    let envelope: ApiResponse<T> =
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
    if envelope.result != "success" {
        let message = envelope
            .error
            .map(|error| error.description.unwrap_or(error.code))
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(ApiError::Validation {
            status: status.as_u16(),
            message,
        });
    }
    Ok(envelope.data)
}

#[async_trait]
impl MailApi for HttpMailApi {
    async fn list_mailboxes(&self, user_id: i64) -> Result<Vec<Mailbox>, ApiError> {
        let mut mailboxes: Vec<Mailbox> = self.get(&format!("/users/{}/mailboxes", user_id), &[]).await?;
        for mailbox in &mut mailboxes {
            mailbox.user_id = user_id;
        }
        Ok(mailboxes)
    }

    async fn list_folders(&self, mailbox: &Mailbox) -> Result<Vec<Folder>, ApiError> {
        self.get(&format!("/mailboxes/{}/folders", mailbox.mailbox_id), &[])
            .await
    }

    async fn message_delta(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        cursor: Option<&str>,
    ) -> Result<MessageDelta, ApiError> {
        let path = format!("/mailboxes/{}/folders/{}/delta", mailbox.mailbox_id, folder_id);
        match cursor {
            Some(cursor) => self.get(&path, &[("cursor", cursor)]).await,
            None => self.get(&path, &[]).await,
        }
    }

    async fn fetch_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
    ) -> Result<Vec<Message>, ApiError> {
        let path = format!("/mailboxes/{}/folders/{}/messages", mailbox.mailbox_id, folder_id);
        let mut messages: Vec<Message> =
            required(self.post(&path, &serde_json::json!({ "uids": uids })).await?)?;
        for message in &mut messages {
            message.folder_id = folder_id.to_string();
        }
        Ok(messages)
    }

    async fn older_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, ApiError> {
        let path = format!("/mailboxes/{}/folders/{}/messages", mailbox.mailbox_id, folder_id);
        let limit = limit.to_string();
        match before {
            Some(before) => self.get(&path, &[("before", before), ("limit", &limit)]).await,
            None => self.get(&path, &[("limit", &limit)]).await,
        }
    }

    async fn save_draft(&self, mailbox: &Mailbox, draft: &Draft) -> Result<String, ApiError> {
        let path = format!("/mailboxes/{}/drafts", mailbox.mailbox_id);
        let saved: SavedDraft = required(self.post(&path, draft).await?)?;
        Ok(saved.uuid)
    }

    async fn send_draft(&self, mailbox: &Mailbox, draft: &Draft) -> Result<(), ApiError> {
        let path = format!("/mailboxes/{}/drafts/send", mailbox.mailbox_id);
        self.post::<_, serde_json::Value>(&path, draft).await?;
        Ok(())
    }

    async fn schedule_draft(
        &self,
        mailbox: &Mailbox,
        draft: &Draft,
        send_at: DateTime<Utc>,
    ) -> Result<String, ApiError> {
        let path = format!("/mailboxes/{}/drafts/schedule", mailbox.mailbox_id);
        let body = serde_json::json!({ "draft": draft, "schedule_date": send_at });
        let scheduled: ScheduledDraft = required(self.post(&path, &body).await?)?;
        debug!("Draft {} scheduled for {}", draft.local_uuid, send_at);
        Ok(scheduled.unschedule_url)
    }

    async fn move_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
        destination: &str,
    ) -> Result<Vec<ItemResult>, ApiError> {
        let path = format!("/mailboxes/{}/messages/move", mailbox.mailbox_id);
        self.batch(
            &path,
            serde_json::json!({ "folder_id": folder_id, "uids": uids, "destination": destination }),
        )
        .await
    }

    async fn flag_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
        flag: FlagKind,
        value: bool,
    ) -> Result<Vec<ItemResult>, ApiError> {
        let path = format!("/mailboxes/{}/messages/flag", mailbox.mailbox_id);
        self.batch(
            &path,
            serde_json::json!({ "folder_id": folder_id, "uids": uids, "flag": flag, "value": value }),
        )
        .await
    }

    async fn snooze_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
        until: DateTime<Utc>,
    ) -> Result<Vec<ItemResult>, ApiError> {
        let path = format!("/mailboxes/{}/messages/snooze", mailbox.mailbox_id);
        self.batch(
            &path,
            serde_json::json!({ "folder_id": folder_id, "uids": uids, "until": until }),
        )
        .await
    }

    async fn unsnooze_messages(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
    ) -> Result<Vec<ItemResult>, ApiError> {
        let path = format!("/mailboxes/{}/messages/unsnooze", mailbox.mailbox_id);
        self.batch(&path, serde_json::json!({ "folder_id": folder_id, "uids": uids }))
            .await
    }
}
