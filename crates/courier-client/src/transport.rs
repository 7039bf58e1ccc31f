use std::future::Future;

use reqwest::{Response, StatusCode};
use uuid::Uuid;

use courier_types::api::{ErrorResponse, SendMessageRequest};
use courier_types::models::{Message, MessageContent};

use crate::error::ClientError;

/// Request/response half of the messaging API.
pub trait ChatTransport: Send + Sync {
    fn fetch_history(
        &self,
        peer_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send;

    fn send_message(
        &self,
        peer_id: Uuid,
        content: &MessageContent,
    ) -> impl Future<Output = Result<Message, ClientError>> + Send;
}

/// `ChatTransport` over the server's HTTP routes, authenticated with a
/// bearer token from the identity service.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

impl ChatTransport for HttpTransport {
    async fn fetch_history(&self, peer_id: Uuid) -> Result<Vec<Message>, ClientError> {
        let response = self
            .http
            .get(format!("{}/messages/{}", self.base_url, peer_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn send_message(
        &self,
        peer_id: Uuid,
        content: &MessageContent,
    ) -> Result<Message, ClientError> {
        let response = self
            .http
            .post(format!("{}/messages/send/{}", self.base_url, peer_id))
            .bearer_auth(&self.token)
            .json(&SendMessageRequest::from(content))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }
}

/// Turn non-2xx responses into `ClientError::Rejected`, keeping the
/// server's reason when it sent one.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => reason(status),
    };

    Err(ClientError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}
