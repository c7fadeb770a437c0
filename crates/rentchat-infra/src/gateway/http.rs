//! `HttpReservationGateway`: the concrete [`ReservationGateway`].
//!
//! - `GET {api}/reservations/{id}` returns the lease context.
//! - `GET {api}/reservations/{id}/history` returns status history events.
//! - `GET {ntfy}/{topic}/json?poll=1&since=all` returns the topic backlog.
//! - `POST {ntfy}/{topic}` publishes a message, sender label in `Title`.
//! - `GET {ntfy}/{topic}/json[?since=<unix secs>]` streams records until the
//!   connection drops, replaying from `since` first when given.
//!
//! The API token is wrapped in [`SecretString`] and only exposed when the
//! `Authorization` header is built.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use rentchat_core::gateway::{LiveStream, ReservationGateway};
use rentchat_types::config::ChatConfig;
use rentchat_types::error::GatewayError;
use rentchat_types::feed::{HistoryEvent, LiveMessage};
use rentchat_types::lease::LeaseContext;

use super::ndjson::{parse_batch, parse_line, take_line};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reservation API + pub/sub gateway over HTTP.
pub struct HttpReservationGateway {
    client: reqwest::Client,
    api_base_url: String,
    ntfy_base_url: String,
    identity: String,
    api_token: Option<SecretString>,
}

impl HttpReservationGateway {
    /// Build a gateway from the loaded configuration.
    ///
    /// No request timeout is set on the client itself: the live stream is
    /// long-lived, and one-shot fetches are bounded by the engine.
    pub fn new(config: &ChatConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base_url: trim_base(&config.gateway.api_base_url),
            ntfy_base_url: trim_base(&config.gateway.ntfy_base_url),
            identity: config.identity.clone(),
            api_token: config
                .gateway
                .api_token
                .clone()
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base_url)
    }

    fn topic_url(&self, topic_id: &str) -> String {
        format!("{}/{topic_id}", self.ntfy_base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    fn live_request(&self, topic_id: &str, since: Option<i64>) -> RequestBuilder {
        let request = self.client.get(format!("{}/json", self.topic_url(topic_id)));
        match since {
            Some(since) => request.query(&[("since", since.to_string())]),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, GatewayError> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("failed to parse {url}: {e}")))
    }
}

impl ReservationGateway for HttpReservationGateway {
    fn current_user_identity(&self) -> String {
        self.identity.clone()
    }

    async fn load_lease_context(&self, reservation_id: &str) -> Result<LeaseContext, GatewayError> {
        self.get_json(&self.api_url(&format!("/reservations/{reservation_id}")))
            .await
    }

    async fn fetch_history_events(&self, topic_id: &str) -> Result<Vec<HistoryEvent>, GatewayError> {
        self.get_json(&self.api_url(&format!("/reservations/{topic_id}/history")))
            .await
    }

    async fn fetch_messages(&self, topic_id: &str) -> Result<Vec<LiveMessage>, GatewayError> {
        let url = format!("{}/json", self.topic_url(topic_id));
        let response = self
            .client
            .get(&url)
            .query(&[("poll", "1"), ("since", "all")])
            .send()
            .await
            .map_err(transport_error)?;
        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| GatewayError::Decode(format!("failed to read {url}: {e}")))?;
        parse_batch(&body)
    }

    async fn send_message(&self, topic_id: &str, text: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.topic_url(topic_id))
            .header("Title", &self.identity)
            .body(text.to_string())
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }

    fn subscribe(&self, topic_id: &str, since: Option<i64>) -> LiveStream {
        let request = self.live_request(topic_id, since);

        Box::pin(async_stream::try_stream! {
            let response = request.send().await.map_err(transport_error)?;
            let response = check_status(response).await?;

            let mut byte_stream = response.bytes_stream();
            let mut buffer = Vec::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(|e| GatewayError::Stream(format!("response body read: {e}")))?;
                buffer.extend_from_slice(&chunk);

                while let Some(line) = take_line(&mut buffer) {
                    if let Some(record) = parse_line(&line)? {
                        yield record;
                    }
                }
            }
        })
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport(format!("HTTP request failed: {err}"))
}

fn status_error(status: StatusCode, body: String) -> GatewayError {
    match status.as_u16() {
        404 => GatewayError::NotFound,
        401 | 403 => GatewayError::Unauthorized,
        code => GatewayError::Http { status: code, body },
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, body = %body, "Gateway error response");
    Err(status_error(status, body))
}
