use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;

use super::error::DifyError;
use super::sse::{Frame, LineDecoder};
use super::stream::{ChatAggregator, Flow, WorkflowAggregator};
use super::types::{ChatReply, ChatRequest, WorkflowRequest};
use crate::markers::HeartbeatThrottle;

pub const DEFAULT_BASE_URL: &str = "https://api.dify.ai/v1";

/// The two streaming calls the runner and the proposal builder make.
///
/// Implemented by [`DifyClient`] for real traffic and by scripted fakes in
/// tests.
pub trait DifyApi: Send + Sync {
    /// Stream one chat query. `heartbeat` is ticked for every frame read.
    fn stream_chat(
        &self,
        req: &ChatRequest,
        heartbeat: &mut HeartbeatThrottle,
    ) -> impl Future<Output = Result<ChatReply, DifyError>> + Send;

    /// Run the proposal workflow once and return its aggregated text.
    fn run_workflow(
        &self,
        req: &WorkflowRequest,
    ) -> impl Future<Output = Result<String, DifyError>> + Send;
}

pub struct DifyClient {
    client: Client,
    chat_url: String,
    workflow_url: String,
    chat_key: String,
    workflow_key: String,
}

impl DifyClient {
    pub fn new(chat_key: String, workflow_key: String, timeout: Duration) -> Result<Self, DifyError> {
        Self::with_base_url(chat_key, workflow_key, DEFAULT_BASE_URL, timeout)
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        chat_key: String,
        workflow_key: String,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, DifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            client,
            chat_url: format!("{base}/chat-messages"),
            workflow_url: format!("{base}/workflows/run"),
            chat_key,
            workflow_key,
        })
    }

    async fn post<T: Serialize + Sync + ?Sized>(
        &self,
        url: &str,
        api_key: &str,
        body: &T,
    ) -> Result<Response, DifyError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(DifyError::from_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

impl DifyApi for DifyClient {
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        heartbeat: &mut HeartbeatThrottle,
    ) -> Result<ChatReply, DifyError> {
        if self.chat_key.is_empty() {
            return Err(DifyError::MissingApiKey("chat"));
        }
        let mut response = self.post(&self.chat_url, &self.chat_key, req).await?;

        let carried = Some(req.conversation_id.clone()).filter(|id| !id.is_empty());
        let mut aggregator = ChatAggregator::new(carried);
        let mut lines = LineDecoder::new();

        while let Some(chunk) = response.chunk().await? {
            for frame in lines.push(&chunk) {
                heartbeat.tick();
                if aggregator.feed(frame) == Flow::Stop {
                    return Ok(aggregator.finish());
                }
            }
        }
        if let Some(frame) = lines.finish() {
            aggregator.feed(frame);
        }
        Ok(aggregator.finish())
    }

    async fn run_workflow(&self, req: &WorkflowRequest) -> Result<String, DifyError> {
        if self.workflow_key.is_empty() {
            return Err(DifyError::MissingApiKey("workflow"));
        }
        let mut response = self.post(&self.workflow_url, &self.workflow_key, req).await?;

        let mut aggregator = WorkflowAggregator::new();
        let mut lines = LineDecoder::new();

        while let Some(chunk) = response.chunk().await? {
            for frame in lines.push(&chunk) {
                if aggregator.feed(frame)? == Flow::Stop {
                    return Ok(aggregator.finish());
                }
            }
        }
        if let Some(frame @ Frame::Data(_)) = lines.finish() {
            aggregator.feed(frame)?;
        }
        Ok(aggregator.finish())
    }
}
