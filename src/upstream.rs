use crate::error::UpstreamError;
use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

pub const RESPONSES_PATH: &str = "/v1/responses";

const OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";
const RESPONSE_COMPLETED: &str = "response.completed";
const RESPONSE_FAILED: &str = "response.failed";
const ERROR_EVENT: &str = "error";

/// Body sent to the Responses endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub input: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// `id` is the continuation token to send as `previous_response_id` next turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub id: String,
    pub output_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Completed { id: String },
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, UpstreamError>> + Send>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn create_response(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError>;

    async fn create_response_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    id: String,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<Value>,
}

impl ResponsesBody {
    fn into_completion(self) -> CompletionResponse {
        let output_text = match self.output_text {
            Some(text) => text,
            None => collect_output_text(&self.output),
        };
        CompletionResponse {
            id: self.id,
            output_text,
        }
    }
}

/// Joins the `output_text` parts of every message item in `output`.
pub fn collect_output_text(output: &[Value]) -> String {
    output
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

/// Client for an OpenAI-compatible Responses API.
#[derive(Debug, Clone)]
pub struct OpenAIResponsesClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIResponsesClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, RESPONSES_PATH)
    }

    async fn send(&self, request: &CompletionRequest) -> Result<reqwest::Response, UpstreamError> {
        let resp = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionClient for OpenAIResponsesClient {
    async fn create_response(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        let resp = self.send(&request).await?;
        let body = resp.bytes().await?;
        let parsed: ResponsesBody =
            serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(parsed.into_completion())
    }

    async fn create_response_stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionStream, UpstreamError> {
        request.stream = true;
        let resp = self.send(&request).await?;

        let mut decoder = SseDecoder::default();
        let events = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(chunk) => decoder
                    .push(&chunk)
                    .into_iter()
                    .filter_map(|data| parse_stream_event(&data).transpose())
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(UpstreamError::from(e))],
            })
            .flat_map(stream::iter);
        Ok(Box::pin(events))
    }
}

/// Splits a server-sent event byte stream into `data` payloads.
///
/// Bytes are buffered until an event's terminating blank line arrives, so a
/// character split across network chunks is decoded whole.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feeds a chunk and returns the data payload of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some((end, next)) = event_boundary(&self.buffer) {
            let block = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
            self.buffer.drain(..next);

            let data = block
                .lines()
                .map(|line| line.trim_end_matches('\r'))
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect::<Vec<_>>()
                .join("\n");
            if !data.is_empty() {
                payloads.push(data);
            }
        }
        payloads
    }
}

/// Finds the blank line closing the first buffered event as
/// `(end of the event block, start of the next event)`.
fn event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    buffer
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .find_map(|(i, _)| match &buffer[i + 1..] {
            [b'\n', ..] => Some((i, i + 2)),
            [b'\r', b'\n', ..] => Some((i, i + 3)),
            _ => None,
        })
}

/// Maps one event payload to a relay event. Events the relay does not use map to `None`.
pub fn parse_stream_event(data: &str) -> Result<Option<StreamEvent>, UpstreamError> {
    if data == "[DONE]" {
        return Ok(None);
    }
    let event: Value =
        serde_json::from_str(data).map_err(|e| UpstreamError::Decode(e.to_string()))?;
    match event.get("type").and_then(Value::as_str) {
        Some(OUTPUT_TEXT_DELTA) => {
            let delta = event
                .get("delta")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(Some(StreamEvent::Delta(delta.to_string())))
        }
        Some(RESPONSE_COMPLETED) => match event.pointer("/response/id").and_then(Value::as_str) {
            Some(id) => Ok(Some(StreamEvent::Completed { id: id.to_string() })),
            None => Err(UpstreamError::Decode(
                "completed event without response id".to_string(),
            )),
        },
        Some(RESPONSE_FAILED) | Some(ERROR_EVENT) => Err(UpstreamError::Stream(event.to_string())),
        _ => Ok(None),
    }
}
