//! Aggregation of streamed events into text.
//!
//! Both aggregators consume [`Frame`]s and are independent of the transport,
//! so the same code runs against live responses and test fixtures. Malformed
//! JSON payloads are skipped: partial and keep-alive lines are expected.

use serde_json::Value;
use tracing::{debug, warn};

use super::error::DifyError;
use super::sse::Frame;
use super::types::{ChatEvent, ChatReply, WorkflowEvent};

/// Whether the stream should keep being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

fn parse_payload(payload: &str) -> Option<Value> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            let preview: String = payload.chars().take(100).collect();
            debug!(error = %e, payload = %preview, "skipping malformed stream payload");
            None
        }
    }
}

/// Collects `answer` fragments and the session id of a chat stream.
#[derive(Debug, Default)]
pub struct ChatAggregator {
    conversation_id: Option<String>,
    answer: String,
}

impl ChatAggregator {
    /// Start with the session id carried from the previous step, if any. A
    /// carried id is kept; otherwise the first id seen in the stream is used.
    pub fn new(conversation_id: Option<String>) -> Self {
        Self {
            conversation_id,
            answer: String::new(),
        }
    }

    pub fn feed(&mut self, frame: Frame) -> Flow {
        let payload = match frame {
            Frame::Done => return Flow::Stop,
            Frame::Data(payload) => payload,
        };
        let Some(value) = parse_payload(&payload) else {
            return Flow::Continue;
        };

        let event = ChatEvent::decode(&value);
        if self.conversation_id.is_none()
            && let Some(id) = event.conversation_id()
        {
            self.conversation_id = Some(id.to_string());
        }
        match event {
            ChatEvent::Answer { answer, .. } => self.answer.push_str(&answer),
            ChatEvent::Error { message } => warn!(%message, "chat stream reported an error"),
            ChatEvent::Other { .. } => {}
        }
        Flow::Continue
    }

    pub fn finish(self) -> ChatReply {
        ChatReply {
            conversation_id: self.conversation_id,
            answer: self.answer,
        }
    }
}

/// Collects the output of a workflow stream.
///
/// `text_chunk` and generic fragments accumulate in order. A
/// `workflow_finished` event carrying text replaces whatever was
/// accumulated, since it holds the complete final output. An `error` event
/// fails the attempt.
#[derive(Debug, Default)]
pub struct WorkflowAggregator {
    text: String,
    finished: Option<String>,
}

impl WorkflowAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, frame: Frame) -> Result<Flow, DifyError> {
        let payload = match frame {
            Frame::Done => return Ok(Flow::Stop),
            Frame::Data(payload) => payload,
        };
        let Some(value) = parse_payload(&payload) else {
            return Ok(Flow::Continue);
        };

        match WorkflowEvent::decode(&value) {
            WorkflowEvent::Finished(Some(output)) => self.finished = Some(output),
            WorkflowEvent::Finished(None) => {
                debug!("workflow finished without a text output");
            }
            WorkflowEvent::TextChunk(text) | WorkflowEvent::Fragment(text) => {
                self.text.push_str(&text);
            }
            WorkflowEvent::Error(message) => return Err(DifyError::Workflow(message)),
            WorkflowEvent::Unrecognized => {}
        }
        Ok(Flow::Continue)
    }

    pub fn finish(self) -> String {
        self.finished.unwrap_or(self.text)
    }
}
