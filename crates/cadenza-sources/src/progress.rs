//! Correlated progress events and their consumer-side reconciliation.
//!
//! Events travel over an in-process channel and may arrive duplicated or
//! out of order. The producer guarantees nothing beyond "every event
//! carries the caller's request id"; ordering is repaired on the consumer
//! side by `ProgressTracker`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStage {
    Prepare,
    InstallTool,
    DownloadAudio,
    Finalize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

/// Cloneable producer handle. Sends are best-effort: a consumer that went
/// away (or a `null()` sink) silently drops events, never fails the
/// operation that emitted them.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<(String, ProgressEvent)>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(String, ProgressEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn null() -> Self {
        Self { tx: None }
    }

    pub fn emit(
        &self,
        request_id: &str,
        stage: ProgressStage,
        message: impl Into<String>,
        progress: Option<u8>,
    ) {
        if let Some(tx) = &self.tx {
            let event = ProgressEvent {
                stage,
                message: message.into(),
                progress,
            };
            let _ = tx.send((request_id.to_string(), event));
        }
    }
}

/// What a consumer should display for one request after reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressView {
    pub stage: ProgressStage,
    pub message: String,
    pub progress: Option<u8>,
}

/// High-water-mark merge of possibly reordered events, keyed by request id.
///
/// The newest stage and message always win; the numeric value never goes
/// backwards. An event with no numeric value keeps the previous number
/// only while download activity is ongoing (its stage is DownloadAudio);
/// any other stage without a number clears it.
#[derive(Default)]
pub struct ProgressTracker {
    requests: HashMap<String, ProgressView>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, request_id: &str, event: &ProgressEvent) -> ProgressView {
        let merged = match self.requests.get(request_id) {
            None => ProgressView {
                stage: event.stage,
                message: event.message.clone(),
                progress: event.progress,
            },
            Some(previous) => {
                let progress = match event.progress {
                    Some(new) => Some(previous.progress.map_or(new, |old| old.max(new))),
                    None if event.stage == ProgressStage::DownloadAudio => previous.progress,
                    None => None,
                };
                ProgressView {
                    stage: event.stage,
                    message: event.message.clone(),
                    progress,
                }
            }
        };
        self.requests.insert(request_id.to_string(), merged.clone());
        merged
    }

    pub fn view(&self, request_id: &str) -> Option<&ProgressView> {
        self.requests.get(request_id)
    }

    pub fn forget(&mut self, request_id: &str) {
        self.requests.remove(request_id);
    }
}
