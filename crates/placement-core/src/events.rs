//! Notifications sent to the host
//!
//! Events are fire-and-forget: a host that has stopped listening does not
//! affect the editor.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::coords::Viewport;
use crate::export::DrawFailure;
use crate::fields::FieldConfig;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EditorEvent {
    /// A page finished rendering and its viewport is current
    Rendered { viewport: Viewport },
    RenderFailed { page: u32, reason: String },
    /// The stamped document is ready
    #[serde(rename_all = "camelCase")]
    Modified {
        #[serde(skip)]
        bytes: Vec<u8>,
        base64: String,
        file_name: String,
        failures: Vec<DrawFailure>,
    },
    /// Field configuration export
    PdfConfig { fields: Vec<FieldConfig> },
}

impl EditorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EditorEvent::Rendered { .. } => "rendered",
            EditorEvent::RenderFailed { .. } => "renderFailed",
            EditorEvent::Modified { .. } => "modified",
            EditorEvent::PdfConfig { .. } => "pdfConfig",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<EditorEvent>>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<EditorEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Create an emitter together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EditorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Emitter that drops every event
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: EditorEvent) {
        let name = event.name();
        match &self.tx {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!(event = name, "Event receiver closed, dropping event");
                }
            }
            None => debug!(event = name, "No event listener"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers_events() {
        let (emitter, mut rx) = EventEmitter::channel();
        emitter.emit(EditorEvent::PdfConfig { fields: Vec::new() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "pdfConfig");
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (emitter, rx) = EventEmitter::channel();
        drop(rx);
        emitter.emit(EditorEvent::RenderFailed {
            page: 1,
            reason: "boom".to_string(),
        });
        EventEmitter::disconnected().emit(EditorEvent::PdfConfig { fields: Vec::new() });
    }

    #[test]
    fn test_modified_event_serializes_without_raw_bytes() {
        let event = EditorEvent::Modified {
            bytes: vec![1, 2, 3],
            base64: "AQID".to_string(),
            file_name: "stamped.pdf".to_string(),
            failures: Vec::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"].as_str(), Some("modified"));
        assert_eq!(json["base64"].as_str(), Some("AQID"));
        assert_eq!(json["fileName"].as_str(), Some("stamped.pdf"));
        assert!(json.get("bytes").is_none());
    }
}
