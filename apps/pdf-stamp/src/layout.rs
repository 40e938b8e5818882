//! Pixel-space layout files
//!
//! A layout lists where each field was dropped on the rendered page, in the
//! same pixel space the drag gestures use. Replaying it through the editor
//! gives the same result as dragging by hand.

use anyhow::{Context, Result};
use placement_core::{DragEvent, DragOutcome, FieldTarget, PlacementEditor, Position};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    /// Page to render before replaying; defaults to the configured page
    #[serde(default)]
    pub page: Option<u32>,
    pub placements: Vec<FieldPlacement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPlacement {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub font_size: Option<f64>,
    #[serde(default)]
    pub font_family: Option<String>,
    pub x: f64,
    pub y: f64,
    /// Extra positions stamped with the same text
    #[serde(default)]
    pub copies: Vec<PixelPoint>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl Layout {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layout file: {}", path.display()))?;
        Self::from_str(&content)
    }

    pub fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("Failed to parse layout JSON")
    }
}

/// Replay a layout as drag gestures. Returns the number of committed marks.
pub fn replay(editor: &mut PlacementEditor, layout: &Layout) -> Result<usize> {
    let mut committed = 0;
    for placement in &layout.placements {
        let key = placement.key.as_str();
        if !editor.registry().contains(key) {
            editor
                .add_field(key)
                .with_context(|| format!("Failed to add field {}", key))?;
        }
        if let Some(value) = &placement.value {
            editor.set_value(key, Some(value.clone()))?;
        }
        if let Some(size) = placement.font_size {
            editor
                .set_font_size(key, size)
                .with_context(|| format!("Invalid font size for {}", key))?;
        }
        if let Some(family) = &placement.font_family {
            editor.set_font_family(key, family)?;
        }

        let anchor = FieldTarget::field(key);
        committed += drop_at(editor, &anchor, Position::new(placement.x, placement.y))?;

        for copy in &placement.copies {
            let view = editor.duplicate(&anchor)?;
            committed += drop_at(editor, &view.target, Position::new(copy.x, copy.y))?;
        }
    }
    Ok(committed)
}

fn drop_at(editor: &mut PlacementEditor, target: &FieldTarget, to: Position) -> Result<usize> {
    let from = editor
        .element_views()
        .into_iter()
        .find(|view| &view.target == target)
        .map(|view| view.offset)
        .unwrap_or_default();

    editor.handle_drag(&DragEvent::start(target.clone()))?;
    editor.handle_drag(&DragEvent::moved(target.clone(), to.x - from.x, to.y - from.y))?;
    match editor.handle_drag(&DragEvent::end(target.clone()))? {
        DragOutcome::Committed { position, .. } => {
            tracing::debug!(element = %target, x = position.x, y = position.y, "Placed field");
            Ok(1)
        }
        _ => {
            tracing::warn!(element = %target, "Placement was not committed");
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_layout() {
        let layout = Layout::from_str(
            r#"{
                "page": 2,
                "placements": [
                    {"key": "name", "value": "Jane Doe", "fontSize": 14, "x": 50, "y": 60,
                     "copies": [{"x": 150, "y": 160}]},
                    {"key": "date", "x": 10, "y": 20}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(layout.page, Some(2));
        assert_eq!(layout.placements.len(), 2);
        assert_eq!(layout.placements[0].font_size, Some(14.0));
        assert_eq!(layout.placements[0].copies.len(), 1);
        assert_eq!(layout.placements[1].value, None);
    }

    #[test]
    fn test_reject_missing_coordinates() {
        assert!(Layout::from_str(r#"{"placements": [{"key": "name"}]}"#).is_err());
    }
}
