use thiserror::Error;

use crate::export::DrawFailure;

#[derive(Error, Debug, Clone)]
pub enum PlacementError {
    #[error("Failed to load document: {0}")]
    Load(String),

    #[error("Page {page} is out of range (document has {page_count} pages)")]
    PageRange { page: u32, page_count: u32 },

    #[error("Invalid geometry: {0}")]
    Geometry(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Field key already issued: {0}")]
    DuplicateField(String),

    #[error("Unknown instance {instance} for field {key}")]
    UnknownInstance { key: String, instance: String },

    #[error("Field {0} has several positions; an instance key is required")]
    MissingInstance(String),

    #[error("Cannot remove the last position of field {0}")]
    LastInstance(String),

    #[error("Invalid font size {size} for field {key}")]
    InvalidFontSize { key: String, size: f64 },

    #[error("Draw failed: {0}")]
    Draw(String),

    #[error("Export failed for every field ({} failures)", .0.len())]
    ExportFailed(Vec<DrawFailure>),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("No page has been rendered yet")]
    NoViewport,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
