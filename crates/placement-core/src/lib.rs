//! Field placement over rendered PDF pages
//!
//! Users drag text fields over a rendered page; on release each position is
//! mapped from canvas pixels into PDF user space and stored per field. The
//! stored configuration is later exported on its own or stamped into the
//! document with lopdf.
//!
//! - `render_queue`: single-in-flight page rendering with last-writer-wins coalescing
//! - `coords`: pixel <-> PDF user space mapping
//! - `fields`: field registry with single and duplicated (multi-position) fields
//! - `drag`: drag sessions that commit positions on release
//! - `export`: per-field isolated stamping and configuration export
//! - `editor`: the above wired together for one document session

pub mod config;
pub mod coords;
pub mod drag;
pub mod editor;
pub mod error;
pub mod events;
pub mod export;
pub mod fields;
pub mod rasterizer;
pub mod render_queue;
pub mod writer;

pub use config::EditorConfig;
pub use coords::{to_document_space, to_pixel_space, CanvasGeometry, Position, Viewport};
pub use drag::{DragController, DragEvent, DragOutcome, DragPhase, ElementView, FieldTarget};
pub use editor::{ContextMenu, MenuAction, PlacementEditor};
pub use error::PlacementError;
pub use events::{EditorEvent, EventEmitter};
pub use export::{build_output_document, DrawFailure, ExportOptions, ExportReport};
pub use fields::{FieldConfig, FieldDefaults, FieldRegistry, Placement};
pub use rasterizer::{DocumentSource, LopdfRasterizer, Rasterizer, ViewportParams};
pub use render_queue::{spawn_render_service, RenderHandle, RenderQueue, RenderSnapshot};
pub use writer::{DocumentWriter, LopdfWriter, Rgb, StandardFont};
