//! Page rasterization contract
//!
//! The render queue only needs a rasterizer to turn a page number into a
//! [`Viewport`]. Painting pixels is the host's concern; [`LopdfRasterizer`]
//! derives the viewport geometry from the page's MediaBox.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use lopdf::{Document, Object, ObjectId};
use tracing::debug;

use crate::coords::{Position, Viewport};
use crate::error::PlacementError;

/// Scale and rotation a page is rendered with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportParams {
    pub scale: f64,
    pub rotation: u16,
}

impl Default for ViewportParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation: 0,
        }
    }
}

/// Where the document comes from
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Bytes(Vec<u8>),
    /// Base64-encoded document bytes
    Base64(String),
    Path(PathBuf),
}

impl DocumentSource {
    /// Resolve the source to raw document bytes
    pub fn into_bytes(self) -> Result<Vec<u8>, PlacementError> {
        match self {
            DocumentSource::Bytes(bytes) => Ok(bytes),
            DocumentSource::Base64(data) => base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| PlacementError::Load(format!("invalid base64 data: {}", e))),
            DocumentSource::Path(path) => std::fs::read(&path)
                .map_err(|e| PlacementError::Load(format!("{}: {}", path.display(), e))),
        }
    }
}

#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    fn page_count(&self) -> u32;

    /// Render a 1-based page and report the geometry it was rendered with
    async fn render_page(
        &self,
        page_number: u32,
        params: ViewportParams,
    ) -> Result<Viewport, PlacementError>;
}

/// Rasterizer over a parsed lopdf document
pub struct LopdfRasterizer {
    doc: Document,
    page_count: u32,
}

impl LopdfRasterizer {
    pub fn load_document(bytes: &[u8]) -> Result<Self, PlacementError> {
        let doc = Document::load_mem(bytes).map_err(|e| PlacementError::Load(e.to_string()))?;
        let page_count = doc.get_pages().len() as u32;
        if page_count == 0 {
            return Err(PlacementError::Load("document has no pages".to_string()));
        }
        debug!(page_count, "Loaded document");
        Ok(Self { doc, page_count })
    }

    fn page_id(&self, page_number: u32) -> Result<ObjectId, PlacementError> {
        self.doc
            .get_pages()
            .get(&page_number)
            .copied()
            .ok_or(PlacementError::PageRange {
                page: page_number,
                page_count: self.page_count,
            })
    }

    /// MediaBox `[x, y, width, height]` of a page, following inheritance
    pub fn media_box(&self, page_number: u32) -> Result<[f64; 4], PlacementError> {
        let page_id = self.page_id(page_number)?;
        let array = inherited_attribute(&self.doc, page_id, b"MediaBox")
            .ok_or_else(|| PlacementError::Geometry(format!("page {} has no MediaBox", page_number)))?;
        let values: Vec<f64> = array.iter().filter_map(|obj| number(&self.doc, obj)).collect();
        let [x1, y1, x2, y2] = values[..] else {
            return Err(PlacementError::Geometry(format!(
                "page {} has a malformed MediaBox",
                page_number
            )));
        };
        Ok([x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs()])
    }
}

#[async_trait]
impl Rasterizer for LopdfRasterizer {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    async fn render_page(
        &self,
        page_number: u32,
        params: ViewportParams,
    ) -> Result<Viewport, PlacementError> {
        let [x, y, width, height] = self.media_box(page_number)?;
        if !(width > 0.0 && height > 0.0) {
            return Err(PlacementError::Geometry(format!(
                "page {} has an empty MediaBox",
                page_number
            )));
        }
        if !(params.scale.is_finite() && params.scale > 0.0) {
            return Err(PlacementError::Geometry(format!(
                "invalid scale {}",
                params.scale
            )));
        }

        let (width_px, height_px) = if params.rotation % 180 == 90 {
            (height * params.scale, width * params.scale)
        } else {
            (width * params.scale, height * params.scale)
        };

        Ok(Viewport {
            page_number,
            width_px,
            height_px,
            box_origin: Position::new(x, y),
            box_width: width,
            box_height: height,
            scale: params.scale,
            rotation: params.rotation,
        })
    }
}

fn inherited_attribute<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Vec<Object>> {
    let mut current = Some(page_id);
    let mut depth = 0;
    while let Some(node_id) = current {
        // Page trees deeper than this are malformed (or cyclic)
        if depth > 64 {
            return None;
        }
        depth += 1;
        let node = doc.get_dictionary(node_id).ok()?;
        if let Ok(value) = node.get(key) {
            let value = match value {
                Object::Reference(id) => doc.get_object(*id).ok()?,
                other => other,
            };
            return value.as_array().ok();
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn number(doc: &Document, obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(v) => Some(*v as f64),
        Object::Real(v) => Some(*v as f64),
        Object::Reference(id) => doc.get_object(*id).ok().and_then(|o| number(doc, o)),
        _ => None,
    }
}
