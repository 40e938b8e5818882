//! Coordinate transformation between canvas pixels and PDF user space
//!
//! Pixel space has its origin at the top-left of the page element and grows
//! downwards. PDF user space has its origin at the bottom-left of the page box
//! and grows upwards. Positions only cross between the two through
//! [`to_document_space`] and [`to_pixel_space`].

use serde::{Deserialize, Serialize};

use crate::error::PlacementError;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Geometry of a rendered page, published once per successful render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub page_number: u32,
    pub width_px: f64,
    pub height_px: f64,
    /// Lower-left corner of the page box in PDF user space
    pub box_origin: Position,
    pub box_width: f64,
    pub box_height: f64,
    pub scale: f64,
    /// Carried for the host; the mapping below assumes an unrotated page.
    pub rotation: u16,
}

/// On-screen placement of the canvas the page was painted into, relative to
/// the page element that hosts the draggable fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasGeometry {
    pub offset: Position,
    pub width_px: f64,
    pub height_px: f64,
}

impl CanvasGeometry {
    /// Canvas sized exactly like the viewport and anchored at the page origin
    pub fn from_viewport(viewport: &Viewport) -> Self {
        Self {
            offset: Position::default(),
            width_px: viewport.width_px,
            height_px: viewport.height_px,
        }
    }

    /// Reject a canvas with a non-finite offset or a non-positive size
    pub fn check(&self) -> Result<(), PlacementError> {
        check_dimension("canvas width", self.width_px)?;
        check_dimension("canvas height", self.height_px)?;
        if !self.offset.is_finite() {
            return Err(PlacementError::Geometry(format!(
                "non-finite canvas offset ({}, {})",
                self.offset.x, self.offset.y
            )));
        }
        Ok(())
    }

    /// Clamp a pixel position to the canvas rectangle.
    ///
    /// NaN bounds are ignored rather than panicking; callers that need a
    /// well-formed canvas run [`CanvasGeometry::check`] first.
    pub fn clamp(&self, pos: Position) -> Position {
        let max_x = self.offset.x + self.width_px.max(0.0);
        let max_y = self.offset.y + self.height_px.max(0.0);
        Position {
            x: pos.x.max(self.offset.x).min(max_x),
            y: pos.y.max(self.offset.y).min(max_y),
        }
    }
}

fn check_dimension(name: &str, value: f64) -> Result<(), PlacementError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PlacementError::Geometry(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}

fn check_geometry(viewport: &Viewport, canvas: &CanvasGeometry) -> Result<(), PlacementError> {
    check_dimension("box width", viewport.box_width)?;
    check_dimension("box height", viewport.box_height)?;
    if !viewport.box_origin.is_finite() {
        return Err(PlacementError::Geometry("non-finite box origin".to_string()));
    }
    canvas.check()
}

/// Convert a pixel position (page-element coordinates, top-left origin) to PDF
/// user space (bottom-left origin, points).
pub fn to_document_space(
    pixel: Position,
    viewport: &Viewport,
    canvas: &CanvasGeometry,
) -> Result<Position, PlacementError> {
    check_geometry(viewport, canvas)?;
    if !pixel.is_finite() {
        return Err(PlacementError::Geometry(format!(
            "non-finite pixel position ({}, {})",
            pixel.x, pixel.y
        )));
    }

    // Canvas-local pixels
    let local_x = pixel.x - canvas.offset.x;
    let local_y = pixel.y - canvas.offset.y;

    let ratio_x = viewport.box_width / canvas.width_px;
    let ratio_y = viewport.box_height / canvas.height_px;

    // Flip Y axis
    Ok(Position {
        x: viewport.box_origin.x + local_x * ratio_x,
        y: viewport.box_origin.y + viewport.box_height - local_y * ratio_y,
    })
}

/// Convert a PDF user-space position back to page-element pixels
pub fn to_pixel_space(
    document: Position,
    viewport: &Viewport,
    canvas: &CanvasGeometry,
) -> Result<Position, PlacementError> {
    check_geometry(viewport, canvas)?;
    if !document.is_finite() {
        return Err(PlacementError::Geometry(format!(
            "non-finite document position ({}, {})",
            document.x, document.y
        )));
    }

    let ratio_x = canvas.width_px / viewport.box_width;
    let ratio_y = canvas.height_px / viewport.box_height;

    let local_x = (document.x - viewport.box_origin.x) * ratio_x;
    let local_y = (viewport.box_origin.y + viewport.box_height - document.y) * ratio_y;

    Ok(Position {
        x: canvas.offset.x + local_x,
        y: canvas.offset.y + local_y,
    })
}
