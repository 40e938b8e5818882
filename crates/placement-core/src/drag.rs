//! Drag sessions for field elements
//!
//! Each field (or copy instance) element on the page has a session holding
//! its live pixel offset. Moves only touch pixel space; the PDF-space
//! position is computed and committed once, when the drag ends.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coords::{to_document_space, to_pixel_space, CanvasGeometry, Position, Viewport};
use crate::error::PlacementError;
use crate::fields::FieldRegistry;

/// The element a drag event belongs to: a field, or one of its copies
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldTarget {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl FieldTarget {
    pub fn field(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            instance: None,
        }
    }

    pub fn instance(key: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            instance: Some(instance.into()),
        }
    }
}

impl fmt::Display for FieldTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}/{}", self.key, instance),
            None => f.write_str(&self.key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragPhase {
    Start,
    Move,
    End,
}

/// Callback payload of the drag gesture provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragEvent {
    #[serde(rename = "type")]
    pub phase: DragPhase,
    pub target: FieldTarget,
    #[serde(default)]
    pub dx: f64,
    #[serde(default)]
    pub dy: f64,
}

impl DragEvent {
    pub fn start(target: FieldTarget) -> Self {
        Self {
            phase: DragPhase::Start,
            target,
            dx: 0.0,
            dy: 0.0,
        }
    }

    pub fn moved(target: FieldTarget, dx: f64, dy: f64) -> Self {
        Self {
            phase: DragPhase::Move,
            target,
            dx,
            dy,
        }
    }

    pub fn end(target: FieldTarget) -> Self {
        Self {
            phase: DragPhase::End,
            target,
            dx: 0.0,
            dy: 0.0,
        }
    }
}

/// What the host binds an element to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementView {
    pub target: FieldTarget,
    pub offset: Position,
    pub active: bool,
}

impl ElementView {
    pub fn css_transform(&self) -> String {
        format!("translate({}px, {}px)", self.offset.x, self.offset.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DragSession {
    offset: Position,
    origin: Position,
    active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragOutcome {
    /// Live offset changed; nothing committed
    Updated(ElementView),
    /// Drag ended and the PDF-space position was stored
    Committed {
        view: ElementView,
        position: Position,
    },
    /// The element's field is gone; the event was ignored
    Dropped { target: FieldTarget },
}

#[derive(Debug, Clone, Default)]
pub struct DragController {
    sessions: HashMap<FieldTarget, DragSession>,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an element at a pixel offset. Re-attaching resets it.
    pub fn attach(&mut self, target: FieldTarget, offset: Position) {
        debug!(element = %target, x = offset.x, y = offset.y, "Attached drag session");
        self.sessions.insert(
            target,
            DragSession {
                offset,
                origin: offset,
                active: false,
            },
        );
    }

    pub fn detach(&mut self, target: &FieldTarget) -> bool {
        self.sessions.remove(target).is_some()
    }

    /// Detach every session of a field, including its copies
    pub fn detach_field(&mut self, key: &str) {
        self.sessions.retain(|target, _| target.key != key);
    }

    pub fn is_attached(&self, target: &FieldTarget) -> bool {
        self.sessions.contains_key(target)
    }

    pub fn view(&self, target: &FieldTarget) -> Option<ElementView> {
        self.sessions.get(target).map(|s| ElementView {
            target: target.clone(),
            offset: s.offset,
            active: s.active,
        })
    }

    /// Every attached element, ordered by target
    pub fn views(&self) -> Vec<ElementView> {
        let mut targets: Vec<&FieldTarget> = self.sessions.keys().collect();
        targets.sort();
        targets.into_iter().filter_map(|t| self.view(t)).collect()
    }

    /// Apply one drag event.
    ///
    /// Moves are clamped to the rendered page. On `End` the final offset goes
    /// through [`to_document_space`] with the viewport current at that moment
    /// and is committed to `registry`. Events for elements whose field no
    /// longer exists are dropped without touching the registry.
    pub fn handle(
        &mut self,
        event: &DragEvent,
        registry: &mut FieldRegistry,
        viewport: Option<&Viewport>,
        canvas: &CanvasGeometry,
    ) -> Result<DragOutcome, PlacementError> {
        let target = &event.target;
        let Some(session) = self.sessions.get_mut(target) else {
            debug!(element = %target, phase = ?event.phase, "No drag session, ignoring event");
            return Ok(DragOutcome::Dropped {
                target: target.clone(),
            });
        };

        match event.phase {
            DragPhase::Start => {
                session.active = true;
                session.origin = session.offset;
            }
            DragPhase::Move => {
                canvas.check()?;
                session.offset = step(session.offset, event, canvas);
            }
            DragPhase::End => {
                session.active = false;
                if let Err(e) = canvas.check() {
                    session.offset = session.origin;
                    return Err(e);
                }
                session.offset = step(session.offset, event, canvas);

                let instance = commit_instance(registry, target);
                if !registry.has_target(&target.key, instance) {
                    warn!(element = %target, "Field removed during drag, dropping commit");
                    self.sessions.remove(target);
                    return Ok(DragOutcome::Dropped {
                        target: target.clone(),
                    });
                }

                let committed = viewport
                    .ok_or(PlacementError::NoViewport)
                    .and_then(|viewport| to_document_space(session.offset, viewport, canvas))
                    .and_then(|position| {
                        registry.commit_position(&target.key, instance, position)?;
                        Ok(position)
                    });

                return match committed {
                    Ok(position) => {
                        session.origin = session.offset;
                        Ok(DragOutcome::Committed {
                            view: view_of(target, session),
                            position,
                        })
                    }
                    Err(e) => {
                        session.offset = session.origin;
                        Err(e)
                    }
                };
            }
        }

        Ok(DragOutcome::Updated(view_of(target, session)))
    }

    /// Re-position attached elements from their committed PDF-space positions.
    ///
    /// Used after a re-render changed the viewport. Sessions whose field or
    /// instance no longer exists are detached.
    pub fn sync_from_registry(
        &mut self,
        registry: &FieldRegistry,
        viewport: &Viewport,
        canvas: &CanvasGeometry,
    ) -> Result<Vec<ElementView>, PlacementError> {
        let mut stale = Vec::new();
        for (target, session) in self.sessions.iter_mut() {
            let instance = commit_instance(registry, target);
            match registry
                .get(&target.key)
                .and_then(|field| field.position_of(instance))
            {
                Some(position) => {
                    session.offset = to_pixel_space(position, viewport, canvas)?;
                    session.origin = session.offset;
                }
                None => stale.push(target.clone()),
            }
        }
        for target in stale {
            debug!(element = %target, "Detaching stale drag session");
            self.sessions.remove(&target);
        }
        Ok(self.views())
    }
}

fn step(offset: Position, event: &DragEvent, canvas: &CanvasGeometry) -> Position {
    if !(event.dx.is_finite() && event.dy.is_finite()) {
        return offset;
    }
    canvas.clamp(Position::new(offset.x + event.dx, offset.y + event.dy))
}

/// Instance key a commit for `target` goes to. The anchor element of a
/// grouped field commits under the field's own key.
fn commit_instance<'a>(registry: &FieldRegistry, target: &'a FieldTarget) -> Option<&'a str> {
    match target.instance.as_deref() {
        Some(instance) => Some(instance),
        None if registry.get(&target.key).is_some_and(|f| f.is_multiple()) => {
            Some(target.key.as_str())
        }
        None => None,
    }
}

fn view_of(target: &FieldTarget, session: &DragSession) -> ElementView {
    ElementView {
        target: target.clone(),
        offset: session.offset,
        active: session.active,
    }
}
