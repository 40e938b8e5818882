//! Placement editor
//!
//! Ties the pieces together for one document session: the render service
//! owns the viewport, the registry owns field configuration, and the drag
//! controller turns gestures into committed positions. The host binds to
//! [`ElementView`]s and the [`ContextMenu`] view-model, and listens for
//! [`EditorEvent`]s.

use std::sync::Arc;

use base64::Engine;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EditorConfig;
use crate::coords::{to_pixel_space, CanvasGeometry, Position, Viewport};
use crate::drag::{DragController, DragEvent, DragOutcome, ElementView, FieldTarget};
use crate::error::PlacementError;
use crate::events::{EditorEvent, EventEmitter};
use crate::export::{export_configuration, export_document_bytes, ExportOptions, ExportReport};
use crate::fields::{FieldConfig, FieldRegistry};
use crate::rasterizer::{DocumentSource, LopdfRasterizer, Rasterizer};
use crate::render_queue::{spawn_render_service, RenderHandle};

/// Context menu state for the host to render
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMenu {
    pub visible: bool,
    pub target: Option<FieldTarget>,
    /// Pixel position the menu opens at
    pub anchor: Position,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MenuAction {
    Duplicate,
    Remove,
    SetFontSize(f64),
}

pub struct PlacementEditor {
    config: EditorConfig,
    document: Arc<Vec<u8>>,
    registry: FieldRegistry,
    drag: DragController,
    render: RenderHandle,
    canvas: Option<CanvasGeometry>,
    menu: ContextMenu,
    events: EventEmitter,
}

impl PlacementEditor {
    /// Load a document and start rendering the configured page.
    ///
    /// Fails with [`PlacementError::Load`] when the source is unreadable or
    /// not a PDF.
    pub async fn open(
        config: EditorConfig,
        source: DocumentSource,
        events: EventEmitter,
    ) -> Result<Self, PlacementError> {
        let bytes = source.into_bytes()?;
        let (bytes, rasterizer) = tokio::task::spawn_blocking(move || {
            let rasterizer = LopdfRasterizer::load_document(&bytes);
            (bytes, rasterizer)
        })
        .await
        .map_err(|e| PlacementError::Load(format!("document load task failed: {}", e)))?;

        Self::with_rasterizer(config, bytes, Arc::new(rasterizer?), events)
    }

    /// Build an editor around any rasterizer. `document` is the original PDF
    /// used for export. Must be called within a tokio runtime.
    pub fn with_rasterizer<R: Rasterizer>(
        config: EditorConfig,
        document: Vec<u8>,
        rasterizer: Arc<R>,
        events: EventEmitter,
    ) -> Result<Self, PlacementError> {
        config
            .validate()
            .map_err(|e| PlacementError::InvalidState(format!("{:#}", e)))?;

        let mut registry = FieldRegistry::with_defaults(config.field_defaults());
        let mut drag = DragController::new();
        for key in &config.fields {
            registry.register(key)?;
            drag.attach(FieldTarget::field(key.as_str()), Position::default());
        }

        let render = spawn_render_service(rasterizer, config.viewport_params(), events.clone());
        render.request_render(config.page_number)?;
        info!(
            page = config.page_number,
            fields = registry.len(),
            "Opened placement editor"
        );

        Ok(Self {
            config,
            document: Arc::new(document),
            registry,
            drag,
            render,
            canvas: None,
            menu: ContextMenu::default(),
            events,
        })
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.render.viewport()
    }

    /// Queue a page render without waiting
    pub fn request_render(&self, page_number: u32) -> Result<(), PlacementError> {
        self.render.request_render(page_number)
    }

    /// Render a page, wait for the queue to drain and re-position elements
    pub async fn render_page(&mut self, page_number: u32) -> Result<Viewport, PlacementError> {
        let viewport = self.render.render(page_number).await?;
        self.resync(&viewport)?;
        Ok(viewport)
    }

    /// Wait for any in-flight render and re-position elements
    pub async fn wait_for_render(&mut self) -> Result<Viewport, PlacementError> {
        let viewport = self.render.wait_idle().await?;
        self.resync(&viewport)?;
        Ok(viewport)
    }

    fn resync(&mut self, viewport: &Viewport) -> Result<(), PlacementError> {
        let canvas = self
            .canvas
            .unwrap_or_else(|| CanvasGeometry::from_viewport(viewport));
        self.drag.sync_from_registry(&self.registry, viewport, &canvas)?;
        Ok(())
    }

    /// Override the canvas placement; `None` uses the viewport size at the origin
    pub fn set_canvas_geometry(&mut self, canvas: Option<CanvasGeometry>) {
        self.canvas = canvas;
    }

    /// Canvas geometry in effect, if a page has been rendered
    pub fn canvas(&self) -> Option<CanvasGeometry> {
        self.canvas
            .or_else(|| self.viewport().map(|v| CanvasGeometry::from_viewport(&v)))
    }

    fn pixel_offset(&self, position: Position) -> Result<Option<Position>, PlacementError> {
        match (self.viewport(), self.canvas()) {
            (Some(viewport), Some(canvas)) => Ok(Some(to_pixel_space(position, &viewport, &canvas)?)),
            _ => Ok(None),
        }
    }

    pub fn add_field(&mut self, key: &str) -> Result<ElementView, PlacementError> {
        self.registry.register(key)?;
        let target = FieldTarget::field(key);
        let position = self
            .registry
            .get(key)
            .and_then(|field| field.position_of(None))
            .unwrap_or_default();
        let offset = self.pixel_offset(position)?.unwrap_or_default();
        self.drag.attach(target.clone(), offset);
        self.view_of(&target)
    }

    pub fn remove_field(&mut self, key: &str) -> Result<FieldConfig, PlacementError> {
        let removed = self.registry.remove(key)?;
        self.drag.detach_field(key);
        Ok(removed)
    }

    pub fn remove_instance(&mut self, key: &str, instance: &str) -> Result<(), PlacementError> {
        self.registry.remove_instance(key, instance)?;
        self.drag.detach(&FieldTarget::instance(key, instance));
        Ok(())
    }

    /// Copy a field or instance and attach a drag session to the copy
    pub fn duplicate(&mut self, target: &FieldTarget) -> Result<ElementView, PlacementError> {
        let source = target.instance.as_deref().unwrap_or(&target.key);
        let instance = self.registry.duplicate(source)?;
        let key = self
            .registry
            .owner_of(&instance)
            .unwrap_or(&target.key)
            .to_string();

        let position = self
            .registry
            .get(&key)
            .and_then(|field| field.position_of(Some(instance.as_str())))
            .unwrap_or_default();
        let offset = match self.pixel_offset(position)? {
            Some(offset) => offset,
            None => self
                .drag
                .view(target)
                .map(|view| view.offset)
                .unwrap_or_default(),
        };

        let copy = FieldTarget::instance(key, instance);
        self.drag.attach(copy.clone(), offset);
        self.view_of(&copy)
    }

    pub fn set_font_size(&mut self, key: &str, size: f64) -> Result<(), PlacementError> {
        self.registry.set_font_size(key, size)
    }

    pub fn set_font_family(&mut self, key: &str, family: &str) -> Result<(), PlacementError> {
        self.registry.set_font_family(key, family)
    }

    pub fn set_value(&mut self, key: &str, value: Option<String>) -> Result<(), PlacementError> {
        self.registry.set_value(key, value)
    }

    /// Feed one drag gesture event. Commits use the viewport current now.
    pub fn handle_drag(&mut self, event: &DragEvent) -> Result<DragOutcome, PlacementError> {
        let viewport = self.viewport();
        let canvas = match (self.canvas, viewport) {
            (Some(canvas), _) => canvas,
            (None, Some(viewport)) => CanvasGeometry::from_viewport(&viewport),
            (None, None) => CanvasGeometry {
                offset: Position::default(),
                width_px: 0.0,
                height_px: 0.0,
            },
        };
        self.drag
            .handle(event, &mut self.registry, viewport.as_ref(), &canvas)
    }

    pub fn element_views(&self) -> Vec<ElementView> {
        self.drag.views()
    }

    fn view_of(&self, target: &FieldTarget) -> Result<ElementView, PlacementError> {
        self.drag
            .view(target)
            .ok_or_else(|| PlacementError::UnknownField(target.to_string()))
    }

    pub fn menu(&self) -> &ContextMenu {
        &self.menu
    }

    pub fn open_menu(&mut self, target: FieldTarget, anchor: Position) {
        debug!(element = %target, "Opened context menu");
        self.menu = ContextMenu {
            visible: true,
            target: Some(target),
            anchor,
        };
    }

    pub fn close_menu(&mut self) {
        self.menu = ContextMenu::default();
    }

    /// Apply a menu action to the menu's target and close the menu.
    ///
    /// Returns the new element when the action created one.
    pub fn apply_menu_action(
        &mut self,
        action: MenuAction,
    ) -> Result<Option<ElementView>, PlacementError> {
        let target = match (self.menu.visible, self.menu.target.clone()) {
            (true, Some(target)) => target,
            _ => {
                return Err(PlacementError::InvalidState(
                    "context menu is not open".to_string(),
                ))
            }
        };
        self.close_menu();

        match action {
            MenuAction::Duplicate => self.duplicate(&target).map(Some),
            MenuAction::Remove => {
                match target.instance.as_deref() {
                    Some(instance) => self.remove_instance(&target.key, instance)?,
                    None => {
                        self.remove_field(&target.key)?;
                    }
                }
                Ok(None)
            }
            MenuAction::SetFontSize(size) => {
                self.set_font_size(&target.key, size)?;
                Ok(None)
            }
        }
    }

    fn export_options(&self) -> ExportOptions {
        let page = self
            .viewport()
            .map(|v| v.page_number)
            .unwrap_or(self.config.page_number);
        ExportOptions {
            page_index: page.saturating_sub(1) as usize,
            color: self.config.color(),
        }
    }

    /// Stamp every field into the document and emit [`EditorEvent::Modified`]
    pub async fn export_document(&self) -> Result<ExportReport, PlacementError> {
        let document = Arc::clone(&self.document);
        let registry = self.registry.clone();
        let options = self.export_options();

        let report = tokio::task::spawn_blocking(move || {
            export_document_bytes(&document, &registry, &options)
        })
        .await
        .map_err(|e| PlacementError::InvalidState(format!("export task failed: {}", e)))??;

        self.events.emit(EditorEvent::Modified {
            bytes: report.bytes.clone(),
            base64: base64::engine::general_purpose::STANDARD.encode(&report.bytes),
            file_name: self.config.download_name.clone(),
            failures: report.failures.clone(),
        });
        Ok(report)
    }

    /// Export the field configuration and emit [`EditorEvent::PdfConfig`]
    pub fn export_configuration(&self) -> Vec<FieldConfig> {
        let fields = export_configuration(&self.registry);
        self.events.emit(EditorEvent::PdfConfig {
            fields: fields.clone(),
        });
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::test_support::create_test_pdf;
    use pretty_assertions::assert_eq;

    async fn open_editor(fields: &[&str]) -> (PlacementEditor, tokio::sync::mpsc::UnboundedReceiver<EditorEvent>) {
        let config = EditorConfig {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        };
        let (events, rx) = EventEmitter::channel();
        let mut editor = PlacementEditor::open(config, DocumentSource::Bytes(create_test_pdf()), events)
            .await
            .unwrap();
        editor.wait_for_render().await.unwrap();
        (editor, rx)
    }

    #[tokio::test]
    async fn test_open_renders_configured_page() {
        let (editor, _rx) = open_editor(&["name"]).await;
        let viewport = editor.viewport().unwrap();
        assert_eq!(viewport.page_number, 1);
        assert_eq!(viewport.width_px, 612.0);
        assert_eq!(editor.registry().len(), 1);
        // Default position (0, 0) is the bottom-left corner of the page
        assert_eq!(editor.element_views()[0].offset, Position::new(0.0, 792.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_for_render_right_after_open() {
        for _ in 0..20 {
            let mut editor = PlacementEditor::open(
                EditorConfig::default(),
                DocumentSource::Bytes(create_test_pdf()),
                EventEmitter::disconnected(),
            )
            .await
            .unwrap();
            let viewport = editor.wait_for_render().await.unwrap();
            assert_eq!(viewport.page_number, 1);
            assert_eq!(editor.viewport(), Some(viewport));
        }
    }

    #[tokio::test]
    async fn test_open_garbage_fails_with_load_error() {
        let result = PlacementEditor::open(
            EditorConfig::default(),
            DocumentSource::Bytes(b"not a pdf".to_vec()),
            EventEmitter::disconnected(),
        )
        .await;
        assert!(matches!(result, Err(PlacementError::Load(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = EditorConfig {
            rotation: 45,
            ..Default::default()
        };
        let result = PlacementEditor::open(
            config,
            DocumentSource::Bytes(create_test_pdf()),
            EventEmitter::disconnected(),
        )
        .await;
        assert!(matches!(result, Err(PlacementError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_menu_duplicate_and_remove() {
        let (mut editor, _rx) = open_editor(&["name"]).await;

        editor.open_menu(FieldTarget::field("name"), Position::new(10.0, 10.0));
        assert!(editor.menu().visible);
        let copy = editor
            .apply_menu_action(MenuAction::Duplicate)
            .unwrap()
            .unwrap();
        assert!(!editor.menu().visible);
        assert_eq!(copy.target, FieldTarget::instance("name", "name-copy1"));
        assert_eq!(copy.offset, Position::new(0.0, 792.0));

        editor.open_menu(copy.target.clone(), Position::default());
        editor.apply_menu_action(MenuAction::Remove).unwrap();
        assert_eq!(editor.element_views().len(), 1);

        // The anchor is the last remaining position
        editor.open_menu(FieldTarget::instance("name", "name"), Position::default());
        assert!(matches!(
            editor.apply_menu_action(MenuAction::Remove),
            Err(PlacementError::LastInstance(_))
        ));
    }

    #[tokio::test]
    async fn test_menu_font_size_validation() {
        let (mut editor, _rx) = open_editor(&["name"]).await;

        editor.open_menu(FieldTarget::field("name"), Position::default());
        editor.apply_menu_action(MenuAction::SetFontSize(18.0)).unwrap();
        assert_eq!(editor.registry().get("name").unwrap().font_size, 18.0);

        editor.open_menu(FieldTarget::field("name"), Position::default());
        assert!(matches!(
            editor.apply_menu_action(MenuAction::SetFontSize(-1.0)),
            Err(PlacementError::InvalidFontSize { .. })
        ));
        assert!(matches!(
            editor.apply_menu_action(MenuAction::Duplicate),
            Err(PlacementError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_export_emits_events() {
        let (mut editor, mut rx) = open_editor(&["name"]).await;
        let report = editor.export_document().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.marks_drawn, 1);

        let fields = editor.export_configuration();
        assert_eq!(fields.len(), 1);

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EditorEvent::Modified { bytes, file_name, .. } = &event {
                assert_eq!(bytes, &report.bytes);
                assert_eq!(file_name, "stamped.pdf");
            }
            names.push(event.name());
        }
        assert_eq!(names, vec!["rendered", "modified", "pdfConfig"]);

        editor.remove_field("name").unwrap();
        assert!(editor.element_views().is_empty());
    }
}
