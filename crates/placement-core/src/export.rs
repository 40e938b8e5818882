//! Export pipeline
//!
//! Stamps every committed field position into the document, or exports the
//! field configuration on its own. Draw failures are isolated per field: a
//! field that cannot be drawn is reported and the remaining fields are still
//! stamped. Only when every field fails does the export itself fail.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PlacementError;
use crate::fields::{FieldConfig, FieldRegistry};
use crate::writer::{DocumentWriter, LopdfWriter, Rgb, StandardFont, TextOptions};

/// One mark that could not be drawn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawFailure {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    /// Zero-based page the marks are drawn on
    pub page_index: usize,
    pub color: Rgb,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            page_index: 0,
            color: Rgb::BLACK,
        }
    }
}

/// Output of a document export: the bytes plus any per-field failures
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub bytes: Vec<u8>,
    pub marks_drawn: usize,
    pub failures: Vec<DrawFailure>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Draw every field's marks through `writer` and serialize the result.
///
/// Fields are visited in registry order. Within a `Multiple` field, marks are
/// drawn in instance-key order; marks are independent so the order has no
/// effect on the output appearance.
pub fn build_output_document<W: DocumentWriter>(
    writer: &mut W,
    fields: &[FieldConfig],
    options: &ExportOptions,
) -> Result<ExportReport, PlacementError> {
    let mut failures = Vec::new();
    let mut failed_fields = 0;
    let mut marks_drawn = 0;

    for field in fields {
        let field_failures = draw_field(writer, field, options, &mut marks_drawn);
        if !field_failures.is_empty() {
            failed_fields += 1;
            for failure in &field_failures {
                warn!(
                    key = %failure.key,
                    instance = ?failure.instance,
                    reason = %failure.reason,
                    "Field mark not drawn"
                );
            }
            failures.extend(field_failures);
        }
    }

    if !fields.is_empty() && failed_fields == fields.len() {
        return Err(PlacementError::ExportFailed(failures));
    }

    let bytes = writer.serialize()?;
    info!(
        fields = fields.len(),
        marks = marks_drawn,
        failed_fields,
        "Built output document"
    );
    Ok(ExportReport {
        bytes,
        marks_drawn,
        failures,
    })
}

fn draw_field<W: DocumentWriter>(
    writer: &mut W,
    field: &FieldConfig,
    options: &ExportOptions,
    marks_drawn: &mut usize,
) -> Vec<DrawFailure> {
    let failure = |instance: Option<&str>, reason: String| DrawFailure {
        key: field.key.clone(),
        instance: instance.map(str::to_string),
        reason,
    };

    let Some(font) = StandardFont::resolve(&field.font_family) else {
        return vec![failure(
            None,
            format!("no font for family {:?}", field.font_family),
        )];
    };

    let mut failures = Vec::new();
    for (instance, position) in field.marks() {
        let text_options = TextOptions {
            x: position.x,
            y: position.y,
            size: field.font_size,
            font,
            color: options.color,
        };
        match writer.draw_text(options.page_index, field.text(), &text_options) {
            Ok(()) => *marks_drawn += 1,
            Err(e) => failures.push(failure(instance, e.to_string())),
        }
    }
    failures
}

/// Stamp the registry's fields into `source` and return the new document
pub fn export_document_bytes(
    source: &[u8],
    registry: &FieldRegistry,
    options: &ExportOptions,
) -> Result<ExportReport, PlacementError> {
    let mut writer = LopdfWriter::load_for_editing(source)?;
    build_output_document(&mut writer, registry.fields(), options)
}

/// Field configuration only, without document bytes
pub fn export_configuration(registry: &FieldRegistry) -> Vec<FieldConfig> {
    registry.export_all()
}
