//! Drawing text into an existing PDF
//!
//! [`DocumentWriter`] is the contract the export pipeline draws through;
//! [`LopdfWriter`] implements it on top of lopdf by appending a content
//! stream per mark and registering a standard Type1 font on the page.

use std::collections::{HashMap, HashSet};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};

use crate::error::PlacementError;

/// RGB colour with components in the 0-1 range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    /// Parse a hex colour string ("#FF0000" or "FF0000")
    pub fn from_hex(color: &str) -> Option<Self> {
        let hex = color.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .ok()
                .map(|v| v as f32 / 255.0)
        };
        Some(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

/// The PDF standard 14 fonts usable without embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    TimesRoman,
    TimesBold,
    TimesItalic,
    TimesBoldItalic,
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
    Symbol,
    ZapfDingbats,
}

impl StandardFont {
    pub fn base_font(&self) -> &'static str {
        match self {
            StandardFont::Helvetica => "Helvetica",
            StandardFont::HelveticaBold => "Helvetica-Bold",
            StandardFont::HelveticaOblique => "Helvetica-Oblique",
            StandardFont::HelveticaBoldOblique => "Helvetica-BoldOblique",
            StandardFont::TimesRoman => "Times-Roman",
            StandardFont::TimesBold => "Times-Bold",
            StandardFont::TimesItalic => "Times-Italic",
            StandardFont::TimesBoldItalic => "Times-BoldItalic",
            StandardFont::Courier => "Courier",
            StandardFont::CourierBold => "Courier-Bold",
            StandardFont::CourierOblique => "Courier-Oblique",
            StandardFont::CourierBoldOblique => "Courier-BoldOblique",
            StandardFont::Symbol => "Symbol",
            StandardFont::ZapfDingbats => "ZapfDingbats",
        }
    }

    /// Map a font family name to a standard font.
    ///
    /// Handles CSS generic families ("serif", "monospace", ...) and common
    /// family names; unrecognised families fall back to Helvetica. Returns
    /// `None` only for a blank family.
    pub fn resolve(family: &str) -> Option<Self> {
        let lower = family.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }

        match lower.as_str() {
            "serif" => return Some(StandardFont::TimesRoman),
            "sans-serif" | "cursive" | "fantasy" => return Some(StandardFont::Helvetica),
            "monospace" => return Some(StandardFont::Courier),
            _ => {}
        }

        let bold = lower.contains("bold");
        let italic = lower.contains("italic") || lower.contains("oblique");

        if lower.contains("symbol") {
            return Some(StandardFont::Symbol);
        }
        if lower.contains("zapf") || lower.contains("dingbat") {
            return Some(StandardFont::ZapfDingbats);
        }

        if lower.contains("times") || lower.contains("georgia") || lower.contains("garamond") {
            return Some(match (bold, italic) {
                (true, true) => StandardFont::TimesBoldItalic,
                (true, false) => StandardFont::TimesBold,
                (false, true) => StandardFont::TimesItalic,
                (false, false) => StandardFont::TimesRoman,
            });
        }

        if lower.contains("courier")
            || lower.contains("mono")
            || lower.contains("consolas")
            || lower.contains("monaco")
        {
            return Some(match (bold, italic) {
                (true, true) => StandardFont::CourierBoldOblique,
                (true, false) => StandardFont::CourierBold,
                (false, true) => StandardFont::CourierOblique,
                (false, false) => StandardFont::Courier,
            });
        }

        // Arial, Helvetica, sans and anything unrecognised
        Some(match (bold, italic) {
            (true, true) => StandardFont::HelveticaBoldOblique,
            (true, false) => StandardFont::HelveticaBold,
            (false, true) => StandardFont::HelveticaOblique,
            (false, false) => StandardFont::Helvetica,
        })
    }
}

/// Where and how one text mark is drawn
#[derive(Debug, Clone, PartialEq)]
pub struct TextOptions {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub font: StandardFont,
    pub color: Rgb,
}

/// Editable document the export pipeline draws into
pub trait DocumentWriter {
    fn page_count(&self) -> usize;

    /// Draw `text` with its baseline origin at `(options.x, options.y)` on
    /// the zero-based page `page_index`.
    fn draw_text(
        &mut self,
        page_index: usize,
        text: &str,
        options: &TextOptions,
    ) -> Result<(), PlacementError>;

    fn serialize(&mut self) -> Result<Vec<u8>, PlacementError>;
}

pub struct LopdfWriter {
    doc: Document,
    page_ids: Vec<ObjectId>,
    font_objects: HashMap<StandardFont, ObjectId>,
    /// Resource name registered per (page, font)
    page_fonts: HashMap<(ObjectId, StandardFont), Vec<u8>>,
    /// Pages whose original content has been wrapped in q/Q
    isolated_pages: HashSet<ObjectId>,
}

impl LopdfWriter {
    pub fn load_for_editing(bytes: &[u8]) -> Result<Self, PlacementError> {
        let doc = Document::load_mem(bytes).map_err(|e| PlacementError::Load(e.to_string()))?;
        Ok(Self::from_document(doc))
    }

    pub fn from_document(doc: Document) -> Self {
        let page_ids = doc.get_pages().into_values().collect();
        Self {
            doc,
            page_ids,
            font_objects: HashMap::new(),
            page_fonts: HashMap::new(),
            isolated_pages: HashSet::new(),
        }
    }

    fn font_resource(
        &mut self,
        page_id: ObjectId,
        font: StandardFont,
    ) -> Result<Vec<u8>, PlacementError> {
        if let Some(name) = self.page_fonts.get(&(page_id, font)) {
            return Ok(name.clone());
        }

        let doc = &mut self.doc;
        let font_id = *self.font_objects.entry(font).or_insert_with(|| {
            doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            })
        });

        let mut resources = effective_resources(&self.doc, page_id)?;
        let mut fonts = match resources.get(b"Font") {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => self
                .doc
                .get_dictionary(*id)
                .map(Clone::clone)
                .unwrap_or_else(|_| Dictionary::new()),
            _ => Dictionary::new(),
        };

        let mut index = self.page_fonts.len();
        let name = loop {
            let candidate = format!("PlaceF{}", index).into_bytes();
            if !fonts.has(&candidate) {
                break candidate;
            }
            index += 1;
        };
        fonts.set(name.clone(), Object::Reference(font_id));
        resources.set("Font", Object::Dictionary(fonts));

        page_dict_mut(&mut self.doc, page_id)?.set("Resources", Object::Dictionary(resources));
        self.page_fonts.insert((page_id, font), name.clone());
        Ok(name)
    }

    /// Wrap the page's existing content in q/Q so graphics state left over
    /// by the original content does not leak into appended marks.
    fn isolate_existing_content(&mut self, page_id: ObjectId) -> Result<(), PlacementError> {
        if !self.isolated_pages.insert(page_id) {
            return Ok(());
        }
        let existing = match page_dict_mut(&mut self.doc, page_id)?.get(b"Contents") {
            Ok(Object::Reference(id)) => vec![Object::Reference(*id)],
            Ok(Object::Array(arr)) => arr.clone(),
            _ => Vec::new(),
        };
        if existing.is_empty() {
            return Ok(());
        }

        let push_id = self.doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let pop_id = self.doc.add_object(Stream::new(Dictionary::new(), b"\nQ\n".to_vec()));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(push_id));
        contents.extend(existing);
        contents.push(Object::Reference(pop_id));
        page_dict_mut(&mut self.doc, page_id)?.set("Contents", Object::Array(contents));
        Ok(())
    }

    fn append_content(&mut self, page_id: ObjectId, stream_id: ObjectId) -> Result<(), PlacementError> {
        let page = page_dict_mut(&mut self.doc, page_id)?;
        let contents = match page.get(b"Contents") {
            Ok(Object::Reference(id)) => {
                vec![Object::Reference(*id), Object::Reference(stream_id)]
            }
            Ok(Object::Array(arr)) => {
                let mut arr = arr.clone();
                arr.push(Object::Reference(stream_id));
                arr
            }
            _ => vec![Object::Reference(stream_id)],
        };
        page.set("Contents", Object::Array(contents));
        Ok(())
    }
}

impl DocumentWriter for LopdfWriter {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn draw_text(
        &mut self,
        page_index: usize,
        text: &str,
        options: &TextOptions,
    ) -> Result<(), PlacementError> {
        let page_id = *self.page_ids.get(page_index).ok_or_else(|| {
            PlacementError::Draw(format!(
                "page index {} out of range ({} pages)",
                page_index,
                self.page_ids.len()
            ))
        })?;
        if !(options.x.is_finite() && options.y.is_finite()) {
            return Err(PlacementError::Draw(format!(
                "invalid position ({}, {})",
                options.x, options.y
            )));
        }
        if !(options.size.is_finite() && options.size > 0.0) {
            return Err(PlacementError::Draw(format!(
                "invalid font size {}",
                options.size
            )));
        }
        let encoded = encode_win_ansi(text)?;

        self.isolate_existing_content(page_id)?;
        let font_name = self.font_resource(page_id, options.font)?;

        let Rgb { r, g, b } = options.color;
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("BT", vec![]),
                Operation::new("rg", vec![r.into(), g.into(), b.into()]),
                Operation::new(
                    "Tf",
                    vec![
                        Object::Name(font_name),
                        Object::Real(options.size as f32),
                    ],
                ),
                Operation::new(
                    "Td",
                    vec![
                        Object::Real(options.x as f32),
                        Object::Real(options.y as f32),
                    ],
                ),
                Operation::new("Tj", vec![Object::String(encoded, StringFormat::Literal)]),
                Operation::new("ET", vec![]),
                Operation::new("Q", vec![]),
            ],
        };
        let data = content
            .encode()
            .map_err(|e| PlacementError::Draw(e.to_string()))?;
        let stream_id = self.doc.add_object(Stream::new(Dictionary::new(), data));
        self.append_content(page_id, stream_id)
    }

    fn serialize(&mut self) -> Result<Vec<u8>, PlacementError> {
        let mut output = Vec::new();
        self.doc
            .save_to(&mut output)
            .map_err(|e| PlacementError::Serialization(e.to_string()))?;
        Ok(output)
    }
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary, PlacementError> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| PlacementError::Draw(e.to_string()))
}

/// Resources in effect for a page: its own (inline or referenced), or the
/// nearest inherited from the page tree.
fn effective_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary, PlacementError> {
    let mut current = Some(page_id);
    let mut visited = HashSet::new();
    while let Some(node_id) = current {
        if !visited.insert(node_id) {
            break;
        }
        let node = doc
            .get_dictionary(node_id)
            .map_err(|e| PlacementError::Draw(e.to_string()))?;
        match node.get(b"Resources") {
            Ok(Object::Dictionary(dict)) => return Ok(dict.clone()),
            Ok(Object::Reference(id)) => {
                if let Ok(dict) = doc.get_dictionary(*id) {
                    return Ok(dict.clone());
                }
            }
            _ => {}
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(Dictionary::new())
}

/// Encode text for a WinAnsi-encoded standard font. Characters outside
/// Latin-1 have no glyph and fail the mark.
/// WinAnsiEncoding code points 0x80..=0x9F; `None` marks unassigned codes
const WIN_ANSI_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

fn win_ansi_byte(c: char) -> Option<u8> {
    match u32::from(c) {
        // C1 controls have no glyph; their byte values belong to the table above
        0x80..=0x9F => None,
        code @ 0x00..=0xFF => u8::try_from(code).ok(),
        _ => WIN_ANSI_HIGH
            .iter()
            .position(|&mapped| mapped == Some(c))
            .and_then(|offset| u8::try_from(0x80 + offset).ok()),
    }
}

fn encode_win_ansi(text: &str) -> Result<Vec<u8>, PlacementError> {
    text.chars()
        .map(|c| {
            win_ansi_byte(c).ok_or_else(|| {
                PlacementError::Draw(format!("character {:?} has no glyph in the standard fonts", c))
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::{dictionary, Dictionary, Document, Object, Stream};

    /// Single 612x792 page with a line of existing content
    pub fn create_test_pdf() -> Vec<u8> {
        create_test_pdf_with_box([0, 0, 612, 792])
    }

    pub fn create_test_pdf_with_box(media_box: [i64; 4]) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            b"BT /F1 12 Tf 100 700 Td (Existing) Tj ET".to_vec(),
        ));
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => media_box.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
            "Contents" => Object::Reference(content_id),
        });
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1i64,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
        });
        if let Ok(page) = doc.get_object_mut(page_id) {
            if let Ok(dict) = page.as_dict_mut() {
                dict.set("Parent", Object::Reference(pages_id));
            }
        }
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::create_test_pdf;
    use super::*;

    fn options(x: f64, y: f64) -> TextOptions {
        TextOptions {
            x,
            y,
            size: 11.0,
            font: StandardFont::Helvetica,
            color: Rgb::BLACK,
        }
    }

    fn page_text(bytes: &[u8]) -> String {
        let doc = Document::load_mem(bytes).unwrap();
        let page_id = doc.get_pages()[&1];
        let content = doc.get_page_content(page_id).unwrap();
        String::from_utf8_lossy(&content).into_owned()
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(
            Rgb::from_hex("#FF0000"),
            Some(Rgb {
                r: 1.0,
                g: 0.0,
                b: 0.0
            })
        );
        assert_eq!(Rgb::from_hex("000000"), Some(Rgb::BLACK));
        assert_eq!(Rgb::from_hex("#FFF"), None);
        assert_eq!(Rgb::from_hex("#GG0000"), None);
    }

    #[test]
    fn test_resolve_font_families() {
        assert_eq!(StandardFont::resolve("serif"), Some(StandardFont::TimesRoman));
        assert_eq!(StandardFont::resolve("monospace"), Some(StandardFont::Courier));
        assert_eq!(StandardFont::resolve("Arial"), Some(StandardFont::Helvetica));
        assert_eq!(
            StandardFont::resolve("Times New Roman Bold Italic"),
            Some(StandardFont::TimesBoldItalic)
        );
        assert_eq!(
            StandardFont::resolve("Courier-Oblique"),
            Some(StandardFont::CourierOblique)
        );
        assert_eq!(StandardFont::resolve("Wingdings"), Some(StandardFont::Helvetica));
        assert_eq!(StandardFont::resolve("  "), None);
    }

    #[test]
    fn test_draw_text_produces_valid_pdf() {
        let pdf = create_test_pdf();
        let mut writer = LopdfWriter::load_for_editing(&pdf).unwrap();
        writer.draw_text(0, "Hello World", &options(100.0, 500.0)).unwrap();
        let result = writer.serialize().unwrap();
        assert!(result.starts_with(b"%PDF-"));

        let text = page_text(&result);
        assert!(text.contains("(Hello World) Tj"), "content: {}", text);
        assert!(text.contains("(Existing) Tj"), "content: {}", text);
    }

    #[test]
    fn test_draw_text_keeps_inherited_fonts() {
        let pdf = create_test_pdf();
        let mut writer = LopdfWriter::load_for_editing(&pdf).unwrap();
        writer.draw_text(0, "Mark", &options(10.0, 10.0)).unwrap();
        let result = writer.serialize().unwrap();

        let doc = Document::load_mem(&result).unwrap();
        let page_id = doc.get_pages()[&1];
        let fonts = doc.get_page_fonts(page_id);
        assert!(fonts.contains_key(b"F1".as_slice()));
        assert!(fonts.contains_key(b"PlaceF0".as_slice()));
    }

    #[test]
    fn test_fonts_registered_once_per_page() {
        let pdf = create_test_pdf();
        let mut writer = LopdfWriter::load_for_editing(&pdf).unwrap();
        writer.draw_text(0, "One", &options(10.0, 10.0)).unwrap();
        writer.draw_text(0, "Two", &options(10.0, 30.0)).unwrap();
        let result = writer.serialize().unwrap();

        let doc = Document::load_mem(&result).unwrap();
        let page_id = doc.get_pages()[&1];
        assert_eq!(doc.get_page_fonts(page_id).len(), 2);
    }

    #[test]
    fn test_draw_text_rejects_bad_input() {
        let pdf = create_test_pdf();
        let mut writer = LopdfWriter::load_for_editing(&pdf).unwrap();
        assert!(matches!(
            writer.draw_text(3, "x", &options(1.0, 1.0)),
            Err(PlacementError::Draw(_))
        ));
        assert!(matches!(
            writer.draw_text(0, "x", &options(f64::NAN, 1.0)),
            Err(PlacementError::Draw(_))
        ));
        assert!(matches!(
            writer.draw_text(0, "日本", &options(1.0, 1.0)),
            Err(PlacementError::Draw(_))
        ));
    }

    #[test]
    fn test_win_ansi_encoding() {
        assert_eq!(encode_win_ansi("Café").unwrap(), b"Caf\xE9".to_vec());
        assert_eq!(
            encode_win_ansi("\u{20AC}5 \u{2013} \u{201C}ok\u{201D}").unwrap(),
            vec![0x80, b'5', b' ', 0x96, b' ', 0x93, b'o', b'k', 0x94]
        );
        assert_eq!(encode_win_ansi("\u{0178}").unwrap(), vec![0x9F]);
        // C1 controls are not glyphs
        assert!(matches!(
            encode_win_ansi("\u{0080}"),
            Err(PlacementError::Draw(_))
        ));
        assert!(matches!(
            encode_win_ansi("\u{009D}"),
            Err(PlacementError::Draw(_))
        ));
    }

    #[test]
    fn test_load_garbage_fails() {
        assert!(matches!(
            LopdfWriter::load_for_editing(b"not a pdf"),
            Err(PlacementError::Load(_))
        ));
    }
}
