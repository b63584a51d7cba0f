//! Structural document model backed by lopdf.
//!
//! Drawing is buffered per page and written at save time as one extra content
//! stream per touched page. The page's original content is wrapped in `q`/`Q`
//! so a leftover transformation cannot displace the overlay. Nothing is
//! compressed and object ids are allocated in call order, so identical draw
//! calls produce identical bytes.

use std::collections::{BTreeMap, BTreeSet};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, warn};

use super::geometry::{inherited, page_box, resolve_dict, PageBox, PageSize};
use super::{page_out_of_range, Color, DocumentLoader, PageDocument};
use crate::domain::Rectangle;
use crate::error::{RedactorError, RedactorResult};

/// Resource name of the label font added to touched pages.
const LABEL_FONT: &str = "FRedact";

/// Loads documents with lopdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfLoader;

impl LopdfLoader {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentLoader for LopdfLoader {
    fn load(&self, bytes: &[u8]) -> RedactorResult<Box<dyn PageDocument>> {
        Ok(Box::new(LopdfDocument::from_bytes(bytes)?))
    }
}

#[derive(Debug, Default)]
struct PageOverlay {
    operations: Vec<Operation>,
    uses_font: bool,
    /// Opacity levels in percent that need an ExtGState.
    alpha_levels: BTreeSet<u32>,
}

/// A loaded document plus the drawing queued for each page.
#[derive(Debug)]
pub struct LopdfDocument {
    doc: Document,
    pages: Vec<ObjectId>,
    boxes: Vec<PageBox>,
    overlays: BTreeMap<usize, PageOverlay>,
    font_id: Option<ObjectId>,
}

impl LopdfDocument {
    pub fn from_bytes(bytes: &[u8]) -> RedactorResult<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| RedactorError::DocumentLoad {
            message: e.to_string(),
            source: Some(e),
        })?;
        Ok(Self::from_document(doc))
    }

    pub fn from_document(doc: Document) -> Self {
        if doc.is_encrypted() {
            warn!("document is encrypted, processing as-is");
        }

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let boxes = pages.iter().map(|id| page_box(&doc, *id)).collect();
        debug!(pages = pages.len(), "loaded document");

        Self {
            doc,
            pages,
            boxes,
            overlays: BTreeMap::new(),
            font_id: None,
        }
    }

    fn check_page(&self, page: usize) -> RedactorResult<()> {
        if page < self.pages.len() {
            Ok(())
        } else {
            Err(page_out_of_range(page, self.pages.len()))
        }
    }

    fn label_font(&mut self) -> ObjectId {
        if let Some(id) = self.font_id {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        self.font_id = Some(id);
        id
    }

    /// Writes every queued overlay into the document.
    fn flush_overlays(&mut self) -> RedactorResult<()> {
        let overlays = std::mem::take(&mut self.overlays);

        for (page, overlay) in overlays {
            let page_id = self.pages[page];
            let font_id = if overlay.uses_font {
                Some(self.label_font())
            } else {
                None
            };

            let resources = self.overlay_resources(page_id, font_id, &overlay.alpha_levels);

            let encoded = Content {
                operations: overlay.operations,
            }
            .encode()
            .map_err(|e| save_error("failed to encode overlay", e))?;

            let save_id = self.doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
            let restore_id = self.doc.add_object(Stream::new(dictionary! {}, b"\nQ\n".to_vec()));
            let overlay_id = self.doc.add_object(Stream::new(dictionary! {}, encoded));

            let mut contents = vec![Object::Reference(save_id)];
            contents.extend(self.existing_contents(page_id));
            contents.push(Object::Reference(restore_id));
            contents.push(Object::Reference(overlay_id));

            let page_dict = self
                .doc
                .get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(|e| save_error("page object is not a dictionary", e))?;
            page_dict.set("Contents", Object::Array(contents));
            page_dict.set("Resources", Object::Dictionary(resources));

            debug!(page, "flushed overlay");
        }

        Ok(())
    }

    fn existing_contents(&mut self, page_id: ObjectId) -> Vec<Object> {
        let current = self
            .doc
            .get_dictionary(page_id)
            .ok()
            .and_then(|dict| dict.get(b"Contents").ok())
            .cloned();

        match current {
            Some(Object::Reference(id)) => match self.doc.get_object(id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(id)],
            },
            Some(Object::Array(items)) => items,
            Some(Object::Stream(stream)) => vec![Object::Reference(self.doc.add_object(stream))],
            _ => Vec::new(),
        }
    }

    /// Copy of the page's effective resources with the overlay's font and
    /// graphics states added.
    fn overlay_resources(
        &mut self,
        page_id: ObjectId,
        font_id: Option<ObjectId>,
        alpha_levels: &BTreeSet<u32>,
    ) -> Dictionary {
        let mut resources = inherited(&self.doc, page_id, b"Resources")
            .and_then(|obj| match obj {
                Object::Dictionary(dict) => Some(dict.clone()),
                _ => None,
            })
            .unwrap_or_default();

        if let Some(font_id) = font_id {
            let mut fonts = self.sub_dictionary(&resources, b"Font");
            fonts.set(LABEL_FONT, Object::Reference(font_id));
            resources.set("Font", Object::Dictionary(fonts));
        }

        if !alpha_levels.is_empty() {
            let mut states = self.sub_dictionary(&resources, b"ExtGState");
            for level in alpha_levels {
                let alpha = *level as f32 / 100.0;
                let gs_id = self.doc.add_object(dictionary! {
                    "Type" => "ExtGState",
                    "ca" => Object::Real(alpha),
                    "CA" => Object::Real(alpha),
                });
                states.set(alpha_state_name(*level), Object::Reference(gs_id));
            }
            resources.set("ExtGState", Object::Dictionary(states));
        }

        resources
    }

    fn sub_dictionary(&self, resources: &Dictionary, key: &[u8]) -> Dictionary {
        resources
            .get(key)
            .ok()
            .and_then(|obj| resolve_dict(&self.doc, obj))
            .cloned()
            .unwrap_or_default()
    }

    fn overlay(&mut self, page: usize) -> &mut PageOverlay {
        self.overlays.entry(page).or_default()
    }
}

impl PageDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, page: usize) -> RedactorResult<PageSize> {
        self.check_page(page)?;
        Ok(self.boxes[page].size())
    }

    fn draw_rectangle(
        &mut self,
        page: usize,
        rect: Rectangle,
        color: Color,
        opacity: f64,
    ) -> RedactorResult<()> {
        self.check_page(page)?;
        let origin = self.boxes[page];
        let level = (opacity.clamp(0.0, 1.0) * 100.0).round() as u32;

        let overlay = self.overlay(page);
        overlay.operations.push(Operation::new("q", vec![]));
        if level < 100 {
            overlay.alpha_levels.insert(level);
            overlay.operations.push(Operation::new(
                "gs",
                vec![Object::Name(alpha_state_name(level).into_bytes())],
            ));
        }
        overlay.operations.push(fill_color(color));
        overlay.operations.push(Operation::new(
            "re",
            vec![
                real(rect.x + origin.llx),
                real(rect.y + origin.lly),
                real(rect.width),
                real(rect.height),
            ],
        ));
        overlay.operations.push(Operation::new("f", vec![]));
        overlay.operations.push(Operation::new("Q", vec![]));
        Ok(())
    }

    fn draw_text(
        &mut self,
        page: usize,
        x: f64,
        y: f64,
        size: f64,
        color: Color,
        text: &str,
    ) -> RedactorResult<()> {
        self.check_page(page)?;
        let origin = self.boxes[page];

        let overlay = self.overlay(page);
        overlay.uses_font = true;
        overlay.operations.extend([
            Operation::new("q", vec![]),
            fill_color(color),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(LABEL_FONT.as_bytes().to_vec()), real(size)]),
            Operation::new("Td", vec![real(x + origin.llx), real(y + origin.lly)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    fn set_info(&mut self, key: &str, value: &str) -> RedactorResult<()> {
        let info_id = match self.doc.trailer.get(b"Info") {
            Ok(Object::Reference(id)) => *id,
            _ => {
                let id = self.doc.add_object(Dictionary::new());
                self.doc.trailer.set("Info", Object::Reference(id));
                id
            }
        };

        let info = self
            .doc
            .get_object_mut(info_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| save_error("document info is not a dictionary", e))?;
        info.set(key, Object::string_literal(value));
        Ok(())
    }

    fn save(&mut self) -> RedactorResult<Vec<u8>> {
        self.flush_overlays()?;

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| save_error("failed to serialize document", e))?;
        debug!(bytes = buffer.len(), "saved document");
        Ok(buffer)
    }
}

fn alpha_state_name(level: u32) -> String {
    format!("GSRedact{}", level)
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn fill_color(color: Color) -> Operation {
    Operation::new("rg", vec![real(color.r), real(color.g), real(color.b)])
}

fn save_error(message: &str, source: impl std::error::Error + Send + Sync + 'static) -> RedactorError {
    RedactorError::Save {
        message: format!("{}: {}", message, source),
        source: Some(Box::new(source)),
    }
}
