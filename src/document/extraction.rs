//! Positioned text extraction with a lopdf content-stream interpreter.
//!
//! Each text-showing operator (`Tj`, `TJ`, `'`, `"`) becomes one raw item
//! carrying its start point, advance width and effective font size. Items are
//! then ordered top to bottom and left to right, grouped into lines with a
//! ±2 unit tolerance, and joined into the page string.

use std::collections::HashMap;
use std::rc::Rc;

use lopdf::{content::Content, Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use super::fonts::FontInfo;
use super::geometry::{get_number, inherited, page_box, resolve, resolve_dict, Matrix, PageSize};
use super::{page_out_of_range, ExtractionHandle, PageText, TextExtractor, TextFragment};
use crate::error::{RedactorError, RedactorResult};

/// Items whose tops differ by at most this much share a line.
pub const LINE_TOLERANCE: f64 = 2.0;

/// `TJ` adjustments below this (thousandths of an em) read as a word break.
const TJ_SPACE_THRESHOLD: f64 = -200.0;

/// Nesting limit for form XObjects.
const MAX_FORM_DEPTH: usize = 8;

/// Horizontal gap, relative to font size, that separates words on a line.
const WORD_GAP_RATIO: f64 = 0.15;

/// Opens extraction handles backed by lopdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfTextExtractor;

impl LopdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for LopdfTextExtractor {
    fn open(&self, bytes: &[u8]) -> RedactorResult<Box<dyn ExtractionHandle>> {
        let doc = Document::load_mem(bytes).map_err(|e| RedactorError::Extraction {
            page: None,
            reason: e.to_string(),
        })?;
        Ok(Box::new(LopdfExtractionHandle::new(doc)))
    }
}

/// A private parsed copy of the document used only for reading text.
pub struct LopdfExtractionHandle {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl LopdfExtractionHandle {
    pub fn new(doc: Document) -> Self {
        let pages = doc.get_pages().into_values().collect();
        Self { doc, pages }
    }
}

impl ExtractionHandle for LopdfExtractionHandle {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn extract_page(&mut self, page: usize) -> RedactorResult<PageText> {
        let page_id = *self
            .pages
            .get(page)
            .ok_or_else(|| page_out_of_range(page, self.pages.len()))?;

        let bounds = page_box(&self.doc, page_id);
        let size = bounds.size();

        let content = self
            .doc
            .get_page_content(page_id)
            .map_err(|e| RedactorError::Extraction {
                page: Some(page),
                reason: e.to_string(),
            })?;
        if content.is_empty() {
            return Ok(PageText::empty(page, size));
        }

        let resources = inherited(&self.doc, page_id, b"Resources").and_then(|obj| match obj {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        });

        let mut interpreter = Interpreter::new(&self.doc, Matrix::translate(-bounds.llx, -bounds.lly));
        interpreter
            .run(&content, resources, 0)
            .map_err(|reason| RedactorError::Extraction {
                page: Some(page),
                reason,
            })?;

        let items = interpreter.into_items();
        debug!(page, items = items.len(), "extracted raw text items");
        Ok(assemble_page(page, size, items))
    }

    fn close(self: Box<Self>) {
        debug!(pages = self.pages.len(), "closing extraction handle");
    }
}

/// A text run in user space, baseline anchored, before line grouping.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawTextItem {
    pub text: String,
    pub x: f64,
    pub baseline: f64,
    pub width: f64,
    pub size: f64,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Option<Rc<FontInfo>>,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scaling: f64,
    leading: f64,
    rise: f64,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

struct Interpreter<'a> {
    doc: &'a Document,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    fonts: HashMap<ObjectId, Rc<FontInfo>>,
    items: Vec<RawTextItem>,
}

impl<'a> Interpreter<'a> {
    fn new(doc: &'a Document, ctm: Matrix) -> Self {
        Self {
            doc,
            state: GraphicsState::new(ctm),
            stack: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            fonts: HashMap::new(),
            items: Vec::new(),
        }
    }

    fn into_items(self) -> Vec<RawTextItem> {
        self.items
    }

    fn run(
        &mut self,
        data: &[u8],
        resources: Option<&'a Dictionary>,
        depth: usize,
    ) -> Result<(), String> {
        let content = Content::decode(data).map_err(|e| e.to_string())?;

        for op in &content.operations {
            let operands = op.operands.as_slice();
            match op.operator.as_str() {
                "q" => self.stack.push(self.state.clone()),
                "Q" => {
                    if let Some(saved) = self.stack.pop() {
                        self.state = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        self.state.ctm = m.then(&self.state.ctm);
                    }
                }
                "BT" => {
                    self.text_matrix = Matrix::IDENTITY;
                    self.line_matrix = Matrix::IDENTITY;
                }
                "ET" => {}
                "Tf" => {
                    if let Some(size) = operands.get(1).and_then(get_number) {
                        self.state.font_size = size;
                    }
                    let name = operands.first().and_then(|o| o.as_name().ok());
                    let font = name.and_then(|n| self.font(resources, n));
                    self.state.font = font;
                }
                "Tc" => set_number(&mut self.state.char_spacing, operands),
                "Tw" => set_number(&mut self.state.word_spacing, operands),
                "TL" => set_number(&mut self.state.leading, operands),
                "Ts" => set_number(&mut self.state.rise, operands),
                "Tz" => {
                    if let Some(scale) = operands.first().and_then(get_number) {
                        self.state.horizontal_scaling = scale / 100.0;
                    }
                }
                "Td" => {
                    if let (Some(tx), Some(ty)) = number_pair(operands) {
                        self.move_line(tx, ty);
                    }
                }
                "TD" => {
                    if let (Some(tx), Some(ty)) = number_pair(operands) {
                        self.state.leading = -ty;
                        self.move_line(tx, ty);
                    }
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        self.text_matrix = m;
                        self.line_matrix = m;
                    }
                }
                "T*" => self.next_line(),
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show(&[TextPiece::Bytes(bytes)]);
                    }
                }
                "'" => {
                    self.next_line();
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show(&[TextPiece::Bytes(bytes)]);
                    }
                }
                "\"" => {
                    set_number(&mut self.state.word_spacing, operands);
                    if let Some(tc) = operands.get(1).and_then(get_number) {
                        self.state.char_spacing = tc;
                    }
                    self.next_line();
                    if let Some(Object::String(bytes, _)) = operands.get(2) {
                        self.show(&[TextPiece::Bytes(bytes)]);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(parts)) = operands.first() {
                        let pieces: Vec<TextPiece> = parts
                            .iter()
                            .filter_map(|part| match part {
                                Object::String(bytes, _) => Some(TextPiece::Bytes(bytes)),
                                other => get_number(other).map(TextPiece::Adjust),
                            })
                            .collect();
                        self.show(&pieces);
                    }
                }
                "Do" => {
                    if let Some(name) = operands.first().and_then(|o| o.as_name().ok()) {
                        self.form_xobject(resources, name, depth);
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn move_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.state.leading;
        self.move_line(0.0, -leading);
    }

    fn font(&mut self, resources: Option<&'a Dictionary>, name: &[u8]) -> Option<Rc<FontInfo>> {
        let fonts = resolve_dict(self.doc, resources?.get(b"Font").ok()?)?;
        let entry = fonts.get(name).ok()?;

        let id = match entry {
            Object::Reference(id) => Some(*id),
            _ => None,
        };
        if let Some(cached) = id.and_then(|id| self.fonts.get(&id)) {
            return Some(Rc::clone(cached));
        }

        let dict = resolve_dict(self.doc, entry)?;
        let info = Rc::new(FontInfo::from_dict(self.doc, dict));
        if let Some(id) = id {
            self.fonts.insert(id, Rc::clone(&info));
        }
        Some(info)
    }

    fn show(&mut self, pieces: &[TextPiece<'_>]) {
        let Some(font) = self.state.font.clone() else {
            return;
        };
        let fs = self.state.font_size;
        let th = self.state.horizontal_scaling;
        let render = self.text_matrix.then(&self.state.ctm);
        let (x, baseline) = render.apply(0.0, self.state.rise);

        let mut text = String::new();
        let mut advance = 0.0;

        for piece in pieces {
            match piece {
                TextPiece::Bytes(bytes) => {
                    for code in font.codes(bytes) {
                        let glyph = font.decode(code);
                        let mut tx = font.width(code) / 1000.0 * fs + self.state.char_spacing;
                        if code == 32 && glyph == " " {
                            tx += self.state.word_spacing;
                        }
                        advance += tx * th;
                        text.push_str(&glyph);
                    }
                }
                TextPiece::Adjust(amount) => {
                    if *amount < TJ_SPACE_THRESHOLD && !text.ends_with(' ') && !text.is_empty() {
                        text.push(' ');
                    }
                    advance -= amount / 1000.0 * fs * th;
                }
            }
        }

        self.text_matrix = Matrix::translate(advance, 0.0).then(&self.text_matrix);

        let size = fs.abs() * render.vertical_scale();
        let width = advance * render.horizontal_scale();
        if text.trim().is_empty() || size <= 0.0 {
            return;
        }

        self.items.push(RawTextItem {
            text,
            x,
            baseline,
            width: width.abs(),
            size,
        });
    }

    fn form_xobject(&mut self, resources: Option<&'a Dictionary>, name: &[u8], depth: usize) {
        if depth >= MAX_FORM_DEPTH {
            warn!(depth, "form XObject nesting too deep, skipping");
            return;
        }

        let Some(xobjects) = resources
            .and_then(|r| r.get(b"XObject").ok())
            .and_then(|o| resolve_dict(self.doc, o))
        else {
            return;
        };
        let Some(Object::Stream(stream)) = xobjects.get(name).ok().and_then(|o| resolve(self.doc, o))
        else {
            return;
        };
        let is_form = matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Form");
        if !is_form {
            return;
        }

        let data = match stream.decompressed_content() {
            Ok(data) => data,
            Err(_) => stream.content.clone(),
        };
        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|o| resolve(self.doc, o))
            .and_then(|o| o.as_array().ok())
            .and_then(|arr| Matrix::from_operands(arr))
            .unwrap_or(Matrix::IDENTITY);
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve_dict(self.doc, o))
            .or(resources);

        let saved_state = self.state.clone();
        let saved_text = (self.text_matrix, self.line_matrix);
        let saved_depth = self.stack.len();

        self.state.ctm = matrix.then(&self.state.ctm);
        if let Err(reason) = self.run(&data, form_resources, depth + 1) {
            warn!(%reason, "skipping undecodable form XObject");
        }

        self.stack.truncate(saved_depth);
        self.state = saved_state;
        (self.text_matrix, self.line_matrix) = saved_text;
    }
}

enum TextPiece<'b> {
    Bytes(&'b [u8]),
    Adjust(f64),
}

fn set_number(slot: &mut f64, operands: &[Object]) {
    if let Some(value) = operands.first().and_then(get_number) {
        *slot = value;
    }
}

fn number_pair(operands: &[Object]) -> (Option<f64>, Option<f64>) {
    (
        operands.first().and_then(get_number),
        operands.get(1).and_then(get_number),
    )
}

/// Orders raw items into reading order and builds the page text.
///
/// Items are sorted top first, then grouped into lines: an item starts a new
/// line when its top differs from the previous item's by more than
/// [`LINE_TOLERANCE`]. Within a line items are ordered by x.
pub(crate) fn assemble_page(page_index: usize, size: PageSize, items: Vec<RawTextItem>) -> PageText {
    let mut fragments: Vec<TextFragment> = items
        .into_iter()
        .map(|item| TextFragment {
            y: size.height - (item.baseline + item.size),
            content: item.text,
            x: item.x,
            width: item.width,
            height: item.size,
        })
        .collect();

    fragments.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

    let mut lines: Vec<Vec<TextFragment>> = Vec::new();
    let mut previous_y: Option<f64> = None;
    for fragment in fragments {
        let same_line = previous_y.is_some_and(|y| (fragment.y - y).abs() <= LINE_TOLERANCE);
        previous_y = Some(fragment.y);
        match lines.last_mut() {
            Some(line) if same_line => line.push(fragment),
            _ => lines.push(vec![fragment]),
        }
    }

    let mut text = String::new();
    let mut ordered = Vec::new();
    for (i, mut line) in lines.into_iter().enumerate() {
        line.sort_by(|a, b| a.x.total_cmp(&b.x));
        if i > 0 {
            text.push('\n');
        }

        let mut previous: Option<&TextFragment> = None;
        for fragment in &line {
            if let Some(prev) = previous {
                let gap = fragment.x - (prev.x + prev.width);
                let threshold = prev.height.max(fragment.height) * WORD_GAP_RATIO;
                let spaced = prev.content.ends_with(char::is_whitespace)
                    || fragment.content.starts_with(char::is_whitespace);
                if gap > threshold && !spaced {
                    text.push(' ');
                }
            }
            text.push_str(&fragment.content);
            previous = Some(fragment);
        }
        ordered.extend(line);
    }

    PageText {
        page_index,
        width: size.width,
        height: size.height,
        fragments: ordered,
        text,
    }
}
