//! Document access ports and their lopdf-backed implementations.
//!
//! Reading and writing go through two separate ports. A [`PageDocument`] is
//! the structural model the pipeline draws redaction boxes into; an
//! [`ExtractionHandle`] is an independently parsed copy of the same bytes that
//! yields positioned text fragments. Drawing on one never shows up in the
//! other.

mod extraction;
mod fonts;
mod geometry;
mod model;
mod stub;

pub use extraction::{LopdfExtractionHandle, LopdfTextExtractor};
pub use geometry::PageSize;
pub use model::{LopdfDocument, LopdfLoader};
pub use stub::error_document;

use crate::domain::Rectangle;
use crate::error::{RedactorError, RedactorResult};

/// RGB color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const GRAY: Color = Color::rgb(0.5, 0.5, 0.5);
    pub const GREEN: Color = Color::rgb(0.0, 0.5, 0.0);
    pub const RED: Color = Color::rgb(0.8, 0.0, 0.0);

    pub const fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }
}

/// One atomic text run with its position on the page.
///
/// Coordinates are top-left based: `y` is the distance from the top of the
/// page to the top of the run's em box.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub content: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Text of one page in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_index: usize,
    pub width: f64,
    pub height: f64,
    /// Fragments sorted top to bottom, then left to right.
    pub fragments: Vec<TextFragment>,
    /// Fragment contents joined in the same order, lines separated by `\n`.
    pub text: String,
}

impl PageText {
    pub fn empty(page_index: usize, size: PageSize) -> Self {
        Self {
            page_index,
            width: size.width,
            height: size.height,
            fragments: Vec::new(),
            text: String::new(),
        }
    }

    /// Returns true when the page carries no visible text.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Loads documents into a mutable structural model.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, bytes: &[u8]) -> RedactorResult<Box<dyn PageDocument>>;
}

/// A loaded document that can be drawn on and saved.
pub trait PageDocument {
    fn page_count(&self) -> usize;

    fn page_size(&self, page: usize) -> RedactorResult<PageSize>;

    /// Fills `rect` (bottom-left origin) on `page`.
    fn draw_rectangle(
        &mut self,
        page: usize,
        rect: Rectangle,
        color: Color,
        opacity: f64,
    ) -> RedactorResult<()>;

    /// Writes a single line of Helvetica text with its baseline at `(x, y)`.
    fn draw_text(
        &mut self,
        page: usize,
        x: f64,
        y: f64,
        size: f64,
        color: Color,
        text: &str,
    ) -> RedactorResult<()>;

    /// Sets an entry of the document information dictionary.
    fn set_info(&mut self, key: &str, value: &str) -> RedactorResult<()>;

    /// Serializes the document. Identical draw calls give identical bytes.
    fn save(&mut self) -> RedactorResult<Vec<u8>>;
}

/// Opens independent read-only text views of a document.
pub trait TextExtractor: Send + Sync {
    fn open(&self, bytes: &[u8]) -> RedactorResult<Box<dyn ExtractionHandle>>;
}

/// A parsed document that yields positioned text page by page.
pub trait ExtractionHandle {
    fn page_count(&self) -> usize;

    fn extract_page(&mut self, page: usize) -> RedactorResult<PageText>;

    /// Releases the parsed document.
    fn close(self: Box<Self>) {}
}

/// Extracts the whole document as plain text with `pdf-extract`.
pub fn extract_plain_text(bytes: &[u8]) -> RedactorResult<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| RedactorError::Extraction {
        page: None,
        reason: e.to_string(),
    })
}

pub(crate) fn page_out_of_range(page: usize, count: usize) -> RedactorError {
    RedactorError::InvalidInput {
        parameter: "page".to_string(),
        reason: format!("page index {} out of range for {} page(s)", page, count),
    }
}
