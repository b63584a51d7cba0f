//! Test fixtures and PDF builders.
//!
//! Documents are assembled directly with lopdf so every text line has a
//! known position: Letter pages, Helvetica 12pt, one `Tj` per line starting
//! at x = 72 with baselines every 20pt down from y = 720.

use anyhow::Result;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pdf_redactor::document::{Color, DocumentLoader, LopdfLoader, PageDocument, PageSize};
use pdf_redactor::domain::{RedactionCategory, RedactionTemplate};
use pdf_redactor::{Rectangle, RedactorResult};

pub const PAGE_WIDTH: f64 = 612.0;
pub const PAGE_HEIGHT: f64 = 792.0;
pub const LEFT_MARGIN: f64 = 72.0;
pub const FIRST_BASELINE: f64 = 720.0;
pub const LINE_SPACING: f64 = 20.0;
pub const FONT_SIZE: f64 = 12.0;

/// The contact line used across scenario tests.
pub const CONTACT_LINE: &str =
    "Contact Dr. Jane Smith at jane.smith@example.com or (415) 555-0100.";

/// Builder for creating test PDFs with custom content.
///
/// # Example
///
/// ```no_run
/// # use anyhow::Result;
/// # fn main() -> Result<()> {
/// let bytes = TestPdfBuilder::new()
///     .with_page(&["Study NE-204", "Sponsor: NovaEndo Labs"])
///     .with_blank_pages(2)
///     .build_bytes()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TestPdfBuilder {
    pages: Vec<TestPage>,
    encrypt_marker: bool,
}

/// How the lines of one page are written.
#[derive(Debug, Clone)]
enum TestPage {
    /// `Tj` operators in the page content stream.
    Direct(Vec<String>),
    /// `Tj` operators inside a form XObject drawn with `Do`, shifted down by
    /// [`FORM_OFFSET`] through the form matrix.
    Form(Vec<String>),
    /// Two-byte codes of a Type0 Identity-H font decoded via ToUnicode.
    Composite(Vec<String>),
}

/// Vertical shift applied by the form XObject matrix.
pub const FORM_OFFSET: f64 = 100.0;

/// Code of the first printable ASCII glyph in the composite test font.
const COMPOSITE_BASE: u16 = 0x0100;

impl TestPdfBuilder {
    /// Creates a builder with no pages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a page with one text line per entry.
    pub fn with_page(mut self, lines: &[&str]) -> Self {
        self.pages.push(TestPage::Direct(owned(lines)));
        self
    }

    /// Adds `count` pages that each carry the same lines.
    pub fn with_repeated_page(mut self, lines: &[&str], count: usize) -> Self {
        for _ in 0..count {
            self = self.with_page(lines);
        }
        self
    }

    /// Adds pages without any text.
    pub fn with_blank_pages(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.pages.push(TestPage::Direct(Vec::new()));
        }
        self
    }

    /// Adds a page whose text lives in a form XObject.
    pub fn with_form_page(mut self, lines: &[&str]) -> Self {
        self.pages.push(TestPage::Form(owned(lines)));
        self
    }

    /// Adds a page written with a composite Identity-H font.
    pub fn with_composite_page(mut self, lines: &[&str]) -> Self {
        self.pages.push(TestPage::Composite(owned(lines)));
        self
    }

    /// Adds a standard security handler `/Encrypt` entry to the trailer.
    ///
    /// Strings are still written in the clear, so readers that ignore the
    /// flag see the plain text.
    pub fn with_encrypt_marker(mut self) -> Self {
        self.encrypt_marker = true;
        self
    }

    /// Builds the document and returns its bytes.
    pub fn build_bytes(&self) -> Result<Vec<u8>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let mut composite_font = None;

        let mut kids = Vec::new();
        for page in &self.pages {
            let (operations, resources) = match page {
                TestPage::Direct(lines) => (
                    page_operations(lines),
                    dictionary! { "Font" => dictionary! { "F1" => font_id } },
                ),
                TestPage::Form(lines) => {
                    let form = Content {
                        operations: page_operations(lines),
                    };
                    let form_id = doc.add_object(Stream::new(
                        dictionary! {
                            "Type" => "XObject",
                            "Subtype" => "Form",
                            "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                            "Matrix" => vec![
                                1.into(), 0.into(), 0.into(), 1.into(),
                                0.into(), Object::Real(-FORM_OFFSET as f32),
                            ],
                            "Resources" => dictionary! {
                                "Font" => dictionary! { "F1" => font_id },
                            },
                        },
                        form.encode()?,
                    ));
                    (
                        vec![
                            Operation::new("q", vec![]),
                            Operation::new("Do", vec!["Fm1".into()]),
                            Operation::new("Q", vec![]),
                        ],
                        dictionary! { "XObject" => dictionary! { "Fm1" => form_id } },
                    )
                }
                TestPage::Composite(lines) => {
                    let font = match composite_font {
                        Some(id) => id,
                        None => {
                            let id = add_composite_font(&mut doc)?;
                            composite_font = Some(id);
                            id
                        }
                    };
                    (
                        composite_operations(lines),
                        dictionary! { "Font" => dictionary! { "F2" => font } },
                    )
                }
            };

            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        if self.encrypt_marker {
            let encrypt_id = doc.add_object(dictionary! {
                "Filter" => "Standard",
                "V" => 1,
                "R" => 2,
                "Length" => 40,
                "P" => -44,
                "O" => Object::string_literal(vec![0u8; 32]),
                "U" => Object::string_literal(vec![0u8; 32]),
            });
            doc.trailer.set("Encrypt", encrypt_id);
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Builds the document and writes it to the specified path.
    pub fn build(&self, output_path: &Path) -> Result<PathBuf> {
        std::fs::write(output_path, self.build_bytes()?)?;
        Ok(output_path.to_path_buf())
    }
}

fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

fn page_operations(lines: &[String]) -> Vec<Operation> {
    let mut operations = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let baseline = FIRST_BASELINE - LINE_SPACING * i as f64;
        operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Real(FONT_SIZE as f32)]),
            Operation::new(
                "Td",
                vec![
                    Object::Real(LEFT_MARGIN as f32),
                    Object::Real(baseline as f32),
                ],
            ),
            Operation::new("Tj", vec![Object::string_literal(line.as_str())]),
            Operation::new("ET", vec![]),
        ]);
    }
    operations
}

fn composite_operations(lines: &[String]) -> Vec<Operation> {
    let mut operations = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let baseline = FIRST_BASELINE - LINE_SPACING * i as f64;
        let codes: Vec<u8> = line
            .bytes()
            .flat_map(|b| (COMPOSITE_BASE + u16::from(b)).to_be_bytes())
            .collect();
        operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F2".into(), Object::Real(FONT_SIZE as f32)]),
            Operation::new(
                "Td",
                vec![
                    Object::Real(LEFT_MARGIN as f32),
                    Object::Real(baseline as f32),
                ],
            ),
            Operation::new(
                "Tj",
                vec![Object::String(codes, StringFormat::Hexadecimal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }
    operations
}

/// Type0 font whose codes are `COMPOSITE_BASE + ascii`; only its ToUnicode
/// CMap maps them back to text.
fn add_composite_font(doc: &mut Document) -> Result<ObjectId> {
    let cmap = format!(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
         1 beginbfrange\n<{:04X}> <{:04X}> <0020>\nendbfrange\n\
         endcmap\n\
         end\nend\n",
        COMPOSITE_BASE + 0x20,
        COMPOSITE_BASE + 0x7E,
    );
    let to_unicode = doc.add_object(Stream::new(dictionary! {}, cmap.into_bytes()));
    let descendant = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => "ArialMT",
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "DW" => 600,
    });
    Ok(doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "ArialMT",
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![descendant.into()],
        "ToUnicode" => to_unicode,
    }))
}

/// A single page carrying [`CONTACT_LINE`].
pub fn contact_pdf() -> Vec<u8> {
    TestPdfBuilder::new()
        .with_page(&[CONTACT_LINE])
        .build_bytes()
        .expect("Failed to build contact PDF")
}

/// A valid document whose page tree has no pages.
pub fn zero_page_pdf() -> Vec<u8> {
    TestPdfBuilder::new()
        .build_bytes()
        .expect("Failed to build empty PDF")
}

/// Template enabling exactly the given categories.
///
/// The category patterns never match, so only the built-in rules for the
/// enabled categories find anything.
pub fn template_for(name: &str, types: &[&str]) -> RedactionTemplate {
    RedactionTemplate {
        id: name.to_string(),
        name: name.to_string(),
        description: String::new(),
        categories: types
            .iter()
            .map(|t| RedactionCategory {
                category_type: t.to_string(),
                patterns: vec![r"\bNEVERMATCHES\b".to_string()],
                contexts: Vec::new(),
            })
            .collect(),
    }
}

/// Template enabling names, emails and phone numbers.
pub fn contact_template() -> RedactionTemplate {
    template_for("contact", &["name", "email", "phone"])
}

/// Loader that counts saves and text labels of the documents it produced.
#[derive(Debug, Clone, Default)]
pub struct CountingLoader {
    pub saves: Arc<AtomicUsize>,
    pub labels: Arc<AtomicUsize>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn label_count(&self) -> usize {
        self.labels.load(Ordering::SeqCst)
    }
}

impl DocumentLoader for CountingLoader {
    fn load(&self, bytes: &[u8]) -> RedactorResult<Box<dyn PageDocument>> {
        Ok(Box::new(CountingDocument {
            inner: LopdfLoader::new().load(bytes)?,
            saves: Arc::clone(&self.saves),
            labels: Arc::clone(&self.labels),
        }))
    }
}

struct CountingDocument {
    inner: Box<dyn PageDocument>,
    saves: Arc<AtomicUsize>,
    labels: Arc<AtomicUsize>,
}

impl PageDocument for CountingDocument {
    fn page_count(&self) -> usize {
        self.inner.page_count()
    }

    fn page_size(&self, page: usize) -> RedactorResult<PageSize> {
        self.inner.page_size(page)
    }

    fn draw_rectangle(
        &mut self,
        page: usize,
        rect: Rectangle,
        color: Color,
        opacity: f64,
    ) -> RedactorResult<()> {
        self.inner.draw_rectangle(page, rect, color, opacity)
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
        self.labels.fetch_add(1, Ordering::SeqCst);
        self.inner.draw_text(page, x, y, size, color, text)
    }

    fn set_info(&mut self, key: &str, value: &str) -> RedactorResult<()> {
        self.inner.set_info(key, value)
    }

    fn save(&mut self) -> RedactorResult<Vec<u8>> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save()
    }
}
