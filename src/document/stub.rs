//! Minimal error document produced when a run fails after loading.

use printpdf::{BuiltinFont, Mm, PdfDocument};

use crate::error::{RedactorError, RedactorResult};

/// Longest error message line written to the stub.
const MAX_LINE_CHARS: usize = 90;

/// Builds a one-page Letter document carrying `message` as visible text.
pub fn error_document(message: &str) -> RedactorResult<Vec<u8>> {
    let (doc, page, layer) =
        PdfDocument::new("Redaction failed", Mm(215.9), Mm(279.4), "Layer 1");
    let layer = doc.get_page(page).get_layer(layer);

    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| stub_error("failed to add font", e))?;
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| stub_error("failed to add font", e))?;

    layer.use_text("REDACTED DOCUMENT", 20.0, Mm(20.0), Mm(255.0), &bold);
    layer.use_text("Redaction failed", 14.0, Mm(20.0), Mm(243.0), &regular);

    let mut y = 233.0;
    for line in wrap(message, MAX_LINE_CHARS) {
        layer.use_text(line, 10.0, Mm(20.0), Mm(y), &regular);
        y -= 5.0;
        if y < 20.0 {
            break;
        }
    }

    doc.save_to_bytes()
        .map_err(|e| stub_error("failed to serialize error document", e))
}

fn stub_error(message: &str, source: impl std::fmt::Display) -> RedactorError {
    RedactorError::Save {
        message: format!("{}: {}", message, source),
        source: None,
    }
}

/// Splits text into lines of at most `width` characters on word boundaries.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
