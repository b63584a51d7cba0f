//! Font metrics and text decoding for the content interpreter.

use std::collections::HashMap;

use lopdf::{content::Content, Dictionary, Document, Object};
use tracing::warn;

use super::geometry::{get_number, resolve, resolve_dict};

/// Average glyph width, in em, used when a font carries no widths.
const ESTIMATED_EM_WIDTH: f64 = 0.55;

/// Glyph advance of the Courier family, in thousandths of an em.
const COURIER_WIDTH: f64 = 600.0;

/// Largest code range a single `/W` or `bfrange` entry may span.
const MAX_RANGE_CODES: u32 = 0x10000;

/// Metrics and decoding for one font resource.
#[derive(Debug, Clone, Default)]
pub(crate) struct FontInfo {
    /// Two-byte character codes (Type0 fonts).
    composite: bool,
    first_char: u32,
    widths: Vec<f64>,
    cid_widths: HashMap<u32, f64>,
    default_width: Option<f64>,
    monospace: bool,
    to_unicode: HashMap<u32, String>,
}

impl FontInfo {
    pub fn from_dict(doc: &Document, font: &Dictionary) -> Self {
        let subtype = name_of(doc, font.get(b"Subtype").ok());
        let base_font = name_of(doc, font.get(b"BaseFont").ok()).unwrap_or_default();

        let mut info = FontInfo {
            composite: subtype.as_deref() == Some("Type0"),
            monospace: base_font.contains("Courier"),
            ..Default::default()
        };

        if info.composite {
            info.read_cid_widths(doc, font);
        } else {
            info.first_char = font
                .get(b"FirstChar")
                .ok()
                .and_then(|o| resolve(doc, o))
                .and_then(get_number)
                .unwrap_or(0.0) as u32;
            if let Some(Object::Array(widths)) = font.get(b"Widths").ok().and_then(|o| resolve(doc, o)) {
                info.widths = widths
                    .iter()
                    .map(|w| resolve(doc, w).and_then(get_number).unwrap_or(0.0))
                    .collect();
            }
        }

        if let Some(Object::Stream(stream)) =
            font.get(b"ToUnicode").ok().and_then(|o| resolve(doc, o))
        {
            let data = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            info.to_unicode = parse_cmap(&data);
        }

        info
    }

    fn read_cid_widths(&mut self, doc: &Document, font: &Dictionary) {
        let descendant = font
            .get(b"DescendantFonts")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_array().ok())
            .and_then(|arr| arr.first())
            .and_then(|o| resolve_dict(doc, o));
        let Some(descendant) = descendant else {
            return;
        };

        self.default_width = descendant
            .get(b"DW")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(get_number)
            .or(Some(1000.0));

        let Some(Object::Array(w)) = descendant.get(b"W").ok().and_then(|o| resolve(doc, o)) else {
            return;
        };

        // Entries are either `c [w1 w2 ...]` or `c_first c_last w`
        let mut i = 0;
        while i < w.len() {
            let Some(first) = resolve(doc, &w[i]).and_then(get_number) else {
                break;
            };
            match w.get(i + 1).and_then(|o| resolve(doc, o)) {
                Some(Object::Array(run)) => {
                    for (offset, width) in run.iter().enumerate() {
                        if let Some(width) = resolve(doc, width).and_then(get_number) {
                            self.cid_widths.insert(first as u32 + offset as u32, width);
                        }
                    }
                    i += 2;
                }
                Some(last) => {
                    let last = get_number(last).unwrap_or(first);
                    let width = w
                        .get(i + 2)
                        .and_then(|o| resolve(doc, o))
                        .and_then(get_number)
                        .unwrap_or(0.0);
                    match code_range(first as u32, last as u32) {
                        Some(codes) => {
                            for code in codes {
                                self.cid_widths.insert(code, width);
                            }
                        }
                        None => warn!(first, last, "skipping oversized /W range"),
                    }
                    i += 3;
                }
                None => break,
            }
        }
    }

    /// Splits a string operand into character codes.
    pub fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.composite {
            bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => (u32::from(*hi) << 8) | u32::from(*lo),
                    [single] => u32::from(*single),
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|b| u32::from(*b)).collect()
        }
    }

    /// Glyph advance in thousandths of an em.
    pub fn width(&self, code: u32) -> f64 {
        if self.composite {
            if let Some(w) = self.cid_widths.get(&code) {
                return *w;
            }
            return self.default_width.unwrap_or(1000.0);
        }

        if code >= self.first_char {
            if let Some(w) = self.widths.get((code - self.first_char) as usize) {
                if *w > 0.0 {
                    return *w;
                }
            }
        }

        if self.monospace {
            COURIER_WIDTH
        } else {
            ESTIMATED_EM_WIDTH * 1000.0
        }
    }

    /// Unicode text for one character code.
    pub fn decode(&self, code: u32) -> String {
        if let Some(text) = self.to_unicode.get(&code) {
            return text.clone();
        }
        if self.composite {
            return char::from_u32(code).map(String::from).unwrap_or_default();
        }
        decode_single_byte(code as u8).to_string()
    }
}

fn name_of(doc: &Document, obj: Option<&Object>) -> Option<String> {
    match resolve(doc, obj?)? {
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

/// Decodes a byte using WinAnsi for the 0x80..0x9F range and Latin-1 elsewhere.
fn decode_single_byte(byte: u8) -> char {
    match byte {
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        other => char::from(other),
    }
}

/// Inclusive code range, or `None` when it is inverted or wider than
/// `MAX_RANGE_CODES`.
fn code_range(first: u32, last: u32) -> Option<std::ops::RangeInclusive<u32>> {
    if last < first || last - first >= MAX_RANGE_CODES {
        return None;
    }
    Some(first..=last)
}

fn hex_code(obj: &Object) -> Option<u32> {
    match obj {
        Object::String(bytes, _) => Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))),
        _ => None,
    }
}

fn utf16_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => {
            let units: Vec<u16> = bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => (u16::from(*hi) << 8) | u16::from(*lo),
                    [single] => u16::from(*single),
                    _ => 0,
                })
                .collect();
            Some(String::from_utf16_lossy(&units))
        }
        _ => None,
    }
}

/// Reads `bfchar` and `bfrange` mappings of a ToUnicode CMap.
///
/// The CMap body is PostScript-like but tokenizes cleanly with the content
/// stream parser; unknown operators are ignored.
pub(crate) fn parse_cmap(data: &[u8]) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    let Ok(content) = Content::decode(data) else {
        return map;
    };

    for op in &content.operations {
        match op.operator.as_str() {
            "endbfchar" => {
                for pair in op.operands.chunks(2) {
                    if let [src, dst] = pair {
                        if let (Some(code), Some(text)) = (hex_code(src), utf16_text(dst)) {
                            map.insert(code, text);
                        }
                    }
                }
            }
            "endbfrange" => {
                for triple in op.operands.chunks(3) {
                    let [lo, hi, dst] = triple else {
                        continue;
                    };
                    let (Some(lo), Some(hi)) = (hex_code(lo), hex_code(hi)) else {
                        continue;
                    };
                    let Some(codes) = code_range(lo, hi) else {
                        warn!(lo, hi, "skipping oversized bfrange");
                        continue;
                    };
                    match dst {
                        Object::Array(targets) => {
                            for (code, target) in codes.zip(targets) {
                                if let Some(text) = utf16_text(target) {
                                    map.insert(code, text);
                                }
                            }
                        }
                        other => {
                            let Some(base) = utf16_text(other) else {
                                continue;
                            };
                            let mut units: Vec<u16> = base.encode_utf16().collect();
                            for code in codes {
                                map.insert(code, String::from_utf16_lossy(&units));
                                if let Some(last) = units.last_mut() {
                                    *last = last.wrapping_add(1);
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    map
}
