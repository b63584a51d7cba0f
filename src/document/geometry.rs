//! Page boxes, transformation matrices and lopdf object helpers.

use lopdf::{Dictionary, Document, Object, ObjectId};

/// Default page size when neither CropBox nor MediaBox can be read (Letter).
const DEFAULT_BOX: PageBox = PageBox {
    llx: 0.0,
    lly: 0.0,
    urx: 612.0,
    ury: 792.0,
};

/// Maximum depth followed when resolving inherited page attributes.
const MAX_INHERIT_DEPTH: usize = 32;

/// Width and height of a page in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

/// The visible box of a page in default user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PageBox {
    pub llx: f64,
    pub lly: f64,
    pub urx: f64,
    pub ury: f64,
}

impl PageBox {
    pub fn size(&self) -> PageSize {
        PageSize {
            width: (self.urx - self.llx).abs(),
            height: (self.ury - self.lly).abs(),
        }
    }
}

/// Reads a number from an integer or real object.
pub(crate) fn get_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// Follows references until a direct object is reached.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    let mut current = obj;
    for _ in 0..MAX_INHERIT_DEPTH {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Looks up a page attribute, walking up the `Parent` chain when the page
/// itself does not carry it.
pub(crate) fn inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        let parent = dict.get(b"Parent").ok()?;
        dict = resolve_dict(doc, parent)?;
    }
    None
}

fn box_values(doc: &Document, obj: &Object) -> Option<PageBox> {
    let arr = resolve(doc, obj)?.as_array().ok()?;
    let values: Vec<f64> = arr
        .iter()
        .filter_map(|o| resolve(doc, o).and_then(get_number))
        .collect();
    if values.len() != 4 {
        return None;
    }
    Some(PageBox {
        llx: values[0].min(values[2]),
        lly: values[1].min(values[3]),
        urx: values[0].max(values[2]),
        ury: values[1].max(values[3]),
    })
}

/// Effective visible box of a page: CropBox if present, otherwise MediaBox,
/// both inheritable through `Parent`.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> PageBox {
    inherited(doc, page_id, b"CropBox")
        .and_then(|obj| box_values(doc, obj))
        .or_else(|| inherited(doc, page_id, b"MediaBox").and_then(|obj| box_values(doc, obj)))
        .unwrap_or_else(|| {
            tracing::warn!(?page_id, "page has no readable box, assuming Letter");
            DEFAULT_BOX
        })
}

/// Affine transform `[a b c d e f]` as used by `cm` and `Tm`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Matrix([f64; 6]);

impl Matrix {
    pub const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self([a, b, c, d, e, f])
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// Parses six numeric operands.
    pub fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() < 6 {
            return None;
        }
        let mut values = [0.0; 6];
        for (slot, operand) in values.iter_mut().zip(operands) {
            *slot = get_number(operand)?;
        }
        Some(Self(values))
    }

    /// Returns `self × other`: applies `self` first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    /// Length of the unit vertical vector after transformation.
    pub fn vertical_scale(&self) -> f64 {
        let [_, _, c, d, _, _] = self.0;
        (c * c + d * d).sqrt()
    }

    pub fn horizontal_scale(&self) -> f64 {
        let [a, b, _, _, _, _] = self.0;
        (a * a + b * b).sqrt()
    }
}
