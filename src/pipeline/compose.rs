//! Page compositor: draws the prepared watermark onto one page.
//!
//! The page's original content streams are left untouched. The page's
//! `Contents` becomes `[q-stream, original…, Q+watermark-stream]`, so
//! whatever graphics state the original leaves behind is popped before the
//! watermark is drawn and no stream has to be decoded or re-encoded.
//!
//! `Resources` and `MediaBox` may be inherited from ancestor `Pages` nodes.
//! Resources are copied onto the page as a direct dictionary before being
//! extended, so a dictionary shared with other pages is never mutated.

use crate::config::{Rgb, WatermarkSpec};
use crate::pipeline::font::{PreparedText, WatermarkFont};
use crate::pipeline::geometry::{GlyphPlacement, LayoutFn, PageGeometry};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

/// Default page size when no `MediaBox` is found (US Letter).
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Guard against `Parent` cycles in malformed page trees.
const MAX_TREE_DEPTH: usize = 64;

const FONT_RESOURCE: &str = "WmF";
const GS_RESOURCE: &str = "WmGs";

/// Everything needed to stamp a page, prepared once per run.
#[derive(Debug)]
pub struct PageCompositor {
    font_id: ObjectId,
    gs_id: ObjectId,
    text: PreparedText,
    color: Rgb,
    font_size: f64,
    layout: LayoutFn,
}

impl PageCompositor {
    /// Encode the text, then install the font and opacity state into `doc`.
    ///
    /// Both objects are shared by every page of the run.
    pub fn install(
        doc: &mut Document,
        font: &WatermarkFont,
        spec: &WatermarkSpec,
    ) -> Result<Self, String> {
        let text = font.prepare(&spec.text, spec.font_size)?;
        let font_id = font.install(doc, &text);
        let opacity = Object::Real(spec.opacity as f32);
        let gs_id = doc.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => opacity.clone(),
            "CA" => opacity,
        });
        debug!(
            "Installed watermark font {:?} and graphics state {:?} ({:.2} x {:.2} pt)",
            font_id, gs_id, text.metrics.width, text.metrics.height
        );
        Ok(Self {
            font_id,
            gs_id,
            text,
            color: spec.color,
            font_size: spec.font_size,
            layout: spec.layout.placement_fn(),
        })
    }

    pub fn text(&self) -> &PreparedText {
        &self.text
    }

    /// Stamp one page. Returns the number of copies drawn.
    pub fn composite(&self, doc: &mut Document, page_id: ObjectId) -> Result<usize, String> {
        let media_box = media_box(doc, page_id)?;
        let page = PageGeometry {
            width: (media_box[2] - media_box[0]).abs(),
            height: (media_box[3] - media_box[1]).abs(),
        };
        let origin = (media_box[0].min(media_box[2]), media_box[1].min(media_box[3]));

        let placements = (self.layout)(&self.text.metrics, &page)?;

        let mut resources = effective_resources(doc, page_id)?;
        let font_name = attach_resource(doc, &mut resources, b"Font", FONT_RESOURCE, self.font_id)?;
        let gs_name = attach_resource(doc, &mut resources, b"ExtGState", GS_RESOURCE, self.gs_id)?;

        let ops = self.operations(&font_name, &gs_name, origin, &placements);
        let body = Content { operations: ops }
            .encode()
            .map_err(|e| format!("encoding watermark content: {e}"))?;

        let existing = existing_contents(doc, page_id)?;
        let mut contents = Vec::with_capacity(existing.len() + 2);
        let stamp = if existing.is_empty() {
            body
        } else {
            contents.push(Object::Reference(
                doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec())),
            ));
            contents.extend(existing);
            [b"\nQ\n".as_slice(), body.as_slice()].concat()
        };
        let mut stamp = Stream::new(Dictionary::new(), stamp);
        if let Err(e) = stamp.compress() {
            debug!("Watermark stream left uncompressed: {}", e);
        }
        contents.push(Object::Reference(doc.add_object(stamp)));

        let page_dict = doc
            .get_dictionary_mut(page_id)
            .map_err(|e| format!("page dictionary: {e}"))?;
        page_dict.set("Resources", resources);
        page_dict.set("Contents", contents);

        Ok(placements.len())
    }

    fn operations(
        &self,
        font_name: &[u8],
        gs_name: &[u8],
        origin: (f64, f64),
        placements: &[GlyphPlacement],
    ) -> Vec<Operation> {
        let real = |v: f64| Object::Real(v as f32);
        let mut ops = Vec::with_capacity(placements.len() * 9);

        for p in placements {
            let (sin, cos) = p.rotation_degrees.to_radians().sin_cos();
            ops.push(Operation::new("q", vec![]));
            ops.push(Operation::new("gs", vec![Object::Name(gs_name.to_vec())]));
            ops.push(Operation::new(
                "rg",
                vec![real(self.color.r), real(self.color.g), real(self.color.b)],
            ));
            ops.push(Operation::new("BT", vec![]));
            ops.push(Operation::new(
                "Tf",
                vec![Object::Name(font_name.to_vec()), real(self.font_size)],
            ));
            ops.push(Operation::new(
                "Tm",
                vec![
                    real(cos),
                    real(sin),
                    real(-sin),
                    real(cos),
                    real(origin.0 + p.x),
                    real(origin.1 + p.y),
                ],
            ));
            ops.push(Operation::new("Tj", vec![self.text.operand.clone()]));
            ops.push(Operation::new("ET", vec![]));
            ops.push(Operation::new("Q", vec![]));
        }
        ops
    }
}

// ── Page tree helpers ────────────────────────────────────────────────────

/// Follow references until a direct object is reached.
fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> Result<&'a Object, String> {
    for _ in 0..MAX_TREE_DEPTH {
        match obj {
            Object::Reference(id) => {
                obj = doc
                    .get_object(*id)
                    .map_err(|e| format!("object {id:?}: {e}"))?;
            }
            other => return Ok(other),
        }
    }
    Err("reference chain too deep".into())
}

/// Look up `key` on the page, then on each ancestor `Pages` node.
fn inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>, String> {
    let mut node_id = page_id;
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc
            .get_dictionary(node_id)
            .map_err(|e| format!("page tree node {node_id:?}: {e}"))?;
        if let Ok(value) = node.get(key) {
            return Ok(Some(value));
        }
        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => node_id = parent,
            Err(_) => return Ok(None),
        }
    }
    Err("page tree too deep".into())
}

/// The page's `MediaBox` as `[x1, y1, x2, y2]`.
pub fn media_box(doc: &Document, page_id: ObjectId) -> Result<[f64; 4], String> {
    let Some(obj) = inherited(doc, page_id, b"MediaBox")? else {
        return Ok(DEFAULT_MEDIA_BOX);
    };
    let values = resolve(doc, obj)?
        .as_array()
        .map_err(|_| "MediaBox is not an array".to_string())?;
    if values.len() != 4 {
        return Err(format!("MediaBox has {} entries, expected 4", values.len()));
    }

    let mut rect = [0.0; 4];
    for (slot, value) in rect.iter_mut().zip(values) {
        *slot = resolve(doc, value)?
            .as_float()
            .map(f64::from)
            .map_err(|_| "MediaBox entry is not a number".to_string())?;
    }
    if rect[0] == rect[2] || rect[1] == rect[3] {
        return Err("MediaBox has zero area".into());
    }
    Ok(rect)
}

/// The page's resources, inherited or not, as an owned direct dictionary.
fn effective_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary, String> {
    match inherited(doc, page_id, b"Resources")? {
        Some(obj) => resolve(doc, obj)?
            .as_dict()
            .cloned()
            .map_err(|_| "Resources is not a dictionary".to_string()),
        None => Ok(Dictionary::new()),
    }
}

/// Add `id` to the `category` sub-dictionary under a name not already used
/// there, returning the chosen name.
fn attach_resource(
    doc: &Document,
    resources: &mut Dictionary,
    category: &[u8],
    base: &str,
    id: ObjectId,
) -> Result<Vec<u8>, String> {
    let mut entries = match resources.get(category) {
        Ok(obj) => resolve(doc, obj)?
            .as_dict()
            .cloned()
            .map_err(|_| format!("{} resources are not a dictionary", String::from_utf8_lossy(category)))?,
        Err(_) => Dictionary::new(),
    };

    let name = unique_name(&entries, base);
    entries.set(name.clone(), Object::Reference(id));
    resources.set(category.to_vec(), entries);
    Ok(name)
}

fn unique_name(entries: &Dictionary, base: &str) -> Vec<u8> {
    let mut name = base.as_bytes().to_vec();
    let mut n = 1;
    while entries.has(&name) {
        name = format!("{base}{n}").into_bytes();
        n += 1;
    }
    name
}

/// The page's current content stream references, in drawing order.
fn existing_contents(doc: &mut Document, page_id: ObjectId) -> Result<Vec<Object>, String> {
    let contents = doc
        .get_dictionary(page_id)
        .map_err(|e| format!("page dictionary: {e}"))?
        .get(b"Contents")
        .ok()
        .cloned();

    Ok(match contents {
        None | Some(Object::Null) => Vec::new(),
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => vec![Object::Reference(id)],
            Err(e) => return Err(format!("content stream {id:?}: {e}")),
        },
        Some(Object::Array(items)) => items,
        // Direct streams are not allowed here, but are easy to repair.
        Some(Object::Stream(stream)) => vec![Object::Reference(doc.add_object(stream))],
        Some(other) => return Err(format!("unexpected Contents entry: {other:?}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::geometry::Layout;

    /// One-page document whose MediaBox and Resources live on the Pages node.
    fn inherited_doc() -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let existing_font = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let shared_resources = doc.add_object(dictionary! {
            "Font" => dictionary! { "WmF" => existing_font },
        });
        let content = doc.add_object(Stream::new(
            dictionary! {},
            b"BT /WmF 12 Tf 72 720 Td (Hello) Tj ET".to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), Object::Real(842.0)],
                "Resources" => shared_resources,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        (doc, page_id)
    }

    fn spec(layout: Layout) -> WatermarkSpec {
        WatermarkSpec::new("DRAFT", 24.0, Rgb::new(1.0, 0.0, 0.0), 0.25, layout).unwrap()
    }

    #[test]
    fn media_box_is_inherited() {
        let (doc, page_id) = inherited_doc();
        assert_eq!(media_box(&doc, page_id).unwrap(), [0.0, 0.0, 595.0, 842.0]);
    }

    #[test]
    fn composite_avoids_resource_name_collision() {
        let (mut doc, page_id) = inherited_doc();
        let compositor =
            PageCompositor::install(&mut doc, &WatermarkFont::Helvetica, &spec(Layout::Center)).unwrap();
        assert_eq!(compositor.composite(&mut doc, page_id).unwrap(), 1);

        let page = doc.get_dictionary(page_id).unwrap();
        let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        assert!(fonts.has(b"WmF"), "original font kept");
        assert!(fonts.has(b"WmF1"), "watermark font under a fresh name");
        let gs = resources.get(b"ExtGState").unwrap().as_dict().unwrap();
        assert!(gs.has(b"WmGs"));
    }

    #[test]
    fn composite_wraps_original_content() {
        let (mut doc, page_id) = inherited_doc();
        let compositor =
            PageCompositor::install(&mut doc, &WatermarkFont::Helvetica, &spec(Layout::Center)).unwrap();
        compositor.composite(&mut doc, page_id).unwrap();

        let content = doc.get_page_content(page_id).unwrap();
        let text = String::from_utf8_lossy(&content);
        let q = text.find("q\n").unwrap();
        let hello = text.find("(Hello) Tj").unwrap();
        let draft = text.find("(DRAFT) Tj").unwrap();
        assert!(q < hello && hello < draft, "{text}");
        assert!(text.contains("/WmGs gs"));
        assert!(text.contains("/WmF1 "));
        assert!(!text.contains("/WmF 24"));
    }

    #[test]
    fn shared_resources_are_not_mutated() {
        let (mut doc, page_id) = inherited_doc();
        let compositor =
            PageCompositor::install(&mut doc, &WatermarkFont::Helvetica, &spec(Layout::Center)).unwrap();
        compositor.composite(&mut doc, page_id).unwrap();

        let pages_id = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Parent")
            .unwrap()
            .as_reference()
            .unwrap();
        let shared = doc
            .get_dictionary(pages_id)
            .unwrap()
            .get(b"Resources")
            .unwrap()
            .as_reference()
            .unwrap();
        let fonts = doc.get_dictionary(shared).unwrap().get(b"Font").unwrap().as_dict().unwrap();
        assert!(!fonts.has(b"WmF1"));
    }

    #[test]
    fn tile_draws_one_copy_per_cell() {
        let (mut doc, page_id) = inherited_doc();
        let compositor =
            PageCompositor::install(&mut doc, &WatermarkFont::Helvetica, &spec(Layout::Tile)).unwrap();
        let expected = Layout::Tile
            .place(
                &compositor.text().metrics,
                &PageGeometry {
                    width: 595.0,
                    height: 842.0,
                },
            )
            .unwrap()
            .len();
        assert_eq!(compositor.composite(&mut doc, page_id).unwrap(), expected);
    }

    #[test]
    fn microscopic_tiles_fail_the_page() {
        let (mut doc, page_id) = inherited_doc();
        let tiny = WatermarkSpec::new("DRAFT", 1e-4, Rgb::new(0.0, 0.0, 0.0), 0.5, Layout::Tile).unwrap();
        let compositor = PageCompositor::install(&mut doc, &WatermarkFont::Helvetica, &tiny).unwrap();
        let err = compositor.composite(&mut doc, page_id).unwrap_err();
        assert!(err.contains("limit"), "{err}");
    }

    #[test]
    fn page_without_contents_gets_only_watermark() {
        let (mut doc, page_id) = inherited_doc();
        doc.get_dictionary_mut(page_id).unwrap().remove(b"Contents");
        let compositor =
            PageCompositor::install(&mut doc, &WatermarkFont::Helvetica, &spec(Layout::Diagonal)).unwrap();
        compositor.composite(&mut doc, page_id).unwrap();

        let contents = doc.get_dictionary(page_id).unwrap().get(b"Contents").unwrap();
        assert_eq!(contents.as_array().unwrap().len(), 1);
        let content = doc.get_page_content(page_id).unwrap();
        assert!(content.starts_with(b"q"), "{}", String::from_utf8_lossy(&content));
    }

    #[test]
    fn helvetica_cannot_install_cjk_text() {
        let (mut doc, _) = inherited_doc();
        let cjk = WatermarkSpec::new("机密", 24.0, Rgb::new(0.0, 0.0, 0.0), 0.5, Layout::Center).unwrap();
        assert!(PageCompositor::install(&mut doc, &WatermarkFont::Helvetica, &cjk).is_err());
    }

    #[test]
    fn unique_name_skips_taken() {
        let taken = dictionary! { "WmGs" => 1, "WmGs1" => 2 };
        assert_eq!(unique_name(&taken, "WmGs"), b"WmGs2".to_vec());
        assert_eq!(unique_name(&Dictionary::new(), "WmGs"), b"WmGs".to_vec());
    }

    #[test]
    fn zero_area_media_box_is_rejected() {
        let (mut doc, page_id) = inherited_doc();
        doc.get_dictionary_mut(page_id)
            .unwrap()
            .set("MediaBox", vec![0.into(), 0.into(), 0.into(), 100.into()]);
        assert!(media_box(&doc, page_id).is_err());
    }
}
