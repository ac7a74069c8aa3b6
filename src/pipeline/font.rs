//! Font resolution, text measurement and font installation.
//!
//! Resolution is a two-step affair: [`load_embedded`] tries the bundled
//! TrueType face and reports *why* it failed; [`resolve_font`] swallows that
//! failure, logs it, and hands back Helvetica instead. The caller always gets
//! a usable [`WatermarkFont`] and can ask it which one was chosen.
//!
//! ## Encodings
//!
//! * **Embedded** faces are installed as a `Type0` / `CIDFontType2` pair with
//!   `Identity-H` encoding, so text is written as big-endian glyph ids and any
//!   character the face covers can be drawn. The whole font program is
//!   embedded (no subsetting) together with a `ToUnicode` map so the
//!   watermark stays searchable.
//! * **Helvetica** is one of the 14 standard fonts every reader ships. Text is
//!   written in `WinAnsiEncoding`; characters outside it cannot be drawn.

use crate::error::FontError;
use crate::pipeline::geometry::TextMetrics;
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the standard fallback font.
pub const STANDARD_FONT: &str = "Helvetica";

/// Which font a run ended up drawing with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FontChoice {
    Embedded { path: PathBuf, name: String },
    Standard { name: String },
}

impl FontChoice {
    pub fn is_embedded(&self) -> bool {
        matches!(self, FontChoice::Embedded { .. })
    }
}

/// A parsed TrueType face, ready to measure text and be embedded.
#[derive(Debug, Clone)]
pub struct EmbeddedFont {
    path: PathBuf,
    data: Vec<u8>,
    name: String,
    units_per_em: f64,
    ascender: f64,
    descender: f64,
    cap_height: f64,
    bbox: [f64; 4],
}

/// The font used for one run.
#[derive(Debug, Clone)]
pub enum WatermarkFont {
    Embedded(EmbeddedFont),
    Helvetica,
}

/// One glyph of prepared text, widths in 1/1000 em.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreparedGlyph {
    pub code: u16,
    pub width: f64,
    pub ch: char,
}

/// Text encoded for a specific font, with its size-dependent metrics.
#[derive(Debug, Clone)]
pub struct PreparedText {
    /// Operand for the `Tj` operator.
    pub operand: Object,
    pub metrics: TextMetrics,
    pub glyphs: Vec<PreparedGlyph>,
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Read and parse the bundled font.
pub async fn load_embedded(path: Option<&Path>) -> Result<EmbeddedFont, FontError> {
    let path = path.ok_or(FontError::NotConfigured)?;
    let data = tokio::fs::read(path).await.map_err(|e| FontError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    EmbeddedFont::parse(path, data)
}

/// Try the bundled font, fall back to Helvetica. Never fails.
pub async fn resolve_font(path: Option<&Path>) -> WatermarkFont {
    match load_embedded(path).await {
        Ok(font) => {
            info!("Using embedded font '{}' ({})", font.name, font.path.display());
            WatermarkFont::Embedded(font)
        }
        Err(FontError::NotConfigured) => {
            debug!("No embedded font configured; using {}", STANDARD_FONT);
            WatermarkFont::Helvetica
        }
        Err(e) => {
            warn!("Embedded font unavailable, falling back to {}: {}", STANDARD_FONT, e);
            WatermarkFont::Helvetica
        }
    }
}

impl EmbeddedFont {
    /// Validate `data` as a single-face TrueType font.
    pub fn parse(path: &Path, data: Vec<u8>) -> Result<Self, FontError> {
        let parse_err = |detail: String| FontError::Parse {
            path: path.to_path_buf(),
            detail,
        };

        match data.get(..4) {
            Some(b"OTTO") => return Err(parse_err("CFF-flavoured OpenType is not supported".into())),
            Some(b"ttcf") => return Err(parse_err("font collections are not supported".into())),
            _ => {}
        }

        let face = ttf_parser::Face::parse(&data, 0).map_err(|e| parse_err(e.to_string()))?;
        let units_per_em = f64::from(face.units_per_em());
        let ascender = f64::from(face.ascender());
        let descender = f64::from(face.descender());
        let cap_height = face.capital_height().map(f64::from).unwrap_or(ascender);
        let bb = face.global_bounding_box();
        let bbox = [
            f64::from(bb.x_min),
            f64::from(bb.y_min),
            f64::from(bb.x_max),
            f64::from(bb.y_max),
        ];
        let name = face
            .names()
            .into_iter()
            .find(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME)
            .and_then(|n| n.to_string())
            .map(|n| sanitize_name(&n))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "WatermarkFont".to_string());

        Ok(Self {
            path: path.to_path_buf(),
            data,
            name,
            units_per_em,
            ascender,
            descender,
            cap_height,
            bbox,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scale font units to 1/1000 em.
    fn to_thousandths(&self, units: f64) -> f64 {
        units * 1000.0 / self.units_per_em
    }

    fn prepare(&self, text: &str, size: f64) -> Result<PreparedText, String> {
        let face = ttf_parser::Face::parse(&self.data, 0).map_err(|e| e.to_string())?;
        let mut glyphs = Vec::with_capacity(text.chars().count());
        let mut operand = Vec::with_capacity(glyphs.capacity() * 2);

        for ch in text.chars() {
            // Uncovered characters draw as .notdef, as readers do.
            let gid = face.glyph_index(ch).unwrap_or(ttf_parser::GlyphId(0));
            let advance = face.glyph_hor_advance(gid).map(f64::from).unwrap_or(0.0);
            operand.extend_from_slice(&gid.0.to_be_bytes());
            glyphs.push(PreparedGlyph {
                code: gid.0,
                width: self.to_thousandths(advance),
                ch,
            });
        }

        let em_width: f64 = glyphs.iter().map(|g| g.width).sum();
        let em_height = self.to_thousandths(self.ascender - self.descender);
        Ok(PreparedText {
            operand: Object::String(operand, StringFormat::Hexadecimal),
            metrics: TextMetrics {
                width: em_width / 1000.0 * size,
                height: em_height / 1000.0 * size,
            },
            glyphs,
        })
    }

    fn install(&self, doc: &mut Document, glyphs: &[PreparedGlyph]) -> ObjectId {
        let name = Object::Name(self.name.clone().into_bytes());

        let mut file = Stream::new(
            dictionary! { "Length1" => self.data.len() as i64 },
            self.data.clone(),
        );
        if let Err(e) = file.compress() {
            debug!("Font program left uncompressed: {}", e);
        }
        let file_id = doc.add_object(file);

        let bbox: Vec<Object> = self
            .bbox
            .iter()
            .map(|v| Object::Real(self.to_thousandths(*v) as f32))
            .collect();
        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => name.clone(),
            "Flags" => 32,
            "FontBBox" => bbox,
            "ItalicAngle" => 0,
            "Ascent" => Object::Real(self.to_thousandths(self.ascender) as f32),
            "Descent" => Object::Real(self.to_thousandths(self.descender) as f32),
            "CapHeight" => Object::Real(self.to_thousandths(self.cap_height) as f32),
            "StemV" => 80,
            "FontFile2" => file_id,
        });

        // One W entry per distinct glyph: gid [width]
        let widths: BTreeMap<u16, f64> = glyphs.iter().map(|g| (g.code, g.width)).collect();
        let mut w = Vec::with_capacity(widths.len() * 2);
        for (gid, width) in &widths {
            w.push(Object::Integer(i64::from(*gid)));
            w.push(Object::Array(vec![Object::Real(*width as f32)]));
        }

        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => name.clone(),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "W" => w,
            "CIDToGIDMap" => "Identity",
        });

        let to_unicode_id = doc.add_object(Stream::new(
            dictionary! {},
            to_unicode_cmap(glyphs).into_bytes(),
        ));

        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => name,
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        })
    }
}

impl WatermarkFont {
    pub fn choice(&self) -> FontChoice {
        match self {
            WatermarkFont::Embedded(f) => FontChoice::Embedded {
                path: f.path.clone(),
                name: f.name.clone(),
            },
            WatermarkFont::Helvetica => FontChoice::Standard {
                name: STANDARD_FONT.to_string(),
            },
        }
    }

    /// Encode `text` for this font and measure it at `size` points.
    ///
    /// Fails only for Helvetica, when a character has no WinAnsi code.
    pub fn prepare(&self, text: &str, size: f64) -> Result<PreparedText, String> {
        match self {
            WatermarkFont::Embedded(f) => f.prepare(text, size),
            WatermarkFont::Helvetica => prepare_helvetica(text, size),
        }
    }

    /// Add the font's objects to `doc`, returning the font dictionary id.
    pub fn install(&self, doc: &mut Document, text: &PreparedText) -> ObjectId {
        match self {
            WatermarkFont::Embedded(f) => f.install(doc, &text.glyphs),
            WatermarkFont::Helvetica => doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => STANDARD_FONT,
                "Encoding" => "WinAnsiEncoding",
            }),
        }
    }
}

// ── Helvetica ────────────────────────────────────────────────────────────

const HELVETICA_ASCENDER: f64 = 718.0;
const HELVETICA_DESCENDER: f64 = -207.0;

/// Advance widths for codes 0x20–0x7E.
#[rustfmt::skip]
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

/// Advance widths for codes 0xA0–0xFF.
#[rustfmt::skip]
const HELVETICA_LATIN1: [u16; 96] = [
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500,
];

/// WinAnsi code and Helvetica width for `ch`.
fn helvetica_glyph(ch: char) -> Option<(u8, u16)> {
    let cp = ch as u32;
    match cp {
        0x20..=0x7E => Some((cp as u8, HELVETICA_ASCII[(cp - 0x20) as usize])),
        0xA0..=0xFF => Some((cp as u8, HELVETICA_LATIN1[(cp - 0xA0) as usize])),
        _ => {
            let (code, width) = match ch {
                '€' => (0x80, 556),
                '‚' => (0x82, 222),
                'ƒ' => (0x83, 556),
                '„' => (0x84, 333),
                '…' => (0x85, 1000),
                '†' => (0x86, 556),
                '‡' => (0x87, 556),
                'ˆ' => (0x88, 333),
                '‰' => (0x89, 1000),
                'Š' => (0x8A, 667),
                '‹' => (0x8B, 333),
                'Œ' => (0x8C, 1000),
                'Ž' => (0x8E, 611),
                '‘' => (0x91, 222),
                '’' => (0x92, 222),
                '“' => (0x93, 333),
                '”' => (0x94, 333),
                '•' => (0x95, 350),
                '–' => (0x96, 556),
                '—' => (0x97, 1000),
                '˜' => (0x98, 333),
                '™' => (0x99, 1000),
                'š' => (0x9A, 500),
                '›' => (0x9B, 333),
                'œ' => (0x9C, 944),
                'ž' => (0x9E, 500),
                'Ÿ' => (0x9F, 667),
                _ => return None,
            };
            Some((code, width))
        }
    }
}

fn prepare_helvetica(text: &str, size: f64) -> Result<PreparedText, String> {
    let mut bytes = Vec::with_capacity(text.len());
    let mut glyphs = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let (code, width) = helvetica_glyph(ch).ok_or_else(|| {
            format!(
                "character '{}' (U+{:04X}) cannot be encoded with {}",
                ch, ch as u32, STANDARD_FONT
            )
        })?;
        bytes.push(code);
        glyphs.push(PreparedGlyph {
            code: u16::from(code),
            width: f64::from(width),
            ch,
        });
    }

    let em_width: f64 = glyphs.iter().map(|g| g.width).sum();
    Ok(PreparedText {
        operand: Object::String(bytes, StringFormat::Literal),
        metrics: TextMetrics {
            width: em_width / 1000.0 * size,
            height: (HELVETICA_ASCENDER - HELVETICA_DESCENDER) / 1000.0 * size,
        },
        glyphs,
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// PostScript names may not contain whitespace or PDF delimiters.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_graphic() && !"()<>[]{}/%#".contains(*c))
        .collect()
}

/// A `ToUnicode` CMap mapping each glyph id back to its character.
fn to_unicode_cmap(glyphs: &[PreparedGlyph]) -> String {
    let mapping: BTreeMap<u16, char> = glyphs.iter().map(|g| (g.code, g.ch)).collect();
    let entries: Vec<(u16, char)> = mapping.into_iter().collect();

    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    // bfchar sections hold at most 100 entries
    for block in entries.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", block.len()));
        for (gid, ch) in block {
            let mut utf16 = [0u16; 2];
            let hex: String = ch
                .encode_utf16(&mut utf16)
                .iter()
                .map(|unit| format!("{unit:04X}"))
                .collect();
            cmap.push_str(&format!("<{gid:04X}> <{hex}>\n"));
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_measures_confidential() {
        let prepared = WatermarkFont::Helvetica.prepare("CONFIDENTIAL", 20.0).unwrap();
        assert!((prepared.metrics.width - 146.68).abs() < 1e-9);
        assert!((prepared.metrics.height - 18.5).abs() < 1e-9);
        assert_eq!(prepared.glyphs.len(), 12);
    }

    #[test]
    fn helvetica_encodes_winansi() {
        let prepared = WatermarkFont::Helvetica.prepare("Café – ok", 10.0).unwrap();
        match prepared.operand {
            Object::String(bytes, StringFormat::Literal) => {
                assert_eq!(bytes, vec![b'C', b'a', b'f', 0xE9, b' ', 0x96, b' ', b'o', b'k']);
            }
            other => panic!("unexpected operand {other:?}"),
        }
    }

    #[test]
    fn helvetica_rejects_cjk() {
        let err = WatermarkFont::Helvetica.prepare("机密", 20.0).unwrap_err();
        assert!(err.contains("U+673A"), "got: {err}");
    }

    #[test]
    fn empty_text_has_zero_width() {
        let prepared = WatermarkFont::Helvetica.prepare("", 20.0).unwrap();
        assert_eq!(prepared.metrics.width, 0.0);
        assert!(prepared.metrics.height > 0.0);
    }

    #[test]
    fn width_tables_cover_their_ranges() {
        assert_eq!(helvetica_glyph(' '), Some((0x20, 278)));
        assert_eq!(helvetica_glyph('~'), Some((0x7E, 584)));
        assert_eq!(helvetica_glyph('W'), Some((b'W', 944)));
        assert_eq!(helvetica_glyph('\u{A0}'), Some((0xA0, 278)));
        assert_eq!(helvetica_glyph('ÿ'), Some((0xFF, 500)));
        assert_eq!(helvetica_glyph('\u{7F}'), None);
    }

    #[tokio::test]
    async fn missing_font_falls_back() {
        let font = resolve_font(Some(Path::new("/definitely/not/here.ttf"))).await;
        assert_eq!(
            font.choice(),
            FontChoice::Standard {
                name: "Helvetica".into()
            }
        );
    }

    #[tokio::test]
    async fn load_embedded_reports_read_failure() {
        let err = load_embedded(Some(Path::new("/definitely/not/here.ttf")))
            .await
            .unwrap_err();
        assert!(matches!(err, FontError::Read { .. }));
        assert!(matches!(load_embedded(None).await, Err(FontError::NotConfigured)));
    }

    #[tokio::test]
    async fn garbage_font_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        tokio::fs::write(&path, b"definitely not a font").await.unwrap();

        assert!(matches!(
            load_embedded(Some(&path)).await,
            Err(FontError::Parse { .. })
        ));
        assert!(!resolve_font(Some(&path)).await.choice().is_embedded());
    }

    #[test]
    fn cff_and_collections_rejected() {
        let p = Path::new("x.otf");
        assert!(matches!(
            EmbeddedFont::parse(p, b"OTTO\0\0\0\0".to_vec()),
            Err(FontError::Parse { .. })
        ));
        assert!(matches!(
            EmbeddedFont::parse(p, b"ttcf\0\0\0\0".to_vec()),
            Err(FontError::Parse { .. })
        ));
    }

    #[test]
    fn helvetica_installs_type1_dictionary() {
        let mut doc = Document::with_version("1.7");
        let prepared = WatermarkFont::Helvetica.prepare("A", 12.0).unwrap();
        let id = WatermarkFont::Helvetica.install(&mut doc, &prepared);
        let dict = doc.get_dictionary(id).unwrap();
        assert_eq!(dict.get(b"BaseFont").unwrap().as_name().unwrap(), b"Helvetica");
        assert_eq!(dict.get(b"Encoding").unwrap().as_name().unwrap(), b"WinAnsiEncoding");
    }

    #[test]
    fn cmap_maps_glyphs_to_utf16() {
        let glyphs = [
            PreparedGlyph { code: 3, width: 500.0, ch: 'A' },
            PreparedGlyph { code: 0x1234, width: 1000.0, ch: '机' },
            PreparedGlyph { code: 7, width: 600.0, ch: '😀' },
        ];
        let cmap = to_unicode_cmap(&glyphs);
        assert!(cmap.contains("3 beginbfchar"));
        assert!(cmap.contains("<0003> <0041>"));
        assert!(cmap.contains("<1234> <673A>"));
        assert!(cmap.contains("<0007> <D83DDE00>"));
    }

    #[test]
    fn sanitize_strips_delimiters() {
        assert_eq!(sanitize_name("Noto Sans/CJK (SC)"), "NotoSansCJKSC");
    }
}
