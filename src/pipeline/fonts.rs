//! Font selection for the rendered book.
//!
//! A TrueType font found at the configured path is embedded whole as a
//! CID-keyed Type0 font, which covers Cyrillic and any other script the file
//! has glyphs for. When the file is missing or unreadable the standard
//! Helvetica with WinAnsi encoding is used instead. That substitution is
//! silent: [`FontSource::load`] never fails.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// The font a document is set in.
#[derive(Debug, Clone)]
pub enum FontSource {
    Embedded(EmbeddedFont),
    Builtin,
}

impl FontSource {
    /// Resolve the configured font path, falling back to Helvetica.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("No font configured, using Helvetica");
            return FontSource::Builtin;
        };

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                debug!("Font {} not available ({}), using Helvetica", path.display(), e);
                return FontSource::Builtin;
            }
        };

        match EmbeddedFont::from_bytes(data) {
            Ok(font) => {
                debug!("Embedding font {} from {}", font.postscript_name, path.display());
                FontSource::Embedded(font)
            }
            Err(e) => {
                warn!("Font {} is not a usable TrueType file ({}), using Helvetica", path.display(), e);
                FontSource::Builtin
            }
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, FontSource::Embedded(_))
    }

    /// Name written as the PDF `BaseFont`.
    pub fn base_font(&self) -> &str {
        match self {
            FontSource::Embedded(f) => &f.postscript_name,
            FontSource::Builtin => "Helvetica",
        }
    }

    /// Advance width of `ch` in 1/1000 em.
    pub fn char_width(&self, ch: char) -> f32 {
        match self {
            FontSource::Embedded(f) => f.glyph(ch).advance,
            FontSource::Builtin => helvetica_width(ch),
        }
    }

    /// Width of `text` set at `size` points.
    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.char_width(c)).sum::<f32>() * size / 1000.0
    }

    /// Encode `text` for a `Tj` operand.
    ///
    /// Embedded fonts use 2-byte glyph ids (Identity-H) and record each glyph
    /// in `used` for the width array and ToUnicode map. Helvetica uses
    /// single WinAnsi bytes; characters outside WinAnsi become `?`.
    pub fn encode(&self, text: &str, used: &mut BTreeMap<u16, char>) -> Vec<u8> {
        match self {
            FontSource::Embedded(f) => {
                let mut out = Vec::with_capacity(text.len() * 2);
                for ch in text.chars() {
                    let glyph = f.glyph(ch);
                    used.entry(glyph.id).or_insert(ch);
                    out.extend_from_slice(&glyph.id.to_be_bytes());
                }
                out
            }
            FontSource::Builtin => text.chars().map(|c| win_ansi_byte(c).unwrap_or(b'?')).collect(),
        }
    }
}

// ── Embedded TrueType ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Glyph {
    id: u16,
    /// Advance width in 1/1000 em.
    advance: f32,
}

/// Metrics for the PDF font descriptor, in 1/1000 em.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub ascent: f32,
    pub descent: f32,
    pub cap_height: f32,
    pub bbox: [f32; 4],
}

/// A parsed TrueType font kept together with its raw bytes.
#[derive(Debug, Clone)]
pub struct EmbeddedFont {
    postscript_name: String,
    data: Vec<u8>,
    glyphs: HashMap<char, Glyph>,
    notdef: Glyph,
    metrics: FontMetrics,
}

impl EmbeddedFont {
    /// Parse `data` and index its Unicode cmap.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ttf_parser::FaceParsingError> {
        let face = ttf_parser::Face::parse(&data, 0)?;
        let scale = 1000.0 / f32::from(face.units_per_em().max(1));
        let advance = |id: u16| {
            face.glyph_hor_advance(ttf_parser::GlyphId(id))
                .map(|a| f32::from(a) * scale)
                .unwrap_or(0.0)
        };

        let mut glyphs = HashMap::new();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|cp| {
                    let (Some(ch), Some(gid)) = (char::from_u32(cp), subtable.glyph_index(cp)) else {
                        return;
                    };
                    glyphs.entry(ch).or_insert(Glyph {
                        id: gid.0,
                        advance: advance(gid.0),
                    });
                });
            }
        }

        let bbox = face.global_bounding_box();
        let ascent = f32::from(face.ascender()) * scale;
        let metrics = FontMetrics {
            ascent,
            descent: f32::from(face.descender()) * scale,
            cap_height: face.capital_height().map(|h| f32::from(h) * scale).unwrap_or(ascent),
            bbox: [
                f32::from(bbox.x_min) * scale,
                f32::from(bbox.y_min) * scale,
                f32::from(bbox.x_max) * scale,
                f32::from(bbox.y_max) * scale,
            ],
        };

        let postscript_name = face
            .names()
            .into_iter()
            .filter(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME)
            .find_map(|n| n.to_string())
            .map(|n| sanitize_font_name(&n))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "EmbeddedFont".to_string());

        let notdef = Glyph {
            id: 0,
            advance: advance(0),
        };

        Ok(Self {
            postscript_name,
            data,
            glyphs,
            notdef,
            metrics,
        })
    }

    fn glyph(&self, ch: char) -> Glyph {
        self.glyphs.get(&ch).copied().unwrap_or(self.notdef)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    pub fn postscript_name(&self) -> &str {
        &self.postscript_name
    }
}

/// PDF names may not contain whitespace or delimiters.
fn sanitize_font_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
        .collect()
}

// ── Built-in Helvetica ───────────────────────────────────────────────────

/// Helvetica advance widths for U+0020..=U+007E.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

/// WinAnsi code points that differ from Latin-1, with their Helvetica widths.
const WIN_ANSI_EXTRAS: &[(char, u8, u16)] = &[
    ('€', 0x80, 556),
    ('…', 0x85, 1000),
    ('‘', 0x91, 222),
    ('’', 0x92, 222),
    ('“', 0x93, 333),
    ('”', 0x94, 333),
    ('•', 0x95, 350),
    ('–', 0x96, 556),
    ('—', 0x97, 1000),
];

fn helvetica_width(ch: char) -> f32 {
    let code = ch as u32;
    if (0x20..=0x7E).contains(&code) {
        return f32::from(HELVETICA_ASCII[(code - 0x20) as usize]);
    }
    if let Some((_, _, w)) = WIN_ANSI_EXTRAS.iter().find(|(c, _, _)| *c == ch) {
        return f32::from(*w);
    }
    // Other Latin-1 letters, and '?' for anything unencodable.
    556.0
}

fn win_ansi_byte(ch: char) -> Option<u8> {
    let code = ch as u32;
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(code as u8),
        _ => WIN_ANSI_EXTRAS.iter().find(|(c, _, _)| *c == ch).map(|(_, b, _)| *b),
    }
}
