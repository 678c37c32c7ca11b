//! DocumentAssembler: structured content → PDF bytes.
//!
//! ## Layout
//!
//! US Letter with 1-inch margins. The first page carries the title (28 pt)
//! and author (18 pt), centred, 2 inches below the top margin. Body pages
//! follow in block order:
//!
//! * `text` blocks are paragraphs set at 14 pt on 18 pt leading with 12 pt
//!   after; each `\n` in the block starts a new line of the same paragraph
//! * resolved `image_prompt` blocks are scaled to fit a 5.5 × 5.5 inch box,
//!   centred, with 12 pt after
//! * unresolved `image_prompt` blocks produce nothing at all
//!
//! ## Determinism
//!
//! Object numbering follows block order, the document-info dictionary has no
//! timestamps and no file ID is written, so identical input and font give
//! byte-identical output. Page content streams are left uncompressed; images
//! and the embedded font file are Flate-compressed.
//!
//! ## Why spawn_blocking?
//!
//! Decoding images, compressing the font and laying out a whole book is CPU
//! work; [`render_detached`] moves it off the Tokio worker threads.

use crate::error::PipelineError;
use crate::model::{ContentBlock, StructuredContent};
use crate::pipeline::fonts::FontSource;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use pdf_writer::types::{CidFontType, FontFlags, SystemInfo, UnicodeCmap};
use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref, Str, TextStr};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Image bytes keyed by [`crate::model::ImageHandle::key`].
pub type ImageAssets = BTreeMap<String, Vec<u8>>;

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;
const FRAME_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const FRAME_TOP: f32 = PAGE_HEIGHT - MARGIN;
const FRAME_BOTTOM: f32 = MARGIN;

const TITLE_SPACER: f32 = 144.0;
const IMAGE_BOX: f32 = 396.0;
const IMAGE_SPACE_AFTER: f32 = 12.0;

const TITLE: TextStyle = TextStyle {
    size: 28.0,
    leading: 33.6,
    space_after: 30.0,
    centered: true,
};
const AUTHOR: TextStyle = TextStyle {
    size: 18.0,
    leading: 21.6,
    space_after: 50.0,
    centered: true,
};
const BODY: TextStyle = TextStyle {
    size: 14.0,
    leading: 18.0,
    space_after: 12.0,
    centered: false,
};

const FONT_NAME: Name<'static> = Name(b"F1");
const PRODUCER: &str = "book-illustrator";
const IDENTITY: SystemInfo<'static> = SystemInfo {
    registry: Str(b"Adobe"),
    ordering: Str(b"Identity"),
    supplement: 0,
};

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    size: f32,
    leading: f32,
    space_after: f32,
    centered: bool,
}

/// Render `content` on a blocking thread.
///
/// The font is resolved on that thread too; see [`FontSource::load`].
pub async fn render_detached(
    content: StructuredContent,
    assets: ImageAssets,
    font_path: Option<PathBuf>,
) -> Result<Vec<u8>, PipelineError> {
    tokio::task::spawn_blocking(move || {
        let font = FontSource::load(font_path.as_deref());
        render(&content, &assets, &font)
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("Render task panicked: {}", e)))?
}

/// Render `content` and write the PDF to `dest`, returning its size.
pub async fn render_to_file(
    content: StructuredContent,
    assets: ImageAssets,
    font_path: Option<PathBuf>,
    dest: &Path,
) -> Result<u64, PipelineError> {
    let bytes = render_detached(content, assets, font_path).await?;
    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|e| PipelineError::RenderingFailure(format!("cannot write {}: {e}", dest.display())))?;
    Ok(bytes.len() as u64)
}

/// Assemble the PDF for `content`.
///
/// Resolved blocks whose key is missing from `assets` are skipped like
/// unresolved ones. Image bytes that cannot be decoded are a
/// [`PipelineError::RenderingFailure`].
pub fn render(
    content: &StructuredContent,
    assets: &ImageAssets,
    font: &FontSource,
) -> Result<Vec<u8>, PipelineError> {
    let mut layout = Layout::new(font);

    layout.title_page(&content.title, &content.author);
    for block in &content.blocks {
        match block {
            ContentBlock::Text { data } => layout.paragraph(data),
            ContentBlock::ImagePrompt {
                resolved_image: Some(handle),
                ..
            } => match assets.get(&handle.key) {
                Some(bytes) => layout.image(bytes, &handle.key)?,
                None => warn!("Image {} has no bytes, leaving it out", handle.key),
            },
            ContentBlock::ImagePrompt { resolved_image: None, .. } => {}
        }
    }

    let pages = layout.pages.len();
    let images = layout.images.len();
    let pdf = write_pdf(layout, &content.title, &content.author)?;
    info!("Rendered PDF: {} pages, {} images, {} bytes", pages, images, pdf.len());
    Ok(pdf)
}

// ── Layout ───────────────────────────────────────────────────────────────

struct PageOps {
    content: Content,
    /// Indices into `Layout::images` drawn on this page.
    images: Vec<usize>,
}

struct PreparedImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

struct Layout<'a> {
    font: &'a FontSource,
    pages: Vec<PageOps>,
    images: Vec<PreparedImage>,
    used_glyphs: BTreeMap<u16, char>,
    cursor: f32,
    /// The next flowable starts a fresh page.
    break_pending: bool,
}

impl<'a> Layout<'a> {
    fn new(font: &'a FontSource) -> Self {
        Self {
            font,
            pages: Vec::new(),
            images: Vec::new(),
            used_glyphs: BTreeMap::new(),
            cursor: FRAME_TOP,
            break_pending: true,
        }
    }

    fn new_page(&mut self) {
        self.pages.push(PageOps {
            content: Content::new(),
            images: Vec::new(),
        });
        self.cursor = FRAME_TOP;
        self.break_pending = false;
    }

    /// Start a new page unless `height` still fits on the current one.
    fn ensure_space(&mut self, height: f32) {
        let page_is_empty = self.cursor >= FRAME_TOP;
        if self.break_pending || (self.cursor - height < FRAME_BOTTOM && !page_is_empty) {
            self.new_page();
        }
    }

    fn title_page(&mut self, title: &str, author: &str) {
        self.new_page();
        self.cursor -= TITLE_SPACER;
        self.text(title, TITLE);
        self.text(author, AUTHOR);
        self.break_pending = true;
    }

    /// Body paragraph; embedded newlines are line breaks.
    fn paragraph(&mut self, data: &str) {
        let data = data.trim_end_matches(['\n', '\r']);
        if data.trim().is_empty() {
            return;
        }
        self.text(data, BODY);
    }

    fn text(&mut self, text: &str, style: TextStyle) {
        if text.trim().is_empty() {
            return;
        }
        for segment in text.split('\n') {
            for line in wrap(self.font, segment.trim_end_matches('\r'), style.size, FRAME_WIDTH) {
                self.ensure_space(style.leading);
                let baseline = self.cursor - style.size;
                if !line.is_empty() {
                    let x = if style.centered {
                        MARGIN + (FRAME_WIDTH - self.font.text_width(&line, style.size)).max(0.0) / 2.0
                    } else {
                        MARGIN
                    };
                    self.show_line(&line, style.size, x, baseline);
                }
                self.cursor -= style.leading;
            }
        }
        self.cursor -= style.space_after;
    }

    fn show_line(&mut self, line: &str, size: f32, x: f32, baseline: f32) {
        let encoded = self.font.encode(line, &mut self.used_glyphs);
        if let Some(page) = self.pages.last_mut() {
            page.content.begin_text();
            page.content.set_font(FONT_NAME, size);
            page.content.next_line(x, baseline);
            page.content.show(Str(&encoded));
            page.content.end_text();
        }
    }

    fn image(&mut self, bytes: &[u8], key: &str) -> Result<(), PipelineError> {
        let prepared = prepare_image(bytes)
            .map_err(|e| PipelineError::RenderingFailure(format!("image {key}: {e}")))?;

        let (w, h) = (prepared.width as f32, prepared.height as f32);
        let scale = (IMAGE_BOX / w).min(IMAGE_BOX / h);
        let (draw_w, draw_h) = (w * scale, h * scale);

        self.ensure_space(draw_h);
        let x = MARGIN + (FRAME_WIDTH - draw_w) / 2.0;
        let y = self.cursor - draw_h;

        let index = self.images.len();
        self.images.push(prepared);
        if let Some(page) = self.pages.last_mut() {
            let name = image_name(index);
            page.content.save_state();
            page.content.transform([draw_w, 0.0, 0.0, draw_h, x, y]);
            page.content.x_object(Name(name.as_bytes()));
            page.content.restore_state();
            page.images.push(index);
        }
        debug!("Placed {} at {:.0}x{:.0}pt", key, draw_w, draw_h);

        self.cursor -= draw_h + IMAGE_SPACE_AFTER;
        Ok(())
    }
}

fn image_name(index: usize) -> String {
    format!("Im{}", index + 1)
}

/// Greedy line breaking at word boundaries. Words wider than `width` are
/// split between characters. Always returns at least one (possibly empty) line.
fn wrap(font: &FontSource, text: &str, size: f32, width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() {
            let candidate = format!("{current} {word}");
            if font.text_width(&candidate, size) <= width {
                current = candidate;
                continue;
            }
            lines.push(std::mem::take(&mut current));
        }

        if font.text_width(word, size) <= width {
            current = word.to_string();
            continue;
        }
        for ch in word.chars() {
            let mut next = current.clone();
            next.push(ch);
            if !current.is_empty() && font.text_width(&next, size) > width {
                lines.push(std::mem::replace(&mut current, ch.to_string()));
            } else {
                current = next;
            }
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn prepare_image(bytes: &[u8]) -> Result<PreparedImage, String> {
    let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err("image has no pixels".into());
    }

    let alpha = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        let channel: Vec<u8> = rgba.pixels().map(|p| p[3]).collect();
        // Fully opaque images need no soft mask.
        (!channel.iter().all(|a| *a == u8::MAX))
            .then(|| deflate(&channel))
            .transpose()?
    } else {
        None
    };
    let rgb = deflate(img.to_rgb8().as_raw())?;

    Ok(PreparedImage {
        width,
        height,
        rgb,
        alpha,
    })
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| e.to_string())?;
    encoder.finish().map_err(|e| e.to_string())
}

// ── PDF objects ──────────────────────────────────────────────────────────

fn write_pdf(layout: Layout<'_>, title: &str, author: &str) -> Result<Vec<u8>, PipelineError> {
    let Layout {
        font,
        pages,
        images,
        used_glyphs,
        ..
    } = layout;

    let mut alloc = Ref::new(1);
    let catalog_id = alloc.bump();
    let tree_id = alloc.bump();
    let info_id = alloc.bump();
    let font_id = alloc.bump();
    let page_ids: Vec<(Ref, Ref)> = pages.iter().map(|_| (alloc.bump(), alloc.bump())).collect();
    let image_ids: Vec<(Ref, Option<Ref>)> = images
        .iter()
        .map(|img| (alloc.bump(), img.alpha.as_ref().map(|_| alloc.bump())))
        .collect();

    let mut pdf = Pdf::new();
    pdf.catalog(catalog_id).pages(tree_id);
    pdf.pages(tree_id)
        .kids(page_ids.iter().map(|(page, _)| *page))
        .count(page_ids.len() as i32);

    for (page_ops, (page_id, content_id)) in pages.into_iter().zip(&page_ids) {
        let mut page = pdf.page(*page_id);
        page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT))
            .parent(tree_id)
            .contents(*content_id);
        let mut resources = page.resources();
        resources.fonts().pair(FONT_NAME, font_id);
        if !page_ops.images.is_empty() {
            let mut x_objects = resources.x_objects();
            for index in &page_ops.images {
                let name = image_name(*index);
                x_objects.pair(Name(name.as_bytes()), image_ids[*index].0);
            }
            x_objects.finish();
        }
        resources.finish();
        page.finish();

        pdf.stream(*content_id, &page_ops.content.finish());
    }

    for (img, (image_id, mask_id)) in images.iter().zip(&image_ids) {
        let mut xobject = pdf.image_xobject(*image_id, &img.rgb);
        xobject.filter(Filter::FlateDecode);
        xobject.width(img.width as i32);
        xobject.height(img.height as i32);
        xobject.color_space().device_rgb();
        xobject.bits_per_component(8);
        if let Some(mask_id) = mask_id {
            xobject.s_mask(*mask_id);
        }
        xobject.finish();

        if let (Some(mask_id), Some(alpha)) = (mask_id, &img.alpha) {
            let mut mask = pdf.image_xobject(*mask_id, alpha);
            mask.filter(Filter::FlateDecode);
            mask.width(img.width as i32);
            mask.height(img.height as i32);
            mask.color_space().device_gray();
            mask.bits_per_component(8);
            mask.finish();
        }
    }

    match font {
        FontSource::Builtin => {
            pdf.type1_font(font_id)
                .base_font(Name(b"Helvetica"))
                .encoding_predefined(Name(b"WinAnsiEncoding"));
        }
        FontSource::Embedded(embedded) => {
            write_embedded_font(&mut pdf, &mut alloc, font_id, font, embedded, &used_glyphs)?;
        }
    }

    pdf.document_info(info_id)
        .title(TextStr(title))
        .author(TextStr(author))
        .producer(TextStr(PRODUCER));

    Ok(pdf.finish())
}

fn write_embedded_font(
    pdf: &mut Pdf,
    alloc: &mut Ref,
    type0_id: Ref,
    font: &FontSource,
    embedded: &crate::pipeline::fonts::EmbeddedFont,
    used_glyphs: &BTreeMap<u16, char>,
) -> Result<(), PipelineError> {
    let cid_id = alloc.bump();
    let descriptor_id = alloc.bump();
    let file_id = alloc.bump();
    let cmap_id = alloc.bump();
    let base_font = Name(embedded.postscript_name().as_bytes());

    pdf.type0_font(type0_id)
        .base_font(base_font)
        .encoding_predefined(Name(b"Identity-H"))
        .descendant_font(cid_id)
        .to_unicode(cmap_id);

    let mut cid = pdf.cid_font(cid_id);
    cid.subtype(CidFontType::Type2)
        .base_font(base_font)
        .system_info(IDENTITY)
        .font_descriptor(descriptor_id)
        .default_width(0.0)
        .cid_to_gid_map_predefined(Name(b"Identity"));
    {
        let mut widths = cid.widths();
        for (gid, ch) in used_glyphs {
            widths.consecutive(*gid, [font.char_width(*ch)]);
        }
    }
    cid.finish();

    let metrics = embedded.metrics();
    let [x0, y0, x1, y1] = metrics.bbox;
    pdf.font_descriptor(descriptor_id)
        .name(base_font)
        .flags(FontFlags::NON_SYMBOLIC)
        .bbox(Rect::new(x0, y0, x1, y1))
        .italic_angle(0.0)
        .ascent(metrics.ascent)
        .descent(metrics.descent)
        .cap_height(metrics.cap_height)
        .stem_v(80.0)
        .font_file2(file_id);

    let data = embedded.data();
    let compressed = deflate(data).map_err(|e| PipelineError::RenderingFailure(format!("font compression: {e}")))?;
    pdf.stream(file_id, &compressed)
        .filter(Filter::FlateDecode)
        .pair(Name(b"Length1"), data.len() as i32);

    let mut cmap: UnicodeCmap = UnicodeCmap::new(Name(b"Custom"), IDENTITY);
    for (gid, ch) in used_glyphs {
        cmap.pair(*gid, *ch);
    }
    pdf.cmap(cmap_id, &cmap.finish());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageHandle;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([10, 120, 200])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn handle(key: &str) -> ImageHandle {
        ImageHandle {
            id: "m_1".into(),
            key: key.into(),
            prompt: "a dog running".into(),
        }
    }

    fn book(resolved: Option<ImageHandle>) -> StructuredContent {
        StructuredContent {
            title: "T".into(),
            author: "Au".into(),
            blocks: vec![
                ContentBlock::text("Once upon a time."),
                ContentBlock::ImagePrompt {
                    data: "a dog running".into(),
                    resolved_image: resolved,
                },
                ContentBlock::text("The end."),
            ],
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    fn page_count(pdf: &[u8]) -> usize {
        let start = find(pdf, b"/Count ").expect("page tree") + b"/Count ".len();
        let digits: String = pdf[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .map(|b| *b as char)
            .collect();
        digits.parse().unwrap()
    }

    #[test]
    fn renders_title_page_then_blocks_in_order() {
        let assets = ImageAssets::from([("img/1.png".to_string(), png(40, 20))]);
        let pdf = render(&book(Some(handle("img/1.png"))), &assets, &FontSource::Builtin).unwrap();

        assert!(pdf.starts_with(b"%PDF"));
        assert_eq!(page_count(&pdf), 2, "title page + one body page");
        assert_eq!(count(&pdf, b"/Subtype /Image"), 1);

        let title = find(&pdf, b"(T) Tj").expect("title");
        let author = find(&pdf, b"(Au) Tj").expect("author");
        let first = find(&pdf, b"(Once upon a time.) Tj").expect("first paragraph");
        let image = find(&pdf, b"/Im1 Do").expect("image");
        let last = find(&pdf, b"(The end.) Tj").expect("last paragraph");
        assert!(title < author && author < first && first < image && image < last);
    }

    #[test]
    fn unresolved_prompt_leaves_no_trace() {
        let pdf = render(&book(None), &ImageAssets::new(), &FontSource::Builtin).unwrap();
        assert_eq!(count(&pdf, b"/Subtype /Image"), 0);
        assert!(find(&pdf, b"a dog running").is_none());
        assert!(find(&pdf, b"(The end.) Tj").is_some());
    }

    #[test]
    fn missing_asset_is_skipped() {
        let pdf = render(&book(Some(handle("gone.png"))), &ImageAssets::new(), &FontSource::Builtin).unwrap();
        assert_eq!(count(&pdf, b"/Subtype /Image"), 0);
    }

    #[test]
    fn rendering_is_deterministic() {
        let assets = ImageAssets::from([("img/1.png".to_string(), png(30, 30))]);
        let content = book(Some(handle("img/1.png")));
        let a = render(&content, &assets, &FontSource::Builtin).unwrap();
        let b = render(&content, &assets, &FontSource::Builtin).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn newlines_are_line_breaks_within_a_paragraph() {
        let content = StructuredContent {
            title: "T".into(),
            author: "A".into(),
            blocks: vec![ContentBlock::text("line one\nline two")],
        };
        let pdf = render(&content, &ImageAssets::new(), &FontSource::Builtin).unwrap();
        let one = find(&pdf, b"(line one) Tj").unwrap();
        let two = find(&pdf, b"(line two) Tj").unwrap();
        assert!(one < two);
    }

    #[test]
    fn long_text_flows_onto_more_pages() {
        let paragraph = "word ".repeat(400);
        let content = StructuredContent {
            title: "T".into(),
            author: "A".into(),
            blocks: (0..10).map(|_| ContentBlock::text(paragraph.clone())).collect(),
        };
        let pdf = render(&content, &ImageAssets::new(), &FontSource::Builtin).unwrap();
        assert!(page_count(&pdf) > 5, "got {} pages", page_count(&pdf));
    }

    #[test]
    fn undecodable_image_is_rendering_failure() {
        let assets = ImageAssets::from([("bad.png".to_string(), b"nope".to_vec())]);
        let err = render(&book(Some(handle("bad.png"))), &assets, &FontSource::Builtin).unwrap_err();
        assert_eq!(err.kind(), "rendering_failure");
    }

    #[test]
    fn wrap_respects_width() {
        let font = FontSource::Builtin;
        let lines = wrap(&font, "aaa bbb ccc ddd", 10.0, 40.0);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| font.text_width(l, 10.0) <= 40.0));
        assert_eq!(lines.join(" "), "aaa bbb ccc ddd");

        assert_eq!(wrap(&font, "", 10.0, 40.0), vec![String::new()]);
        let long = wrap(&font, &"m".repeat(50), 10.0, 40.0);
        assert!(long.len() > 1);
    }

    #[test]
    fn embedded_font_carries_cid_font_widths_and_unicode_map() {
        use crate::pipeline::fonts::{test_font, EmbeddedFont};

        let font = FontSource::Embedded(EmbeddedFont::from_bytes(test_font::bytes()).unwrap());
        let content = StructuredContent {
            title: "Книга".into(),
            author: "Автор".into(),
            blocks: vec![ContentBlock::text("Жили-были дед да баба.")],
        };
        let pdf = render(&content, &ImageAssets::new(), &font).unwrap();

        assert_eq!(page_count(&pdf), 2);
        assert!(find(&pdf, b"/Subtype /Type0").is_some());
        assert!(find(&pdf, b"/Subtype /CIDFontType2").is_some());
        assert!(find(&pdf, b"/Encoding /Identity-H").is_some());
        assert!(find(&pdf, b"/BaseFont /EmbeddedFont").is_some());
        assert!(find(&pdf, b"/FontFile2 ").is_some());
        assert!(find(&pdf, b"/ToUnicode ").is_some());
        let length1 = format!("/Length1 {}", test_font::bytes().len());
        assert!(find(&pdf, length1.as_bytes()).is_some());
        assert!(find(&pdf, b"Helvetica").is_none());

        // Every glyph used gets a width and a Unicode mapping.
        assert!(find(&pdf, b"/W [").is_some());
        for ch in ['К', 'Ж', 'б', '-', '.'] {
            let gid = test_font::glyph_id(ch).unwrap();
            let width = format!("{gid} [");
            assert!(find(&pdf, width.as_bytes()).is_some(), "no width for {ch}");
            let mapping = format!("<{:04X}> <{:04X}>", gid, ch as u32);
            assert!(find(&pdf, mapping.as_bytes()).is_some(), "no ToUnicode entry for {ch}");
        }

        let again = render(&content, &ImageAssets::new(), &font).unwrap();
        assert_eq!(pdf, again);
    }

    #[tokio::test]
    async fn render_detached_embeds_font_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let font_path = dir.path().join("mini.ttf");
        std::fs::write(&font_path, crate::pipeline::fonts::test_font::bytes()).unwrap();

        let pdf = render_detached(book(None), ImageAssets::new(), Some(font_path)).await.unwrap();
        assert!(find(&pdf, b"/Subtype /Type0").is_some());
        let builtin = render_detached(book(None), ImageAssets::new(), None).await.unwrap();
        assert!(find(&builtin, b"/BaseFont /Helvetica").is_some());
    }

    #[tokio::test]
    async fn render_to_file_writes_pdf() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("out.pdf");
        let written = render_to_file(book(None), ImageAssets::new(), None, &dest)
            .await
            .unwrap();
        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(bytes.len() as u64, written);
        assert!(bytes.starts_with(b"%PDF"));
    }
}
