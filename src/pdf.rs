//! Multi-image PDF assembly.
//!
//! Images are prepared (decoded, downscaled, re-encoded as JPEG) up front, so a
//! bad image fails the request before a single PDF byte has been sent. The
//! finished document is then serialized straight into the response body.

use axum::body::{Body, Bytes};
use image::imageops::FilterType;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use serde_json::Value;
use std::io::{self, Write};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::decode_data_url;
use crate::enhance::encode_jpeg;
use crate::error::{AppError, Result};
use crate::temp_file::with_temp_file;

/// Images wider than this are downscaled before embedding.
pub const MAX_IMAGE_WIDTH: u32 = 1200;
pub const PAGE_JPEG_QUALITY: u8 = 90;
/// Every image is fit into this box (points), anchored at the page margin.
pub const FIT_BOX: (f32, f32) = (500.0, 700.0);
pub const DEFAULT_MARGIN: f32 = 50.0;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// Page options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSize {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PageSize {
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A3" => Some(Self::A3),
            "A4" => Some(Self::A4),
            "A5" => Some(Self::A5),
            "LETTER" => Some(Self::Letter),
            "LEGAL" => Some(Self::Legal),
            "TABLOID" => Some(Self::Tabloid),
            _ => None,
        }
    }

    /// Portrait (width, height) in points.
    pub fn dimensions(self) -> (f32, f32) {
        match self {
            Self::A3 => (841.89, 1190.55),
            Self::A4 => (595.28, 841.89),
            Self::A5 => (419.53, 595.28),
            Self::Letter => (612.0, 792.0),
            Self::Legal => (612.0, 1008.0),
            Self::Tabloid => (792.0, 1224.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    #[default]
    Portrait,
    Landscape,
}

/// Page geometry shared by every page of one document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfOptions {
    pub size: PageSize,
    pub layout: Layout,
    pub margin: f32,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            size: PageSize::default(),
            layout: Layout::default(),
            margin: DEFAULT_MARGIN,
        }
    }
}

impl PdfOptions {
    /// Read options from a loosely-typed JSON object.
    ///
    /// Each field falls back to its default on its own when absent, of the
    /// wrong type, or unrecognized.
    pub fn from_json(value: Option<&Value>) -> Self {
        let defaults = Self::default();
        let Some(obj) = value.and_then(Value::as_object) else {
            return defaults;
        };

        let size = obj
            .get("size")
            .and_then(Value::as_str)
            .and_then(PageSize::from_keyword)
            .unwrap_or(defaults.size);

        let layout = match obj.get("layout").and_then(Value::as_str) {
            Some(s) if s.eq_ignore_ascii_case("landscape") => Layout::Landscape,
            _ => Layout::Portrait,
        };

        let margin = obj
            .get("margin")
            .and_then(Value::as_f64)
            .map(|m| m as f32)
            .filter(|m| m.is_finite() && *m > 0.0)
            .unwrap_or(defaults.margin);

        Self {
            size,
            layout,
            margin,
        }
    }

    /// Page (width, height) in points after applying the layout.
    pub fn page_dimensions(&self) -> (f32, f32) {
        let (w, h) = self.size.dimensions();
        match self.layout {
            Layout::Portrait => (w, h),
            Layout::Landscape => (h, w),
        }
    }
}

// ============================================================================
// Image preparation
// ============================================================================

/// A page image ready for embedding: baseline RGB JPEG plus its pixel size.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Downscale to at most [`MAX_IMAGE_WIDTH`] wide (never upscale) and
/// re-encode as RGB JPEG.
pub fn optimize(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > MAX_IMAGE_WIDTH {
        let height = ((img.height() as u64 * MAX_IMAGE_WIDTH as u64) / img.width() as u64).max(1);
        img.resize_exact(MAX_IMAGE_WIDTH, height as u32, FilterType::Lanczos3)
    } else {
        img
    };
    encode_jpeg(&image::DynamicImage::ImageRgb8(img.to_rgb8()), PAGE_JPEG_QUALITY)
}

/// Decode and optimize every image in order. Fails on the first bad image.
pub async fn prepare_images(images: &[String], temp_dir: &Path) -> Result<Vec<PreparedImage>> {
    let mut prepared = Vec::with_capacity(images.len());

    for (i, data_url) in images.iter().enumerate() {
        let bytes = decode_data_url(data_url)?;
        let optimized = tokio::task::spawn_blocking(move || optimize(&bytes)).await??;

        let page = with_temp_file(temp_dir, "temp_img", i, &optimized, |path| async move {
            let jpeg = tokio::fs::read(&path).await?;
            let (width, height) = image::image_dimensions(&path)?;
            Ok::<_, AppError>(PreparedImage {
                jpeg,
                width,
                height,
            })
        })
        .await?;

        debug!(
            "Prepared page {} ({}x{}, {} bytes)",
            i + 1,
            page.width,
            page.height,
            page.jpeg.len()
        );
        prepared.push(page);
    }

    Ok(prepared)
}

// ============================================================================
// Document layout
// ============================================================================

/// Image placement in PDF user space (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Fit an image into [`FIT_BOX`] at the top-left margin, centered in the box.
pub fn place_image(img_width: u32, img_height: u32, options: &PdfOptions) -> Placement {
    let (box_w, box_h) = FIT_BOX;
    let (_, page_h) = options.page_dimensions();

    let (w, h) = (img_width.max(1) as f32, img_height.max(1) as f32);
    let scale = (box_w / w).min(box_h / h);
    let (width, height) = (w * scale, h * scale);

    let x = options.margin + (box_w - width) / 2.0;
    let top = options.margin + (box_h - height) / 2.0;

    Placement {
        x,
        y: page_h - top - height,
        width,
        height,
    }
}

/// Build the document: one page per image, in input order.
pub fn build_document(pages: Vec<PreparedImage>, options: &PdfOptions) -> Result<Document> {
    let (page_w, page_h) = options.page_dimensions();
    let media_box: Vec<Object> = vec![0f32.into(), 0f32.into(), page_w.into(), page_h.into()];

    let mut doc = Document::with_version("1.5");
    let pages_id: ObjectId = doc.new_object_id();
    let page_count = pages.len();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);

    for page in pages {
        let placement = place_image(page.width, page.height, options);

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.width as i64,
                "Height" => page.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.jpeg,
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        placement.width.into(),
                        0f32.into(),
                        0f32.into(),
                        placement.height.into(),
                        placement.x.into(),
                        placement.y.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => media_box.clone(),
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}

// ============================================================================
// Streaming
// ============================================================================

/// `io::Write` that forwards fixed-size chunks to an async receiver.
struct ChannelWriter {
    tx: mpsc::Sender<Bytes>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(STREAM_CHUNK_SIZE),
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(STREAM_CHUNK_SIZE),
        ));
        self.tx
            .blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= STREAM_CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Serialize `doc` on a blocking thread, yielding chunks as they are written.
pub fn stream_document(mut doc: Document) -> Body {
    let (tx, rx) = mpsc::channel::<Bytes>(4);

    tokio::task::spawn_blocking(move || {
        let mut writer = ChannelWriter::new(tx);
        if let Err(e) = doc.save_to(&mut writer) {
            warn!("PDF stream aborted: {}", e);
            return;
        }
        if let Err(e) = writer.flush() {
            warn!("PDF stream aborted on final chunk: {}", e);
        }
    });

    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, io::Error>(chunk), rx))
    });
    Body::from_stream(chunks)
}

/// Prepare every image, lay out the document and start streaming it.
pub async fn assemble(images: &[String], options: &PdfOptions, temp_dir: &Path) -> Result<Body> {
    let prepared = prepare_images(images, temp_dir).await?;
    let page_count = prepared.len();

    let options = *options;
    let doc = tokio::task::spawn_blocking(move || build_document(prepared, &options)).await??;

    info!(
        "Assembled PDF: {} page(s), {:?} {:?}, margin {}",
        page_count, options.size, options.layout, options.margin
    );
    Ok(stream_document(doc))
}
