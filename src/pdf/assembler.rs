//! PDF assembly: one page per image, in order
//!
//! JPEG and PNG inputs are placed as image XObjects, scaled to fit inside the
//! page margins and centered. Anything else becomes a text page explaining why
//! the image was skipped; a corrupt JPEG or PNG becomes a text page carrying
//! the decoder error. A bad image never aborts the document.

use crate::error::{Error, Result};
use crate::pdf::layout::{PageLayout, Placement};
use crate::record::{normalize_mime, MediaType};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

const PRODUCER: &str = concat!("image-pdf-mcp-server ", env!("CARGO_PKG_VERSION"));

const TITLE_FONT_SIZE: f32 = 18.0;
const BODY_FONT_SIZE: f32 = 12.0;

/// One image handed to the assembler
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub name: String,
    /// Declared media type; not trusted beyond choosing a decoder
    pub media_type: String,
    pub data: Arc<[u8]>,
}

/// Document-level assembly settings
#[derive(Debug, Clone, Default)]
pub struct AssemblyOptions {
    pub layout: PageLayout,
    pub title: Option<String>,
}

/// What ended up on one page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageOutcome {
    /// The image was placed
    Image {
        width: u32,
        height: u32,
        #[serde(flatten)]
        placement: Placement,
    },
    /// Declared type cannot be embedded; a warning page was written
    Skipped { media_type: String },
    /// Decoding failed; an error page was written
    Failed { reason: String },
}

/// Per-page report, 1-indexed
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub page: u32,
    pub name: String,
    #[serde(flatten)]
    pub outcome: PageOutcome,
}

/// Finished document
#[derive(Debug, Clone)]
pub struct AssembledPdf {
    pub bytes: Vec<u8>,
    pub pages: Vec<PageReport>,
}

/// Build a PDF with exactly one page per input, in input order
pub fn assemble(inputs: &[ImageInput], options: &AssemblyOptions) -> Result<AssembledPdf> {
    if inputs.is_empty() {
        return Err(Error::EmptySubmission);
    }

    let layout = options.layout;
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let fonts = Fonts {
        body: doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }),
        title: doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        }),
    };

    let mut kids = Vec::with_capacity(inputs.len());
    let mut reports = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.iter().enumerate() {
        let (operations, resources, outcome) = build_page(&mut doc, input, &layout, &fonts);

        match &outcome {
            PageOutcome::Image { width, height, .. } => {
                tracing::debug!(page = index + 1, name = %input.name, width, height, "image placed");
            }
            PageOutcome::Skipped { media_type } => {
                tracing::warn!(page = index + 1, name = %input.name, media_type = %media_type, "unsupported image type, wrote warning page");
            }
            PageOutcome::Failed { reason } => {
                tracing::warn!(page = index + 1, name = %input.name, reason = %reason, "image could not be decoded, wrote error page");
            }
        }

        let content = Content { operations }.encode()?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(layout.width), Object::Real(layout.height)],
            "Contents" => content_id,
            "Resources" => resources,
        });
        kids.push(Object::Reference(page_id));
        reports.push(PageReport {
            page: (index + 1) as u32,
            name: input.name.clone(),
            outcome,
        });
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut info = dictionary! {
        "Producer" => Object::string_literal(PRODUCER),
        "CreationDate" => Object::string_literal(chrono::Utc::now().format("D:%Y%m%d%H%M%SZ").to_string()),
    };
    if let Some(title) = options.title.as_deref().filter(|t| !t.trim().is_empty()) {
        info.set("Title", Object::String(to_win_ansi(title), StringFormat::Literal));
    }
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;

    Ok(AssembledPdf {
        bytes,
        pages: reports,
    })
}

struct Fonts {
    body: ObjectId,
    title: ObjectId,
}

/// Decoded image ready to be added to the document
struct PreparedImage {
    width: u32,
    height: u32,
    image: Stream,
    soft_mask: Option<Stream>,
}

fn build_page(
    doc: &mut Document,
    input: &ImageInput,
    layout: &PageLayout,
    fonts: &Fonts,
) -> (Vec<Operation>, Dictionary, PageOutcome) {
    let media_type = match MediaType::from_mime(&input.media_type) {
        Some(mt) if mt.is_embeddable() => mt,
        _ => {
            let declared = normalize_mime(&input.media_type);
            let declared = if declared.is_empty() {
                "unknown".to_string()
            } else {
                declared
            };
            let body = format!(
                "\"{}\" was not added to this document because its type ({}) is not supported. Only JPEG and PNG images can be placed in the PDF.",
                input.name, declared
            );
            let (ops, resources) = text_page(layout, fonts, "Image skipped", &body, WARNING_COLOR);
            return (ops, resources, PageOutcome::Skipped { media_type: declared });
        }
    };

    match prepare_image(&input.data, media_type) {
        Ok(prepared) => {
            let placement = layout.place(prepared.width, prepared.height);
            let mut image = prepared.image;
            if let Some(mask) = prepared.soft_mask {
                let mask_id = doc.add_object(mask);
                image.dict.set("SMask", mask_id);
            }
            let image_id = doc.add_object(image);

            let ops = vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(placement.draw_width),
                        0.into(),
                        0.into(),
                        Object::Real(placement.draw_height),
                        Object::Real(placement.x),
                        Object::Real(placement.y),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ];
            let resources = dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            };
            (
                ops,
                resources,
                PageOutcome::Image {
                    width: prepared.width,
                    height: prepared.height,
                    placement,
                },
            )
        }
        Err(reason) => {
            let body = format!(
                "\"{}\" could not be embedded because the image data is invalid: {}",
                input.name, reason
            );
            let (ops, resources) =
                text_page(layout, fonts, "Image could not be embedded", &body, ERROR_COLOR);
            (ops, resources, PageOutcome::Failed { reason })
        }
    }
}

const WARNING_COLOR: [f32; 3] = [0.72, 0.45, 0.0];
const ERROR_COLOR: [f32; 3] = [0.75, 0.1, 0.1];

/// A page holding only a heading and a wrapped message
fn text_page(
    layout: &PageLayout,
    fonts: &Fonts,
    title: &str,
    body: &str,
    color: [f32; 3],
) -> (Vec<Operation>, Dictionary) {
    let x = layout.margin;
    let top = layout.height - layout.margin - TITLE_FONT_SIZE;
    let leading = BODY_FONT_SIZE * 1.4;
    // Helvetica averages roughly half an em per glyph
    let max_chars = ((layout.available_width() / (BODY_FONT_SIZE * 0.5)) as usize).max(1);

    let mut ops = vec![
        Operation::new("BT", vec![]),
        Operation::new(
            "rg",
            color.iter().map(|c| Object::Real(*c)).collect(),
        ),
        Operation::new(
            "Tf",
            vec![Object::Name(b"F2".to_vec()), Object::Real(TITLE_FONT_SIZE)],
        ),
        Operation::new("Td", vec![Object::Real(x), Object::Real(top)]),
        Operation::new(
            "Tj",
            vec![Object::String(to_win_ansi(title), StringFormat::Literal)],
        ),
        Operation::new("rg", vec![0.into(), 0.into(), 0.into()]),
        Operation::new(
            "Tf",
            vec![Object::Name(b"F1".to_vec()), Object::Real(BODY_FONT_SIZE)],
        ),
        Operation::new("TL", vec![Object::Real(leading)]),
        Operation::new("Td", vec![0.into(), Object::Real(-TITLE_FONT_SIZE * 1.6)]),
    ];

    let body_height = layout.available_height() - TITLE_FONT_SIZE * 2.6;
    let max_lines = ((body_height / leading) as usize).max(1);

    for (i, line) in fit_lines(wrap_text(body, max_chars), max_lines, max_chars)
        .iter()
        .enumerate()
    {
        if i > 0 {
            ops.push(Operation::new("T*", vec![]));
        }
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(to_win_ansi(line), StringFormat::Literal)],
        ));
    }
    ops.push(Operation::new("ET", vec![]));

    let resources = dictionary! {
        "Font" => dictionary! {
            "F1" => fonts.body,
            "F2" => fonts.title,
        },
    };
    (ops, resources)
}

/// Greedy word wrap; words longer than a line are split
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Keep at most `max_lines`; a cut-off message ends with an ellipsis
fn fit_lines(mut lines: Vec<String>, max_lines: usize, max_chars: usize) -> Vec<String> {
    if lines.len() <= max_lines {
        return lines;
    }
    lines.truncate(max_lines);
    if let Some(last) = lines.last_mut() {
        let keep = max_chars.saturating_sub(3);
        let mut cut: String = last.chars().take(keep).collect();
        cut.push_str("...");
        *last = cut;
    }
    lines
}

/// Encode text for the standard fonts' WinAnsi encoding.
/// Latin-1 printable characters pass through; everything else becomes `?`.
fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            0x09 | 0x0A | 0x0D => b' ',
            _ => b'?',
        })
        .collect()
}

/// Decode and convert an image into XObject streams without touching the document
fn prepare_image(data: &[u8], media_type: MediaType) -> std::result::Result<PreparedImage, String> {
    let decoded = image::load_from_memory_with_format(data, media_type.image_format())
        .map_err(|e| e.to_string())?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err("image has no pixels".to_string());
    }

    if media_type == MediaType::Jpeg {
        let color_space = match jpeg_component_count(data) {
            Some(1) => Some("DeviceGray"),
            Some(3) => Some("DeviceRGB"),
            // CMYK and exotic layouts are re-encoded from the decoded pixels
            _ => None,
        };
        if let Some(color_space) = color_space {
            let image = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                data.to_vec(),
            );
            return Ok(PreparedImage {
                width,
                height,
                image,
                soft_mask: None,
            });
        }
    }

    flate_image(&decoded)
}

/// Raw pixels compressed with FlateDecode, alpha split into a soft mask
fn flate_image(decoded: &DynamicImage) -> std::result::Result<PreparedImage, String> {
    let (width, height) = (decoded.width(), decoded.height());
    let color = decoded.color();

    let (color_space, pixels) = if color.has_color() {
        ("DeviceRGB", decoded.to_rgb8().into_raw())
    } else {
        ("DeviceGray", decoded.to_luma8().into_raw())
    };

    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        deflate(&pixels)?,
    );

    let soft_mask = if color.has_alpha() {
        let alpha: Vec<u8> = decoded.to_rgba8().pixels().map(|p| p.0[3]).collect();
        Some(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        ))
    } else {
        None
    };

    Ok(PreparedImage {
        width,
        height,
        image,
        soft_mask,
    })
}

fn deflate(data: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| format!("Failed to compress image data: {}", e))?;
    encoder
        .finish()
        .map_err(|e| format!("Failed to finish compression: {}", e))
}

/// Number of colour components declared in the JPEG frame header
fn jpeg_component_count(data: &[u8]) -> Option<u8> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        match marker {
            // fill byte
            0xFF => {
                pos += 1;
                continue;
            }
            // standalone markers carry no length
            0x01 | 0xD0..=0xD8 => {
                pos += 2;
                continue;
            }
            // end of image / start of scan: no frame header seen
            0xD9 | 0xDA => return None,
            _ => {}
        }

        let is_frame = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            return data.get(pos + 9).copied();
        }

        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 2 + len;
    }
    None
}
