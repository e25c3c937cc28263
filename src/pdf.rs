//! Serializes a laid-out page into a single-page PDF.
//!
//! Output carries no creation date or document ID, so rendering the same
//! transcript twice yields identical bytes.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::RenderError;
use crate::layout::{self, Color, DrawOp, RenderedPage};
use crate::metrics::Font;
use crate::models::TranscriptDocument;

const LOGO_RESOURCE: &str = "Im1";

/// Institution logo decoded to raw RGB pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Logo {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl Logo {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RenderError> {
        let image = image::load_from_memory(bytes)?.to_rgb8();
        Ok(Self {
            width: image.width(),
            height: image.height(),
            rgb: image.into_raw(),
        })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_bytes(&bytes)
    }
}

/// Loads the logo, or `None` when it cannot be read. Transcripts are then
/// rendered without it.
pub async fn load_logo(path: impl AsRef<Path>) -> Option<Logo> {
    let path = path.as_ref();
    match Logo::load(path).await {
        Ok(logo) => Some(logo),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "logo unavailable, rendering without it");
            None
        }
    }
}

pub fn render(document: &TranscriptDocument, logo: Option<&Logo>) -> Result<Vec<u8>, RenderError> {
    let page = layout::layout(document, logo.is_some());
    to_pdf(&page, logo)
}

/// Encodes text for WinAnsiEncoding. Unmappable characters become '?'.
pub fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            'Œ' => 0x8C,
            'œ' => 0x9C,
            _ => b'?',
        })
        .collect()
}

fn fill_color(color: Color) -> Operation {
    let [r, g, b] = color.unit();
    Operation::new("rg", vec![r.into(), g.into(), b.into()])
}

fn operations(page: &RenderedPage) -> Vec<Operation> {
    let mut ops = Vec::new();
    for op in &page.ops {
        match op {
            DrawOp::Rect {
                x,
                y,
                width,
                height,
                color,
            } => {
                ops.push(fill_color(*color));
                ops.push(Operation::new(
                    "re",
                    vec![(*x).into(), (*y).into(), (*width).into(), (*height).into()],
                ));
                ops.push(Operation::new("f", vec![]));
            }
            DrawOp::Text {
                x,
                y,
                size,
                font,
                color,
                text,
            } => {
                ops.push(Operation::new("BT", vec![]));
                ops.push(fill_color(*color));
                ops.push(Operation::new(
                    "Tf",
                    vec![Object::Name(font.resource_name().as_bytes().to_vec()), (*size).into()],
                ));
                ops.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                ops.push(Operation::new(
                    "Tj",
                    vec![Object::String(win_ansi(text), StringFormat::Literal)],
                ));
                ops.push(Operation::new("ET", vec![]));
            }
            DrawOp::Logo {
                x,
                y,
                width,
                height,
            } => {
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new(
                    "cm",
                    vec![
                        (*width).into(),
                        0.0_f32.into(),
                        0.0_f32.into(),
                        (*height).into(),
                        (*x).into(),
                        (*y).into(),
                    ],
                ));
                ops.push(Operation::new(
                    "Do",
                    vec![Object::Name(LOGO_RESOURCE.as_bytes().to_vec())],
                ));
                ops.push(Operation::new("Q", vec![]));
            }
        }
    }
    ops
}

fn font_object(doc: &mut Document, font: Font) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => font.base_font(),
        "Encoding" => "WinAnsiEncoding",
    })
}

pub fn to_pdf(page: &RenderedPage, logo: Option<&Logo>) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = font_object(&mut doc, Font::Regular);
    let bold_id = font_object(&mut doc, Font::Bold);

    let mut resources = dictionary! {
        "Font" => dictionary! {
            Font::Regular.resource_name() => regular_id,
            Font::Bold.resource_name() => bold_id,
        },
    };

    // A logo op without pixel data would reference a missing XObject.
    let draws_logo = page.has_logo() && logo.is_some();
    let ops: Vec<Operation> = operations(page)
        .into_iter()
        .filter(|op| draws_logo || !matches!(op.operator.as_str(), "q" | "cm" | "Do" | "Q"))
        .collect();

    if let Some(logo) = logo.filter(|_| draws_logo) {
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(logo.width),
                "Height" => i64::from(logo.height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8_i64,
            },
            logo.rgb.clone(),
        );
        let image_id = doc.add_object(image);
        resources.set("XObject", dictionary! { LOGO_RESOURCE => image_id });
    }
    let resources_id = doc.add_object(resources);

    let content = Content { operations: ops };
    let encoded = content
        .encode()
        .map_err(|e| RenderError::Serialize(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1_i64,
        "MediaBox" => vec![0.0_f32.into(), 0.0_f32.into(), page.width.into(), page.height.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| RenderError::Serialize(e.to_string()))?;
    Ok(bytes)
}
