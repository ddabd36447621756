//! Format conversion: images to PDF, plain text to PDF, PDF to text

use std::io::Write;
use std::str::FromStr;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{ColorType, DynamicImage, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};

use crate::error::PdfError;

/// Conversion target requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvertTarget {
    /// Images or plain text into a PDF
    Pdf,
    /// A PDF's text layer into plain text
    Text,
}

impl FromStr for ConvertTarget {
    type Err = PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "text" | "txt" => Ok(Self::Text),
            other => Err(PdfError::UnsupportedInput(format!(
                "Unknown conversion target '{}'. Use pdf or text",
                other
            ))),
        }
    }
}

/// One image to place on its own page
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub name: String,
    pub data: Vec<u8>,
}

/// Page geometry for text rendering, in PDF points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextLayout {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub font_size: f32,
}

impl Default for TextLayout {
    fn default() -> Self {
        // US Letter, one-inch margins
        Self {
            page_width: 612.0,
            page_height: 792.0,
            margin: 72.0,
            font_size: 11.0,
        }
    }
}

impl TextLayout {
    fn leading(&self) -> f32 {
        self.font_size * 1.25
    }

    /// Helvetica averages roughly half an em per glyph
    pub fn chars_per_line(&self) -> usize {
        let usable = (self.page_width - 2.0 * self.margin).max(self.font_size);
        ((usable / (self.font_size * 0.5)).floor() as usize).max(1)
    }

    pub fn lines_per_page(&self) -> usize {
        let usable = (self.page_height - 2.0 * self.margin).max(self.leading());
        ((usable / self.leading()).floor() as usize).max(1)
    }
}

/// Build a PDF with one page per image, each page sized to the image
pub fn images_to_pdf(images: Vec<ImageInput>) -> Result<Vec<u8>, PdfError> {
    if images.is_empty() {
        return Err(PdfError::Empty("No images to convert".into()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(images.len());

    for image in &images {
        let xobject = image_xobject(image)?;
        let (width, height) = (xobject.width, xobject.height);
        let image_id = doc.add_object(xobject.stream);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width.into(),
                        0.into(),
                        0.into(),
                        height.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };

        let page_id = add_page(
            &mut doc,
            pages_id,
            (width, height),
            content,
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        )?;
        kids.push(page_id);
    }

    finish_document(doc, pages_id, kids)
}

struct ImageXObject {
    stream: Stream,
    width: i64,
    height: i64,
}

fn image_xobject(input: &ImageInput) -> Result<ImageXObject, PdfError> {
    let format = image::guess_format(&input.data).map_err(|_| {
        PdfError::UnsupportedInput(format!("'{}' is not a recognised image", input.name))
    })?;

    let decoded = image::load_from_memory_with_format(&input.data, format).map_err(|e| {
        PdfError::UnsupportedInput(format!("Could not decode '{}': {}", input.name, e))
    })?;

    let width = decoded.width() as i64;
    let height = decoded.height() as i64;

    // Baseline RGB and grayscale JPEGs can be embedded untouched
    if format == ImageFormat::Jpeg {
        if let Some(color_space) = jpeg_color_space(&decoded) {
            let dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            };
            return Ok(ImageXObject {
                stream: Stream::new(dict, input.data.clone()).with_compression(false),
                width,
                height,
            });
        }
    }

    let compressed = deflate(&decoded.to_rgb8().into_raw())
        .map_err(|e| PdfError::Operation(format!("Failed to encode '{}': {}", input.name, e)))?;

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };
    Ok(ImageXObject {
        stream: Stream::new(dict, compressed).with_compression(false),
        width,
        height,
    })
}

fn deflate(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    encoder.finish()
}

fn jpeg_color_space(image: &DynamicImage) -> Option<&'static str> {
    match image.color() {
        ColorType::Rgb8 => Some("DeviceRGB"),
        ColorType::L8 => Some("DeviceGray"),
        _ => None,
    }
}

/// Typeset plain text onto as many pages as needed
pub fn text_to_pdf(text: &str, layout: TextLayout) -> Result<Vec<u8>, PdfError> {
    if text.trim().is_empty() {
        return Err(PdfError::Empty("No text to convert".into()));
    }

    let lines = wrap_text(text, layout.chars_per_line());
    let per_page = layout.lines_per_page();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::new();
    for chunk in lines.chunks(per_page) {
        let top = layout.page_height - layout.margin - layout.font_size;

        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), layout.font_size.into()]),
            Operation::new("TL", vec![layout.leading().into()]),
            Operation::new("Td", vec![layout.margin.into(), top.into()]),
        ];
        for line in chunk {
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(line), StringFormat::Literal)],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let page_id = add_page(
            &mut doc,
            pages_id,
            (layout.page_width as i64, layout.page_height as i64),
            Content { operations },
            dictionary! { "Font" => dictionary! { "F1" => font_id } },
        )?;
        kids.push(page_id);
    }

    finish_document(doc, pages_id, kids)
}

/// Greedy word wrap. Blank lines are kept; words longer than a line are
/// broken at the line width.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let paragraph = paragraph.replace('\t', "    ");
        if paragraph.trim().is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();

            while word.len() > width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(width);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            let current_len = current.chars().count();
            let needed = if current.is_empty() { word.len() } else { current_len + 1 + word.len() };
            if needed > width {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.extend(word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}

/// Latin-1 subset of WinAnsiEncoding; anything else becomes '?'
fn encode_win_ansi(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| {
            let code = c as u32;
            if (0x20..0x7F).contains(&code) || (0xA0..=0xFF).contains(&code) {
                code as u8
            } else {
                b'?'
            }
        })
        .collect()
}

/// Extract the text layer of a PDF
pub fn pdf_to_text(bytes: &[u8]) -> Result<String, PdfError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| PdfError::Parse(e.to_string()))
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    (width, height): (i64, i64),
    content: Content,
    resources: lopdf::Dictionary,
) -> Result<ObjectId, PdfError> {
    let encoded = content
        .encode()
        .map_err(|e| PdfError::Operation(format!("Failed to encode page content: {}", e)))?;
    let content_id = doc.add_object(Stream::new(lopdf::Dictionary::new(), encoded));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        "Contents" => content_id,
        "Resources" => resources,
    }))
}

fn finish_document(
    mut doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
) -> Result<Vec<u8>, PdfError> {
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfError::Operation(format!("Failed to save PDF: {}", e)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::page_count;
    use crate::test_support::{jpeg_bytes, png_bytes};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_target_parsing() {
        assert_eq!("PDF".parse::<ConvertTarget>().unwrap(), ConvertTarget::Pdf);
        assert_eq!("txt".parse::<ConvertTarget>().unwrap(), ConvertTarget::Text);
        assert!("docx".parse::<ConvertTarget>().is_err());
    }

    #[test]
    fn test_images_to_pdf_one_page_per_image() {
        let pdf = images_to_pdf(vec![
            ImageInput { name: "a.png".into(), data: png_bytes(40, 20) },
            ImageInput { name: "b.jpg".into(), data: jpeg_bytes(30, 60) },
        ])
        .unwrap();

        assert_eq!(page_count(&pdf).unwrap(), 2);
    }

    #[test]
    fn test_page_size_matches_image() {
        let pdf = images_to_pdf(vec![ImageInput {
            name: "wide.png".into(),
            data: png_bytes(300, 100),
        }])
        .unwrap();

        let doc = Document::load_mem(&pdf).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let media_box = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .and_then(|d| d.get(b"MediaBox"))
            .and_then(Object::as_array)
            .unwrap()
            .iter()
            .map(|o| o.as_i64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(media_box, vec![0, 0, 300, 100]);
    }

    #[test]
    fn test_images_to_pdf_rejects_non_images() {
        let result = images_to_pdf(vec![ImageInput {
            name: "notes.txt".into(),
            data: b"hello".to_vec(),
        }]);
        assert!(matches!(result, Err(PdfError::UnsupportedInput(_))));
    }

    #[test]
    fn test_images_to_pdf_rejects_empty() {
        assert!(matches!(images_to_pdf(vec![]), Err(PdfError::Empty(_))));
    }

    #[test]
    fn test_wrap_text_breaks_on_words() {
        let lines = wrap_text("the quick brown fox jumps", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn test_wrap_text_splits_long_words_and_keeps_blank_lines() {
        let lines = wrap_text("abcdefghij\n\nxy", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij", "", "xy"]);
    }

    #[test]
    fn test_text_to_pdf_paginates() {
        let layout = TextLayout::default();
        let line_count = layout.lines_per_page() * 2 + 1;
        let text = vec!["line"; line_count].join("\n");

        let pdf = text_to_pdf(&text, layout).unwrap();
        assert_eq!(page_count(&pdf).unwrap(), 3);
    }

    #[test]
    fn test_text_to_pdf_rejects_blank() {
        assert!(matches!(
            text_to_pdf("  \n ", TextLayout::default()),
            Err(PdfError::Empty(_))
        ));
    }

    #[test]
    fn test_win_ansi_replaces_unmappable() {
        assert_eq!(encode_win_ansi("café ✓"), vec![b'c', b'a', b'f', 0xE9, b' ', b'?']);
    }
}
