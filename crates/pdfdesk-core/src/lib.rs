//! PDF operations on in-memory buffers
//!
//! Everything here takes and returns byte vectors so callers can run the
//! operations on uploaded files without touching disk.

pub mod command;
pub mod compress;
pub mod convert;
pub mod error;
pub mod inspect;
pub mod merge;
pub mod ranges;
pub mod split;

#[cfg(test)]
mod test_support;

pub use command::OperationMetrics;
pub use compress::{compress_document, CompressionLevel, CompressionReport};
pub use convert::{images_to_pdf, pdf_to_text, text_to_pdf, ConvertTarget, ImageInput, TextLayout};
pub use error::PdfError;
pub use inspect::{inspect, page_count, PdfInfo};
pub use merge::merge_documents;
pub use ranges::{parse_range_groups, parse_ranges, validate_groups, validate_pages};
pub use split::{split_by_ranges, split_document, split_every_page};
