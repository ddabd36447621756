use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Failed to parse PDF: {0}")]
    Parse(String),

    #[error("Invalid page range: {0}")]
    InvalidRange(String),

    #[error("PDF operation failed: {0}")]
    Operation(String),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Nothing to process: {0}")]
    Empty(String),
}

impl PdfError {
    /// True when the error was caused by the caller's input rather than the document
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PdfError::InvalidRange(_) | PdfError::UnsupportedInput(_) | PdfError::Empty(_)
        )
    }
}
