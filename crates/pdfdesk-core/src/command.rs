use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Sizes and timing reported for every processed document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
}

impl OperationMetrics {
    pub fn measure(started: Instant, input_size_bytes: usize, output: &[u8], page_count: u32) -> Self {
        Self {
            input_size_bytes,
            output_size_bytes: output.len(),
            page_count,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}
