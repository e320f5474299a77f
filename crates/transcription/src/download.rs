//! Rendering a completed job as a downloadable file.

use serde::Serialize;

use creditscribe_core::{DomainError, DomainResult};

use crate::job::{JobStatus, TranscriptionJob};
use crate::provider::ExportFormat;

/// A file ready to be sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub content: String,
}

impl TranscriptionJob {
    /// Render as `txt`, `srt` or `vtt`. Unknown formats fall back to plain text.
    ///
    /// A missing export (the best-effort fetch failed) yields empty content.
    pub fn download(&self, format: &str) -> DomainResult<Download> {
        if self.status != JobStatus::Completed {
            return Err(DomainError::conflict("transcription not completed"));
        }

        let download = match format.parse::<ExportFormat>() {
            Ok(ExportFormat::Srt) => Download {
                filename: format!("{}.srt", self.file_name),
                content_type: "application/x-subrip",
                content: self.export(ExportFormat::Srt).unwrap_or_default().to_string(),
            },
            Ok(ExportFormat::Vtt) => Download {
                filename: format!("{}.vtt", self.file_name),
                content_type: "text/vtt",
                content: self.export(ExportFormat::Vtt).unwrap_or_default().to_string(),
            },
            Err(_) => Download {
                filename: format!("{}.txt", self.file_name),
                content_type: "text/plain",
                content: self.transcript_text.clone().unwrap_or_default(),
            },
        };
        Ok(download)
    }
}
