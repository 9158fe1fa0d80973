//! The host's unmodified read implementation, behind a trait so the
//! decision engine can degrade to it whenever cache correctness cannot be
//! guaranteed.

use std::future::Future;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::ReadCacheErr;
use crate::error::Result;
use crate::text::slice_lines;
use crate::text::total_lines;

/// Byte cap the baseline applies to a single read result.
pub const BASELINE_MAX_BYTES: u64 = 256 * 1024;

/// Line cap the baseline applies to a single read result.
pub const BASELINE_MAX_LINES: u32 = 2_000;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "ico"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineRequest {
    pub path: PathBuf,
    /// 1-based first line to emit.
    pub offset: Option<u32>,
    /// Number of lines to emit from `offset`.
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Text { text: String },
    Image { path: PathBuf },
}

/// Attached to the result when the baseline had to cut the window short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub emitted_lines: u32,
    pub total_lines: u32,
    pub emitted_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineOutcome {
    pub blocks: Vec<ContentBlock>,
    pub truncation: Option<Truncation>,
}

impl BaselineOutcome {
    pub fn has_image(&self) -> bool {
        self.blocks
            .iter()
            .any(|block| matches!(block, ContentBlock::Image { .. }))
    }

    /// Concatenated text content of the result.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }
}

pub trait BaselineReader {
    fn read(&self, request: &BaselineRequest) -> impl Future<Output = Result<BaselineOutcome>> + Send;
}

/// Direct filesystem implementation of the host's read semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsBaselineReader;

impl BaselineReader for FsBaselineReader {
    async fn read(&self, request: &BaselineRequest) -> Result<BaselineOutcome> {
        if request.offset == Some(0) {
            return Err(ReadCacheErr::Validation(
                "offset must be a positive integer".to_string(),
            ));
        }
        if request.limit == Some(0) {
            return Err(ReadCacheErr::Validation(
                "limit must be a positive integer".to_string(),
            ));
        }

        let bytes = tokio::fs::read(&request.path).await?;
        if is_image_path(&request.path) {
            return Ok(BaselineOutcome {
                blocks: vec![ContentBlock::Image {
                    path: request.path.clone(),
                }],
                truncation: None,
            });
        }

        let text = String::from_utf8_lossy(&bytes).into_owned();
        let total = total_lines(&text);
        let start = request.offset.unwrap_or(1);
        if start > total {
            return Err(ReadCacheErr::Validation(format!(
                "offset {start} is beyond the end of the file ({total} lines)"
            )));
        }
        let end = request
            .limit
            .map(|limit| start.saturating_add(limit - 1))
            .unwrap_or(total)
            .min(total);

        let mut emitted_end = end;
        let mut truncated = false;
        if end - start + 1 > BASELINE_MAX_LINES {
            emitted_end = start + BASELINE_MAX_LINES - 1;
            truncated = true;
        }
        let mut window = slice_lines(&text, start, emitted_end);
        if window.len() as u64 > BASELINE_MAX_BYTES {
            let mut cut = BASELINE_MAX_BYTES as usize;
            while cut > 0 && !window.is_char_boundary(cut) {
                cut -= 1;
            }
            window.truncate(cut);
            truncated = true;
        }

        let truncation = truncated.then_some(Truncation {
            emitted_lines: total_lines(&window),
            total_lines: total,
            emitted_bytes: window.len() as u64,
        });
        Ok(BaselineOutcome {
            blocks: vec![ContentBlock::Text { text: window }],
            truncation,
        })
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
