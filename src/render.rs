//! Visual grounding: re-render the source pages behind the top chunks.
//!
//! Pages come from the final ranked chunks in rank order. Each chunk's
//! 1-based page label becomes a 0-based page index; labels that are not
//! integers contribute nothing. Pairs are deduplicated and capped at
//! [`MAX_GROUNDING_IMAGES`]. Rasterization goes through poppler's
//! `pdftoppm`, one page per invocation, PNG on stdout.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::GroundingConfig;
use crate::models::{GroundingImage, PageRef, ScoredChunk};

/// Upper bound on images attached to one generation request.
pub const MAX_GROUNDING_IMAGES: usize = 2;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render page `page_index` (0-based) of the PDF at `path` as PNG bytes.
    async fn rasterize(&self, path: &Path, page_index: usize) -> Result<Vec<u8>>;
}

pub struct PopplerRasterizer {
    program: String,
    dpi: u32,
}

impl PopplerRasterizer {
    pub fn new(config: &GroundingConfig) -> Self {
        Self {
            program: config.pdftoppm.clone(),
            dpi: config.dpi,
        }
    }
}

#[async_trait]
impl PageRasterizer for PopplerRasterizer {
    async fn rasterize(&self, path: &Path, page_index: usize) -> Result<Vec<u8>> {
        let page = (page_index + 1).to_string();
        let output = tokio::process::Command::new(&self.program)
            .arg("-f")
            .arg(&page)
            .arg("-l")
            .arg(&page)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg("-singlefile")
            .arg(path)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("{} failed to start: {} (is poppler installed?)", self.program, e))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if !output.stdout.starts_with(PNG_MAGIC) {
            bail!("{} produced no PNG for page {}", self.program, page);
        }
        Ok(output.stdout)
    }
}

/// Pages to render for `chunks`, best-ranked first.
pub fn select_pages(chunks: &[ScoredChunk]) -> Vec<PageRef> {
    let mut pages: Vec<PageRef> = Vec::new();
    for scored in chunks {
        if pages.len() == MAX_GROUNDING_IMAGES {
            break;
        }
        let chunk = &scored.chunk;
        if !is_pdf(&chunk.filename) {
            continue;
        }
        let page_index = match chunk.page_label.trim().parse::<usize>() {
            Ok(n) if n >= 1 => n - 1,
            _ => {
                debug!(filename = %chunk.filename, label = %chunk.page_label, "page label not numeric");
                continue;
            }
        };
        let page = PageRef {
            filename: chunk.filename.clone(),
            page_index,
        };
        if !pages.contains(&page) {
            pages.push(page);
        }
    }
    pages
}

fn is_pdf(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Locate `filename`: the caller's map first, then the upload directory.
pub fn resolve_source(
    filename: &str,
    path_map: &HashMap<String, PathBuf>,
    upload_dir: &Path,
) -> Option<PathBuf> {
    if let Some(path) = path_map.get(filename) {
        return Some(path.clone());
    }
    let fallback = upload_dir.join(filename);
    fallback.is_file().then_some(fallback)
}

/// Render grounding images for `chunks`. A page that cannot be found or
/// rendered is logged and left out.
pub async fn synthesize(
    rasterizer: &dyn PageRasterizer,
    chunks: &[ScoredChunk],
    path_map: &HashMap<String, PathBuf>,
    upload_dir: &Path,
) -> Vec<GroundingImage> {
    let mut images = Vec::new();
    for page in select_pages(chunks) {
        let Some(path) = resolve_source(&page.filename, path_map, upload_dir) else {
            warn!(filename = %page.filename, "source file not found, skipping page image");
            continue;
        };
        match rasterizer.rasterize(&path, page.page_index).await {
            Ok(bytes) => {
                debug!(filename = %page.filename, page = page.page_index + 1, bytes = bytes.len(), "rendered page");
                images.push(GroundingImage {
                    page,
                    mime_type: "image/png",
                    bytes,
                });
            }
            Err(e) => {
                warn!(
                    filename = %page.filename,
                    page = page.page_index + 1,
                    error = %e,
                    "page rasterization failed, skipping"
                );
            }
        }
    }
    images
}
