//! Page rasterisation via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which keeps
//! thread-local state and is CPU-bound. `tokio::task::spawn_blocking` moves
//! the work onto the blocking pool so concurrent pages waiting on the network
//! are never stalled behind a render.
//!
//! ## DPI and the pixel cap
//!
//! Pages are rendered at a fixed DPI (300 by default) because drawing
//! callouts are tiny. Sheet sizes vary wildly, though: a 36 × 48 in sheet at
//! 300 DPI is 10 800 × 14 400 px. [`MAX_RENDERED_EDGE_PX`] caps the longest
//! edge so one oversized sheet cannot exhaust memory.

use crate::error::TakeoffError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Longest rendered edge in pixels, whatever the DPI.
pub const MAX_RENDERED_EDGE_PX: i32 = 8000;

/// Rasterisation failure for one page file.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no image produced from '{0}'")]
    Empty(PathBuf),
    #[error("pdfium: {0}")]
    Pdfium(String),
    #[error("render task panicked: {0}")]
    Panicked(String),
}

/// Turns a single-page PDF into an image.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn render(&self, page_pdf: &Path, dpi: u32) -> Result<DynamicImage, RenderError>;
}

/// Bind to libpdfium.
///
/// `PDFIUM_LIB_PATH` wins when set; otherwise a library next to the working
/// directory, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, TakeoffError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| TakeoffError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// [`Rasterizer`] backed by pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn render(&self, page_pdf: &Path, dpi: u32) -> Result<DynamicImage, RenderError> {
        let path = page_pdf.to_path_buf();
        tokio::task::spawn_blocking(move || render_first_page_blocking(&path, dpi))
            .await
            .map_err(|e| RenderError::Panicked(e.to_string()))?
    }
}

/// Blocking implementation of page rendering.
fn render_first_page_blocking(page_pdf: &Path, dpi: u32) -> Result<DynamicImage, RenderError> {
    let pdfium = bind_pdfium().map_err(|e| RenderError::Pdfium(e.to_string()))?;
    let document = pdfium
        .load_pdf_from_file(page_pdf, None)
        .map_err(|e| RenderError::Pdfium(format!("{e:?}")))?;

    let pages = document.pages();
    if pages.is_empty() {
        return Err(RenderError::Empty(page_pdf.to_path_buf()));
    }
    let page = pages
        .get(0)
        .map_err(|e| RenderError::Pdfium(format!("{e:?}")))?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(MAX_RENDERED_EDGE_PX)
        .set_maximum_height(MAX_RENDERED_EDGE_PX);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| RenderError::Pdfium(format!("{e:?}")))?;
    let image = bitmap.as_image();
    if image.width() == 0 || image.height() == 0 {
        return Err(RenderError::Empty(page_pdf.to_path_buf()));
    }

    debug!(
        "Rendered {} at {} DPI → {}x{} px",
        page_pdf.display(),
        dpi,
        image.width(),
        image.height()
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_display() {
        let e = RenderError::Empty(PathBuf::from("split_pdf/page_3.pdf"));
        assert_eq!(e.to_string(), "no image produced from 'split_pdf/page_3.pdf'");
    }

    #[tokio::test]
    async fn missing_file_is_an_error_not_a_panic() {
        // Fails either at binding (no libpdfium on the test host) or at load.
        let result = PdfiumRasterizer
            .render(Path::new("/definitely/not/here/page_1.pdf"), 300)
            .await;
        assert!(result.is_err());
    }
}
