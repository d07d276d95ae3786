//! Page rasterization, using Poppler's `pdftocairo` CLI tool.

use async_trait::async_trait;
use clap::{Args, ValueEnum};
use tokio::process::Command;

use crate::{document::Document, exec::check_for_command_failure, prelude::*};

/// Color format for rendered pages.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum ColorMode {
    /// Full-color rendering.
    #[default]
    Color,
    /// Grayscale rendering. Smaller temp files, and most OCR engines don't
    /// care.
    Gray,
}

/// Options controlling page rasterization.
#[derive(Args, Clone, Debug)]
pub struct RasterOptions {
    /// The resolution to use when rendering pages.
    #[clap(long, default_value = "300")]
    pub dpi: u32,

    /// The color format of rendered pages.
    #[clap(long, value_enum, default_value_t = ColorMode::Color)]
    pub color_mode: ColorMode,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            dpi: 300,
            color_mode: ColorMode::Color,
        }
    }
}

/// One rendered page, stored as a temporary image file in the owning
/// document's scratch directory. Consumed by normalization and then
/// forgotten; the file itself is removed when the document handle drops.
#[derive(Debug)]
pub struct RasterPage {
    pub page_idx: usize,
    pub path: PathBuf,
}

/// Renders one page of a loaded document to a raster image.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn render_page(
        &self,
        document: &Document,
        page_idx: usize,
        options: &RasterOptions,
    ) -> Result<RasterPage>;
}

/// [`PageRasterizer`] backed by `pdftocairo`.
#[non_exhaustive]
pub struct PopplerRasterizer {}

impl PopplerRasterizer {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl PageRasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(page = page_idx, dpi = options.dpi))]
    async fn render_page(
        &self,
        document: &Document,
        page_idx: usize,
        options: &RasterOptions,
    ) -> Result<RasterPage> {
        // pdftocairo uses 1-based, inclusive page ranges.
        let page_number = page_idx + 1;
        let out_prefix = document
            .scratch_dir()
            .join(format!("render-{page_idx:05}"));

        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(options.dpi.to_string())
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string());
        if options.color_mode == ColorMode::Gray {
            cmd.arg("-gray");
        }
        let output = cmd
            .arg(document.path())
            .arg(&out_prefix)
            .output()
            .await
            .with_context(|| {
                format!("failed to run pdftocairo on {:?}", document.path().display())
            })?;
        check_for_command_failure("pdftocairo", &output)?;

        // With -singlefile, pdftocairo writes exactly `<prefix>.png`.
        let path = out_prefix.with_extension("png");
        if !path.is_file() {
            return Err(anyhow!(
                "pdftocairo produced no output for page {} of {:?}",
                page_idx,
                document.path().display()
            ));
        }
        Ok(RasterPage { page_idx, path })
    }
}
