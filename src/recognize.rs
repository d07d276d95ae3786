//! Text recognition engines.

use std::fs::read_to_string;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{exec::check_for_command_failure, normalize::NormalizedImage, prelude::*};

/// The extracted text for one page. Immutable once produced; accumulated in
/// page order into the document-level result.
#[derive(Clone, Debug)]
pub struct RecognitionResult {
    pub page_idx: usize,
    pub text: String,
}

/// Runs recognition over a normalized raster image.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &NormalizedImage) -> Result<RecognitionResult>;
}

/// Recognizer wrapping the `tesseract` CLI tool.
///
/// The trained-model data for `lang` must be installed where tesseract can
/// find it; provisioning the model is the operator's problem, not ours.
pub struct TesseractRecognizer {
    lang: String,
}

impl TesseractRecognizer {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    #[instrument(level = "debug", skip_all, fields(page = image.page_idx))]
    async fn recognize(&self, image: &NormalizedImage) -> Result<RecognitionResult> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        let output_path = tmpdir.path().join("output.txt");
        image
            .image
            .save(&input_path)
            .context("cannot write tesseract input file")?;

        // Run tesseract on the input file.
        let output = Command::new("tesseract")
            .arg(&input_path)
            .arg(output_path.with_extension(""))
            .arg("-l")
            .arg(&self.lang)
            .output()
            .await
            .context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output)?;

        // Read the output file.
        let text =
            read_to_string(&output_path).context("cannot read tesseract output file")?;
        Ok(RecognitionResult {
            page_idx: image.page_idx,
            text,
        })
    }
}
