//! The on-device OCR pipeline: rasterize → normalize → recognize.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::{
    document::Document,
    error::OffloadError,
    normalize::normalize,
    prelude::*,
    raster::{PageRasterizer, PopplerRasterizer, RasterOptions},
    recognize::{RecognitionResult, TesseractRecognizer, TextRecognizer},
};

/// Matches runs of characters outside the alphanumeric output alphabet.
static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^A-Za-z0-9]+").expect("failed to compile regex"));

/// The text produced by one run, local or remote.
#[derive(Clone, Debug)]
pub struct OcrText {
    pub text: String,
    /// Pages that contributed text.
    pub pages_ok: usize,
    /// Pages in the document.
    pub page_count: usize,
}

impl OcrText {
    pub fn is_complete(&self) -> bool {
        self.pages_ok == self.page_count
    }
}

/// Composes rasterization, normalization and recognition across every page of
/// a document, strictly in page order. Downstream consumers depend on reading
/// order, so pages are never processed concurrently.
pub struct LocalOcrPipeline {
    rasterizer: Arc<dyn PageRasterizer>,
    recognizer: Arc<dyn TextRecognizer>,
    raster_options: RasterOptions,
    lang: String,
}

impl LocalOcrPipeline {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        recognizer: Arc<dyn TextRecognizer>,
        raster_options: RasterOptions,
        lang: impl Into<String>,
    ) -> Self {
        Self {
            rasterizer,
            recognizer,
            raster_options,
            lang: lang.into(),
        }
    }

    /// Production wiring: Poppler for rendering, tesseract for recognition.
    pub fn with_poppler_and_tesseract(
        raster_options: RasterOptions,
        lang: impl Into<String>,
    ) -> Self {
        let lang = lang.into();
        Self::new(
            Arc::new(PopplerRasterizer::new()),
            Arc::new(TesseractRecognizer::new(lang.clone())),
            raster_options,
            lang,
        )
    }

    /// OCR every page of `document` and post-process the concatenated text.
    ///
    /// A page that fails to render, normalize or recognize contributes no
    /// text and is logged; processing continues with the next page. That skip
    /// policy is deliberate: one bad scan must not throw away the rest of the
    /// document. The document handle is consumed, so its temporary render
    /// files are removed on every exit path.
    #[instrument(level = "debug", skip_all, fields(path = %document.path().display()))]
    pub async fn run(&self, document: Document) -> Result<OcrText, OffloadError> {
        let page_count = document.page_count();
        let mut raw = String::new();
        let mut pages_ok = 0;

        for page_idx in 0..page_count {
            match self.ocr_page(&document, page_idx).await {
                Ok(result) => {
                    raw.push_str(&result.text);
                    raw.push('\n');
                    pages_ok += 1;
                }
                Err(err) => {
                    warn!(page = page_idx, "skipping page: {err:?}");
                }
            }
        }

        let text = postprocess(&raw, &self.lang);
        Ok(OcrText {
            text,
            pages_ok,
            page_count,
        })
    }

    async fn ocr_page(
        &self,
        document: &Document,
        page_idx: usize,
    ) -> Result<RecognitionResult> {
        let raster = self
            .rasterizer
            .render_page(document, page_idx, &self.raster_options)
            .await?;
        let normalized = normalize(&raster)?;
        self.recognizer.recognize(&normalized).await
    }
}

/// Post-process concatenated page text.
///
/// For alphanumeric-only languages, every run of characters outside
/// `[A-Za-z0-9]` collapses to a single space. All languages get trimmed.
fn postprocess(raw: &str, lang: &str) -> String {
    let filtered = if lang.eq_ignore_ascii_case("eng") {
        NON_ALPHANUMERIC.replace_all(raw, " ").into_owned()
    } else {
        raw.to_owned()
    };
    filtered.trim().to_owned()
}
