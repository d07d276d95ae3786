//! Loaded-document handles.

use std::fs;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{error::OffloadError, exec::check_for_command_failure, prelude::*};

/// An opaque handle to a loaded PDF with a known page count.
///
/// The handle owns a scratch directory for per-page render output. Whichever
/// pipeline runs the document takes the handle by value, and dropping it
/// removes the scratch directory and every temporary file in it, on every
/// exit path. There is no way to "close" a document twice.
#[derive(Debug)]
pub struct Document {
    path: PathBuf,
    page_count: usize,
    file_size: u64,
    scratch: tempfile::TempDir,
}

impl Document {
    /// Load a PDF from `path`.
    ///
    /// Verifies the file really is a PDF, records its size, and counts pages
    /// with `pdfinfo`.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, OffloadError> {
        let kind = infer::get_from_path(path).map_err(|err| {
            OffloadError::io(anyhow!("cannot read {}: {}", path.display(), err))
        })?;
        match kind {
            Some(kind) if kind.mime_type() == "application/pdf" => {}
            _ => {
                return Err(OffloadError::io(anyhow!(
                    "{} is not a PDF file",
                    path.display()
                )));
            }
        }

        let file_size = fs::metadata(path)
            .map_err(|err| {
                OffloadError::io(anyhow!("cannot stat {}: {}", path.display(), err))
            })?
            .len();
        let page_count = pdf_page_count(path).await.map_err(OffloadError::io)?;
        Self::from_parts(path.to_owned(), page_count, file_size)
    }

    /// Build a handle from already-known parts. `open` is the normal entry
    /// point; this exists so tests can construct documents without `pdfinfo`.
    pub(crate) fn from_parts(
        path: PathBuf,
        page_count: usize,
        file_size: u64,
    ) -> Result<Self, OffloadError> {
        let scratch = tempfile::TempDir::with_prefix("ocr-offload")?;
        Ok(Self {
            path,
            page_count,
            file_size,
            scratch,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Size of the underlying PDF file, in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Directory for temporary render output tied to this document's
    /// lifetime.
    pub(crate) fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Opens document handles for a batch of runs.
///
/// Each iteration opens its own handle, so this is the seam the batch driver
/// goes through; tests substitute sources that never touch `pdfinfo`.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Document, OffloadError>;
}

/// [`DocumentSource`] reading real PDF files from disk.
pub struct FsDocumentSource;

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn open(&self, path: &Path) -> Result<Document, OffloadError> {
        Document::open(path).await
    }
}

/// Get the number of pages in a PDF file, via `pdfinfo`.
async fn pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output)?;

    let stdout =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_page_count(&stdout)
        .with_context(|| format!("failed to find page count for {:?}", path.display()))
}

/// Pull the `Pages:` property out of `pdfinfo` output.
fn parse_page_count(pdfinfo_output: &str) -> Result<usize> {
    for line in pdfinfo_output.lines() {
        if let Some(value) = line.strip_prefix("Pages:") {
            return value
                .trim()
                .parse::<usize>()
                .context("page count was not a number");
        }
    }
    Err(anyhow!("no Pages property in pdfinfo output"))
}
