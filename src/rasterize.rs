//! Document to page-image conversion backed by poppler's `pdftoppm`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::model::Page;
use crate::util::{safe_file_stem, scratch_dir};

pub const DEFAULT_DPI: u32 = 200;

const OUTPUT_PREFIX: &str = "page";

pub trait Rasterizer {
    /// Every page of the document, in document order.
    fn rasterize(&self, document: &Path) -> Result<Vec<Page>>;

    /// Pages `first..=last` (zero-based) of the document.
    fn rasterize_range(&self, document: &Path, first: u32, last: u32) -> Result<Vec<Page>>;

    /// Render resolution in dots per inch.
    fn dpi(&self) -> u32;
}

#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: PathBuf,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self {
            program: PathBuf::from("pdftoppm"),
            dpi,
        }
    }

    /// Uses a specific `pdftoppm` binary instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, document: &Path, range: Option<(u32, u32)>) -> Result<Vec<Page>> {
        File::open(document)
            .map_err(|err| PipelineError::source_unreadable(document, err.to_string()))?;

        let label = document_label(document);
        let work_dir = scratch_dir("pageseek_raster", &safe_file_stem(document));
        fs::create_dir_all(&work_dir).map_err(|err| {
            PipelineError::source_unreadable(
                document,
                format!("failed to create {}: {err}", work_dir.display()),
            )
        })?;

        let result = self.render_into(document, range, &work_dir, &label);
        let _ = fs::remove_dir_all(&work_dir);
        result
    }

    fn render_into(
        &self,
        document: &Path,
        range: Option<(u32, u32)>,
        work_dir: &Path,
        label: &str,
    ) -> Result<Vec<Page>> {
        let mut command = Command::new(&self.program);
        command.arg("-r").arg(self.dpi.to_string()).arg("-png");
        if let Some((first, last)) = range {
            command
                .arg("-f")
                .arg((first + 1).to_string())
                .arg("-l")
                .arg((last + 1).to_string());
        }
        command.arg(document).arg(work_dir.join(OUTPUT_PREFIX));

        debug!(program = %self.program.display(), document = %document.display(), dpi = self.dpi, "running rasterizer");
        let output = command.output().map_err(|err| {
            PipelineError::source_unreadable(
                document,
                format!("failed to execute {}: {err}", self.program.display()),
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::source_unreadable(
                document,
                format!(
                    "{} returned non-zero exit status: {}",
                    self.program.display(),
                    stderr.trim()
                ),
            ));
        }

        let rendered = collect_rendered_pages(work_dir)
            .map_err(|err| PipelineError::source_unreadable(document, err.to_string()))?;
        if rendered.is_empty() {
            return Err(PipelineError::source_unreadable(
                document,
                "rasterizer produced no pages",
            ));
        }

        let mut pages = Vec::with_capacity(rendered.len());
        for (page_number, path) in rendered {
            let image = fs::read(&path).map_err(|err| {
                PipelineError::source_unreadable(
                    document,
                    format!("failed to read {}: {err}", path.display()),
                )
            })?;
            pages.push(Page {
                index: page_number.saturating_sub(1),
                image,
                label: label.to_string(),
            });
        }

        info!(
            document = %document.display(),
            pages = pages.len(),
            dpi = self.dpi,
            "document rasterized"
        );
        Ok(pages)
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new(DEFAULT_DPI)
    }
}

impl Rasterizer for PdftoppmRasterizer {
    fn rasterize(&self, document: &Path) -> Result<Vec<Page>> {
        self.run(document, None)
    }

    fn rasterize_range(&self, document: &Path, first: u32, last: u32) -> Result<Vec<Page>> {
        if first > last {
            return Ok(Vec::new());
        }
        self.run(document, Some((first, last)))
    }

    fn dpi(&self) -> u32 {
        self.dpi
    }
}

/// Label attached to every page: the document's base file name.
pub fn document_label(document: &Path) -> String {
    document
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| document.display().to_string())
}

/// Rendered `page-<n>.png` files sorted by their one-based page number.
///
/// pdftoppm zero-pads the number to the width of the page count, so the
/// numeric value is parsed rather than relying on lexical order.
fn collect_rendered_pages(work_dir: &Path) -> std::io::Result<Vec<(u32, PathBuf)>> {
    let pattern = Regex::new(&format!(r"^{OUTPUT_PREFIX}-(\d+)\.png$"))
        .map_err(|err| std::io::Error::other(err.to_string()))?;

    let mut pages = Vec::new();
    for entry in fs::read_dir(work_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(number) = pattern
            .captures(name)
            .and_then(|captures| captures.get(1))
            .and_then(|value| value.as_str().parse::<u32>().ok())
        else {
            continue;
        };
        pages.push((number, path));
    }

    pages.sort_by_key(|(number, _)| *number);
    Ok(pages)
}

/// First line of `pdftoppm -v`, if the tool is installed.
pub fn pdftoppm_version() -> Option<String> {
    let output = Command::new("pdftoppm").arg("-v").output().ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_rendered_pages_orders_numerically() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["page-10.png", "page-02.png", "page-1.png", "notes.txt", "page-x.png"] {
            fs::write(dir.path().join(name), b"png").expect("write");
        }

        let pages = collect_rendered_pages(dir.path()).expect("collect");
        let numbers = pages.iter().map(|(number, _)| *number).collect::<Vec<u32>>();
        assert_eq!(numbers, vec![1, 2, 10]);
    }

    #[test]
    fn document_label_is_base_file_name() {
        assert_eq!(document_label(Path::new("/books/strom.pdf")), "strom.pdf");
    }

    #[test]
    fn missing_document_is_source_unreadable() {
        let rasterizer = PdftoppmRasterizer::default();
        let err = rasterizer
            .rasterize(Path::new("/definitely/not/here.pdf"))
            .expect_err("missing file");
        assert!(matches!(err, PipelineError::SourceUnreadable { .. }));
    }

    #[test]
    fn missing_rasterizer_program_is_source_unreadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let document = dir.path().join("doc.pdf");
        fs::write(&document, b"%PDF-1.4").expect("write");

        let rasterizer = PdftoppmRasterizer::new(72).with_program(dir.path().join("no-such-tool"));
        let err = rasterizer.rasterize(&document).expect_err("no program");
        assert!(matches!(err, PipelineError::SourceUnreadable { .. }));
    }
}
