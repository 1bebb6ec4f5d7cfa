//! Document format detection and text extraction.
//!
//! Each supported format is a [`DocumentFormat`] variant paired with its loader. Loaders work on
//! the staged upload file and are synchronous; callers run them on the blocking pool.

mod upload;

pub use upload::StagedUpload;

use std::path::Path;
use thiserror::Error;

/// Errors produced while turning an uploaded file into plain text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The file could not be read from the staging area.
    #[error("Failed to read uploaded file: {0}")]
    Io(#[from] std::io::Error),
    /// PDF parsing failed.
    #[error("Failed to extract text from PDF: {0}")]
    Pdf(String),
    /// DOCX parsing failed.
    #[error("Failed to extract text from DOCX: {0}")]
    Docx(String),
    /// Plain-text upload was not valid UTF-8.
    #[error("Text file is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Upload formats accepted by the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word-processing document.
    Docx,
    /// UTF-8 plain text.
    Txt,
}

impl DocumentFormat {
    /// Select a format from a file name's extension, ignoring case.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, extension) = filename.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }

    /// Canonical lowercase extension for the format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
        }
    }

    /// Extract the document's text from a file on disk.
    pub fn extract_text(self, path: &Path) -> Result<String, ExtractionError> {
        let text = match self {
            Self::Pdf => extract_pdf(path)?,
            Self::Docx => extract_docx(path)?,
            Self::Txt => extract_txt(path)?,
        };
        tracing::debug!(
            format = self.extension(),
            chars = text.chars().count(),
            "Extracted document text"
        );
        Ok(text)
    }
}

fn extract_pdf(path: &Path) -> Result<String, ExtractionError> {
    let raw =
        pdf_extract::extract_text(path).map_err(|error| ExtractionError::Pdf(error.to_string()))?;
    Ok(clean_pdf_text(&raw))
}

/// Drop NUL padding and trailing spaces that pdf-extract leaves at line ends.
fn clean_pdf_text(raw: &str) -> String {
    raw.replace('\0', "")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_docx(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path)?;
    let docx =
        docx_rs::read_docx(&bytes).map_err(|error| ExtractionError::Docx(error.to_string()))?;

    let mut blocks = Vec::new();
    for child in &docx.document.children {
        match child {
            docx_rs::DocumentChild::Paragraph(paragraph) => {
                blocks.push(paragraph_text(paragraph));
            }
            docx_rs::DocumentChild::Table(table) => blocks.push(table_text(table)),
            _ => {}
        }
    }

    // Blank line between blocks so the splitter sees paragraph boundaries.
    Ok(blocks.join("\n\n"))
}

fn paragraph_text(paragraph: &docx_rs::Paragraph) -> String {
    let mut line = String::new();
    push_paragraph_children(&paragraph.children, &mut line);
    line
}

fn push_paragraph_children(children: &[docx_rs::ParagraphChild], line: &mut String) {
    for child in children {
        match child {
            docx_rs::ParagraphChild::Run(run) => push_run(run, line),
            docx_rs::ParagraphChild::Hyperlink(link) => {
                push_paragraph_children(&link.children, line);
            }
            _ => {}
        }
    }
}

fn push_run(run: &docx_rs::Run, line: &mut String) {
    for child in &run.children {
        match child {
            docx_rs::RunChild::Text(text) => line.push_str(&text.text),
            docx_rs::RunChild::Tab(_) => line.push('\t'),
            docx_rs::RunChild::Break(_) => line.push('\n'),
            _ => {}
        }
    }
}

/// One line per row, cells separated by tabs.
fn table_text(table: &docx_rs::Table) -> String {
    let mut rows = Vec::new();
    for row in &table.rows {
        let docx_rs::TableChild::TableRow(row) = row;
        let mut cells = Vec::new();
        for cell in &row.cells {
            let docx_rs::TableRowChild::TableCell(cell) = cell;
            let text = cell
                .children
                .iter()
                .filter_map(|content| match content {
                    docx_rs::TableCellContent::Paragraph(paragraph) => {
                        Some(paragraph_text(paragraph))
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            cells.push(text);
        }
        rows.push(cells.join("\t"));
    }
    rows.join("\n")
}

fn extract_txt(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8(bytes)?;
    Ok(text
        .strip_prefix('\u{feff}')
        .map(str::to_string)
        .unwrap_or(text))
}
