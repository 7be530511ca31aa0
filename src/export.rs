//! Print and Word export.
//!
//! Print renders a standalone HTML page (title line + prayer body) and hands
//! it to the system opener, whose browser does the actual printing. Word
//! export builds the document with `docx_rust`.

use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use chrono::Local;
use docx_rust::document::{Paragraph, Run};
use docx_rust::formatting::CharacterProperty;
use docx_rust::Docx;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::prayer::{document_title, Audience, ServiceType, Style};

pub const DEFAULT_DOCX_NAME: &str = "기도문.docx";

// Run sizes in half-points: 14pt heading, 10pt metadata, 12pt body.
const HEADING_SIZE: u8 = 28;
const METADATA_SIZE: u8 = 20;
const BODY_SIZE: u8 = 24;

pub const PRINT_FAILED: &str = "인쇄 중 오류가 발생했습니다.";
pub const OPEN_FAILED: &str = "인쇄 페이지를 열지 못했습니다.";
pub const WORD_FAILED: &str = "Word 파일 저장 중 오류가 발생했습니다.";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to build document: {0}")]
    Docx(#[from] docx_rust::DocxError),
    #[error("failed to launch {command}: {source}")]
    Open {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with {status}")]
    Opener { command: String, status: ExitStatus },
}

/// The fields every exported document carries.
#[derive(Debug, Clone)]
pub struct PrayerDocument<'a> {
    pub content: &'a str,
    pub service_type: ServiceType,
    pub style: Style,
    pub audience: Audience,
    pub length: u8,
    /// Date shown in the title; today when `None`.
    pub date: Option<String>,
}

impl PrayerDocument<'_> {
    pub fn title(&self) -> String {
        let date = self
            .date
            .clone()
            .unwrap_or_else(|| Local::now().format("%Y-%m-%d").to_string());
        document_title(&date, self.service_type, self.style, self.audience, self.length)
    }

    /// File-system friendly stem derived from the title.
    pub fn file_stem(&self) -> String {
        self.title()
            .replace(" | ", "_")
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':' | '|') { '-' } else { c })
            .collect()
    }
}

pub fn render_print_html(doc: &PrayerDocument<'_>) -> String {
    let title = escape_html(&doc.title());
    let body = escape_html(doc.content);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <title>{title}</title>
  <style>
    @media print {{
      @page {{ margin: 2.54cm; }}
    }}
    body {{
      font-family: "바탕", Batang, serif;
      line-height: 1.8;
      margin: 0;
      padding: 20px;
    }}
    .filename {{
      font-size: 14pt;
      margin-bottom: 30px;
      text-align: center;
      border-bottom: 1px solid #000;
      padding-bottom: 10px;
    }}
    .prayer {{
      white-space: pre-wrap;
      font-size: 12pt;
    }}
  </style>
</head>
<body onload="window.print()">
  <div class="filename">{title}</div>
  <div class="prayer">{body}</div>
</body>
</html>
"#
    )
}

/// Write the print page into `dir`. Returns the written path.
pub fn print(doc: &PrayerDocument<'_>, dir: &Path) -> Result<PathBuf, ExportError> {
    let path = dir.join(format!("{}.html", doc.file_stem()));
    write_file(&path, render_print_html(doc).as_bytes())?;
    info!("Print page written to {}", path.display());
    Ok(path)
}

/// Hand `path` to the system opener and wait for it to return.
pub fn open_with(command: &str, path: &Path) -> Result<(), ExportError> {
    debug!("Opening {} with {command}", path.display());
    let status = Command::new(command)
        .arg(path)
        .status()
        .map_err(|source| ExportError::Open {
            command: command.to_string(),
            source,
        })?;
    if !status.success() {
        return Err(ExportError::Opener {
            command: command.to_string(),
            status,
        });
    }
    Ok(())
}

/// Write a .docx for the prayer. Returns the written path.
pub fn save_to_word(doc: &PrayerDocument<'_>, path: &Path) -> Result<PathBuf, ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_docx(file, doc)?;
    info!("Word document written to {}", path.display());
    Ok(path.to_path_buf())
}

pub fn write_docx<W: Write + Seek>(writer: W, doc: &PrayerDocument<'_>) -> Result<W, ExportError> {
    let mut docx = build_docx(doc);
    Ok(docx.write(writer)?)
}

/// Heading, metadata block, then one paragraph per prayer line.
fn build_docx<'a>(doc: &PrayerDocument<'a>) -> Docx<'a> {
    let mut docx = Docx::default();

    docx.document.push(paragraph("📄 기도문", HEADING_SIZE, true));
    docx.document.push(Paragraph::default());

    for line in [
        format!("예배 종류: {}", doc.service_type),
        format!("스타일: {}", doc.style),
        format!("대상자: {}", doc.audience),
        format!("길이: {}분", doc.length),
    ] {
        docx.document.push(paragraph(line, METADATA_SIZE, false));
    }
    docx.document.push(Paragraph::default());

    for line in doc.content.lines() {
        if line.is_empty() {
            docx.document.push(Paragraph::default());
        } else {
            docx.document.push(paragraph(line, BODY_SIZE, false));
        }
    }
    docx
}

fn paragraph<'a>(text: impl Into<docx_rust::document::Text<'a>>, size: u8, bold: bool) -> Paragraph<'a> {
    let mut property = CharacterProperty::default().size(size);
    if bold {
        property = property.bold(true);
    }
    Paragraph::default().push(Run::default().property(property).push_text(text))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, bytes).map_err(|source| {
        warn!("Failed to write {}: {source}", path.display());
        ExportError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}
