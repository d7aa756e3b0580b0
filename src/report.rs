//! Report rendering.
//!
//! A report is an H1 title, a bulleted metadata block, the model's analysis
//! verbatim and a fixed disclaimer footer. The PDF path goes through HTML
//! and flattens every non-blank HTML line into one plain paragraph: headings,
//! lists and tables all share the same paragraph style.

use std::io::BufWriter;

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use pulldown_cmark::{html, Options, Parser};
use serde_json::Value;

pub const REPORT_TITLE: &str = "Ophthalmology Clinical Interpretation Report";
pub const EXAMINATION_KIND: &str = "Full Eye Examination";
pub const MISSING_IDENTIFIER: &str = "NOT FOUND";

pub const DISCLAIMER: &str = "This document is auto-generated for clinician-to-clinician decision support.  \nIt does not replace independent medical judgment.";

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_LEFT_MM: f32 = 20.0;
const MARGIN_TOP_MM: f32 = 277.0;
const MARGIN_BOTTOM_MM: f32 = 20.0;
const FONT_SIZE_PT: f32 = 10.0;
const LINE_HEIGHT_MM: f32 = 5.0;
const PARAGRAPH_GAP_MM: f32 = 2.5;
const WRAP_CHARS: usize = 90;

/// Output format requested on the export route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Pdf,
}

impl ReportFormat {
    /// `None` and `md` select markdown; any value other than `pdf` is rejected.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw {
            None | Some("md") => Some(ReportFormat::Markdown),
            Some("pdf") => Some(ReportFormat::Pdf),
            Some(_) => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Pdf => "pdf",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("PDF generation failed: {0}")]
    Pdf(String),
}

/// Write-once report. Everything except `generated_at` is caller data, so
/// rendering is deterministic for a fixed timestamp.
#[derive(Debug, Clone)]
pub struct ReportDocument {
    pub title: String,
    pub metadata: Vec<(String, String)>,
    pub body: String,
    pub generated_at: DateTime<Utc>,
}

impl ReportDocument {
    pub fn new(
        title: impl Into<String>,
        metadata: Vec<(String, String)>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            metadata,
            body: body.into(),
            generated_at: Utc::now(),
        }
    }

    /// ISO-8601 without offset. The fraction is six digits, or left out
    /// entirely when the microsecond is zero.
    pub fn timestamp(&self) -> String {
        if self.generated_at.timestamp_subsec_micros() == 0 {
            self.generated_at.format("%Y-%m-%dT%H:%M:%S").to_string()
        } else {
            self.generated_at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
        }
    }

    pub fn to_markdown(&self) -> String {
        let meta_block = self
            .metadata
            .iter()
            .map(|(k, v)| format!("- **{}**: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "# {title}\n\n{meta}\n\n---\n\n{body}\n\n---\n\n### Disclaimer\n{disclaimer}\n\nGenerated on: {ts} UTC\n",
            title = self.title,
            meta = meta_block,
            body = self.body,
            disclaimer = DISCLAIMER,
            ts = self.timestamp(),
        )
    }
}

/// Report for the export route: fixed title, patient/case identifiers from
/// the payload and the examination kind.
pub fn examination_report(payload: &Value, analysis: &str) -> ReportDocument {
    let id = |key: &str| identifier(payload, key).unwrap_or_else(|| MISSING_IDENTIFIER.to_string());
    ReportDocument::new(
        REPORT_TITLE,
        vec![
            ("Patient ID".to_string(), id("patient_id")),
            ("Case ID".to_string(), id("case_id")),
            ("Examination".to_string(), EXAMINATION_KIND.to_string()),
        ],
        analysis,
    )
}

/// Text form of a top-level payload field. Strings are taken verbatim, other
/// scalars and containers use their JSON text; `null` counts as absent.
pub fn identifier(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPdf {
    pub bytes: Vec<u8>,
    pub paragraphs: usize,
    pub pages: usize,
}

pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Non-blank HTML lines, each rendered as one paragraph.
pub fn paragraph_segments(html: &str) -> Vec<&str> {
    html.lines().filter(|line| !line.trim().is_empty()).collect()
}

pub fn markdown_to_pdf(markdown: &str, title: &str) -> Result<RenderedPdf, RenderError> {
    let html = markdown_to_html(markdown);
    let paragraphs: Vec<String> = paragraph_segments(&html)
        .into_iter()
        .map(visible_text)
        .collect();

    let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?;

    let mut current = doc.get_page(page).get_layer(layer);
    let mut pages = 1;
    let mut y = MARGIN_TOP_MM;
    for paragraph in &paragraphs {
        for line in wrap_text(paragraph, WRAP_CHARS) {
            if y < MARGIN_BOTTOM_MM {
                pages += 1;
                let (page, layer) = doc.add_page(
                    Mm(PAGE_WIDTH_MM),
                    Mm(PAGE_HEIGHT_MM),
                    format!("Layer {}", pages),
                );
                current = doc.get_page(page).get_layer(layer);
                y = MARGIN_TOP_MM;
            }
            if !line.is_empty() {
                current.use_text(line, FONT_SIZE_PT, Mm(MARGIN_LEFT_MM), Mm(y), &font);
            }
            y -= LINE_HEIGHT_MM;
        }
        y -= PARAGRAPH_GAP_MM;
    }

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| RenderError::Pdf(format!("save error: {e}")))?;
    let bytes = buf
        .into_inner()
        .map_err(|e| RenderError::Pdf(format!("buffer error: {e}")))?;

    Ok(RenderedPdf {
        bytes,
        paragraphs: paragraphs.len(),
        pages,
    })
}

/// Drop markup tags and decode the entities the HTML writer emits.
fn visible_text(segment: &str) -> String {
    let mut text = String::with_capacity(segment.len());
    let mut in_tag = false;
    for ch in segment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.chars().count() + word.chars().count() + 1 > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
