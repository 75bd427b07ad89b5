//! Document conversion: source file → ordered text blocks with page labels.
//!
//! PDFs convert page by page and PPTX slide by slide, so each block carries
//! the 1-based label of the page it came from. DOCX, XLSX and plain text
//! have no stable page geometry and become a single block labeled `"1"`.
//! Blank pages are dropped; a file that yields no text at all is an error.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::models::TextBlock;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("could not read source: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("empty parse")]
    Empty,
}

/// Converts a source file into ordered text blocks.
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, path: &Path) -> Result<Vec<TextBlock>, ExtractError>;
}

/// Converter for the formats readable without external tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileConverter;

impl DocumentConverter for FileConverter {
    fn convert(&self, path: &Path) -> Result<Vec<TextBlock>, ExtractError> {
        let kind = SourceKind::from_path(path)?;
        let bytes = std::fs::read(path)?;
        let blocks = convert_bytes(&bytes, kind)?;
        if blocks.is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok(blocks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    PlainText,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(SourceKind::Pdf),
            "docx" => Ok(SourceKind::Docx),
            "pptx" => Ok(SourceKind::Pptx),
            "xlsx" => Ok(SourceKind::Xlsx),
            "txt" | "md" | "markdown" => Ok(SourceKind::PlainText),
            _ => Err(ExtractError::UnsupportedType(path.display().to_string())),
        }
    }
}

/// Convert in-memory bytes of a known kind. Blank blocks are removed.
pub fn convert_bytes(bytes: &[u8], kind: SourceKind) -> Result<Vec<TextBlock>, ExtractError> {
    let pages: Vec<String> = match kind {
        SourceKind::Pdf => extract_pdf_pages(bytes)?,
        SourceKind::Pptx => extract_pptx_slides(bytes)?,
        SourceKind::Docx => vec![extract_docx(bytes)?],
        SourceKind::Xlsx => vec![extract_xlsx(bytes)?],
        SourceKind::PlainText => vec![String::from_utf8_lossy(bytes).into_owned()],
    };

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| TextBlock::new(text.trim().to_string(), (i + 1).to_string()))
        .collect())
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Names of numbered parts like `ppt/slides/slide7.xml`, in numeric order.
fn numbered_parts(
    archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>,
    prefix: &str,
) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(String::from)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_elements(&xml, b"t", " ")
}

fn extract_pptx_slides(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_parts(&archive, "ppt/slides/slide") {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        slides.push(collect_text_elements(&xml, b"t", " ")?);
    }
    Ok(slides)
}

/// Concatenate the text content of every `<*:local>` element.
fn collect_text_elements(xml: &[u8], local: &[u8], sep: &str) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut parts: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut inside = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == local => inside = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == local => inside = false,
            Ok(Event::Text(te)) if inside => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                if !text.is_empty() {
                    parts.push(text.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(parts.join(sep))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let has_shared = archive
        .file_names()
        .any(|n| n == "xl/sharedStrings.xml");
    let shared_strings = if has_shared {
        read_shared_strings(&read_zip_entry_bounded(
            &mut archive,
            "xl/sharedStrings.xml",
        )?)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for name in numbered_parts(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        sheets.push(extract_sheet_cells(&xml, &shared_strings)?);
    }
    Ok(sheets.join("\n"))
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    let text = te
                        .unescape()
                        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut shared = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_v => {
                let raw = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                let value = raw.trim();
                if shared {
                    if let Some(s) = value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                    {
                        cells.push(s.clone());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => shared = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = SourceKind::from_path(Path::new("archive.tar.gz")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(_)));
        assert_eq!(
            SourceKind::from_path(Path::new("Report.PDF")).unwrap(),
            SourceKind::Pdf
        );
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = convert_bytes(b"not a pdf", SourceKind::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn plain_text_is_one_block_on_page_one() {
        let blocks = convert_bytes(b"  hello corpus \n", SourceKind::PlainText).unwrap();
        assert_eq!(blocks, vec![TextBlock::new("hello corpus", "1")]);
    }

    #[test]
    fn blank_text_converts_to_nothing() {
        let blocks = convert_bytes(b"   \n\n", SourceKind::PlainText).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn pptx_slides_keep_their_numbers() {
        let slide = |t: &str| {
            format!(
                "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
                t
            )
        };
        let s1 = slide("first slide");
        let s10 = slide("tenth slide");
        let s2 = slide("");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide1.xml", &s1),
            ("ppt/slides/slide2.xml", &s2),
        ]);

        let blocks = convert_bytes(&bytes, SourceKind::Pptx).unwrap();
        assert_eq!(
            blocks,
            vec![
                TextBlock::new("first slide", "1"),
                TextBlock::new("tenth slide", "3"),
            ]
        );
    }

    #[test]
    fn docx_text_runs_are_joined() {
        let xml = "<w:document xmlns:w=\"w\"><w:body><w:p><w:r><w:t>Service</w:t></w:r><w:r><w:t>Agreement</w:t></w:r></w:p></w:body></w:document>";
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let blocks = convert_bytes(&bytes, SourceKind::Docx).unwrap();
        assert_eq!(blocks, vec![TextBlock::new("Service Agreement", "1")]);
    }

    #[test]
    fn xlsx_resolves_shared_strings() {
        let shared = "<sst><si><t>Revenue</t></si><si><t>Q1</t></si></sst>";
        let sheet = "<worksheet><sheetData><row><c t=\"s\"><v>1</v></c><c t=\"s\"><v>0</v></c><c><v>42</v></c></row></sheetData></worksheet>";
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let blocks = convert_bytes(&bytes, SourceKind::Xlsx).unwrap();
        assert_eq!(blocks, vec![TextBlock::new("Q1 Revenue 42", "1")]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = FileConverter
            .convert(Path::new("/definitely/not/here.txt"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }
}
