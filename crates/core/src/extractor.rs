use crate::config::HttpConfig;
use crate::error::IngestError;
use crate::http::{build_client, send_with_retry};
use async_trait::async_trait;
use lopdf::Document;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

const PDF_SIGNATURE: &[u8] = b"%PDF-";
const PDF_CONTENT_TYPES: [&str; 3] = [
    "application/pdf",
    "binary/octet-stream",
    "application/octet-stream",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedPdf {
    pub checksum: String,
    pub byte_len: usize,
    pub strategy: &'static str,
    pub pages: Vec<PageText>,
}

/// Why a source produced no text. None of these are errors to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoTextReason {
    InvalidUrl(String),
    Transport(String),
    EmptyResponse,
    NotPdf { content_type: String },
    Unreadable(String),
}

impl fmt::Display for NoTextReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoTextReason::InvalidUrl(raw) => write!(f, "source url could not be resolved: {raw}"),
            NoTextReason::Transport(details) => write!(f, "download failed: {details}"),
            NoTextReason::EmptyResponse => write!(f, "downloaded file is empty"),
            NoTextReason::NotPdf { content_type } => {
                write!(f, "not a valid PDF file (content type '{content_type}')")
            }
            NoTextReason::Unreadable(details) => write!(f, "no readable text: {details}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Extraction {
    Pages(ExtractedPdf),
    NoText(NoTextReason),
}

pub trait PdfExtractor {
    fn name(&self) -> &'static str;
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// Secondary parser with its own content-stream interpreter.
#[derive(Default)]
pub struct PdfExtractExtractor;

impl PdfExtractor for PdfExtractExtractor {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        // pdf-extract panics on some malformed inputs.
        let extracted = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_by_pages(path)))
            .map_err(|_| IngestError::PdfParse("pdf-extract panicked".to_string()))?
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let pages = extracted
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(index, text)| PageText {
                number: (index + 1) as u32,
                text,
            })
            .collect::<Vec<_>>();

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// Runs lopdf and falls back to pdf-extract. Returns the pages and the name
/// of the parser that won.
pub fn extract_page_texts(path: &Path) -> Result<(Vec<PageText>, &'static str), IngestError> {
    extract_with(&LopdfExtractor, &PdfExtractExtractor, path)
}

/// Runs `primary` and falls back to `secondary` when it fails or finds nothing.
pub fn extract_with(
    primary: &dyn PdfExtractor,
    secondary: &dyn PdfExtractor,
    path: &Path,
) -> Result<(Vec<PageText>, &'static str), IngestError> {
    let primary_error = match primary.extract_pages(path) {
        Ok(pages) => return Ok((pages, primary.name())),
        Err(error) => error,
    };

    warn!(
        parser = primary.name(),
        error = %primary_error,
        "primary extraction failed, trying fallback parser"
    );
    match secondary.extract_pages(path) {
        Ok(pages) => Ok((pages, secondary.name())),
        Err(fallback_error) => Err(IngestError::PdfParse(format!(
            "{primary_error}; fallback extraction also failed: {fallback_error}"
        ))),
    }
}

fn extract_from_bytes(bytes: &[u8]) -> Result<(Vec<PageText>, &'static str), IngestError> {
    extract_from_bytes_in(&std::env::temp_dir(), bytes)
}

/// Copies `bytes` into a scratch file for the parsers. The file is removed
/// when `scratch` drops, on every return path.
fn extract_from_bytes_in(
    dir: &Path,
    bytes: &[u8],
) -> Result<(Vec<PageText>, &'static str), IngestError> {
    let mut scratch = tempfile::Builder::new()
        .prefix("pdf-qa-")
        .suffix(".pdf")
        .tempfile_in(dir)?;
    scratch.write_all(bytes)?;
    scratch.flush()?;
    debug!(path = %scratch.path().display(), bytes = bytes.len(), "wrote scratch pdf");

    extract_page_texts(scratch.path())
}

pub fn looks_like_pdf(content_type: &str, bytes: &[u8]) -> bool {
    let lowered = content_type.to_lowercase();
    PDF_CONTENT_TYPES
        .iter()
        .any(|accepted| lowered.contains(accepted))
        || bytes.starts_with(PDF_SIGNATURE)
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Where ingestion gets page text from.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn extract(&self, url: &Url) -> Extraction;
}

/// Downloads PDFs over HTTP and extracts their page text.
pub struct PdfTextSource {
    client: Client,
    max_retries: u32,
}

impl PdfTextSource {
    pub fn new(http: &HttpConfig) -> Result<Self, IngestError> {
        Ok(Self {
            client: build_client(http)?,
            max_retries: http.max_retries,
        })
    }

    async fn download(&self, url: &Url) -> Result<(String, Vec<u8>), NoTextReason> {
        let response = send_with_retry("pdf download", self.max_retries, || {
            self.client.get(url.clone())
        })
        .await
        .map_err(|error| NoTextReason::Transport(error.to_string()))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|error| NoTextReason::Transport(error.to_string()))?;

        Ok((content_type, bytes.to_vec()))
    }
}

#[async_trait]
impl TextSource for PdfTextSource {
    async fn extract(&self, url: &Url) -> Extraction {
        info!(%url, "downloading pdf");
        let (content_type, bytes) = match self.download(url).await {
            Ok(downloaded) => downloaded,
            Err(reason) => return Extraction::NoText(reason),
        };

        if bytes.is_empty() {
            return Extraction::NoText(NoTextReason::EmptyResponse);
        }

        if !looks_like_pdf(&content_type, &bytes) {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(PDF_SIGNATURE.len())]).to_string();
            warn!(%url, content_type = %content_type, head = %head, "response is not a pdf");
            return Extraction::NoText(NoTextReason::NotPdf { content_type });
        }

        let checksum = digest_bytes(&bytes);
        let byte_len = bytes.len();
        let parsed = tokio::task::spawn_blocking(move || extract_from_bytes(&bytes)).await;

        match parsed {
            Ok(Ok((pages, strategy))) => {
                info!(%url, pages = pages.len(), strategy, checksum = %checksum, "extracted pdf text");
                Extraction::Pages(ExtractedPdf {
                    checksum,
                    byte_len,
                    strategy,
                    pages,
                })
            }
            Ok(Err(error)) => Extraction::NoText(NoTextReason::Unreadable(error.to_string())),
            Err(join_error) => Extraction::NoText(NoTextReason::Unreadable(join_error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pdf_with_pages;
    use httpmock::{Method::GET, MockServer};
    use std::fs;

    fn source() -> PdfTextSource {
        let http = HttpConfig {
            max_retries: 0,
            ..HttpConfig::default()
        };
        PdfTextSource::new(&http).expect("source")
    }

    #[test]
    fn pdf_detection_accepts_content_type_or_signature() {
        assert!(looks_like_pdf("application/pdf", b"anything"));
        assert!(looks_like_pdf("Binary/Octet-Stream", b"anything"));
        assert!(looks_like_pdf("text/plain", b"%PDF-1.7\n"));
        assert!(!looks_like_pdf("text/html", b"<html></html>"));
    }

    #[test]
    fn generated_pdf_pages_are_extracted_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("two-pages.pdf");
        fs::write(&path, pdf_with_pages(&["Hydraulic pump overview", "Valve maintenance"]))?;

        let (pages, _strategy) = extract_page_texts(&path)?;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert!(pages[0].text.contains("Hydraulic"));
        assert!(pages[1].text.contains("Valve"));
        Ok(())
    }

    struct FailingExtractor;

    impl PdfExtractor for FailingExtractor {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Err(IngestError::PdfParse("unsupported cross-reference stream".to_string()))
        }
    }

    #[test]
    fn secondary_parser_takes_over_and_drops_blank_pages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fallback.pdf");
        fs::write(&path, pdf_with_pages(&["Hydraulic pump", "   ", "Valve"]))?;

        let (pages, strategy) = extract_with(&FailingExtractor, &PdfExtractExtractor, &path)?;

        assert_eq!(strategy, "pdf-extract");
        let numbers = pages.iter().map(|page| page.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 3]);
        assert!(pages[0].text.contains("Hydraulic"));
        assert!(pages[1].text.contains("Valve"));
        Ok(())
    }

    #[test]
    fn both_parsers_failing_reports_each_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fallback.pdf");
        fs::write(&path, pdf_with_pages(&["Hydraulic pump"]))?;

        let error = extract_with(&FailingExtractor, &FailingExtractor, &path)
            .expect_err("both parsers fail");

        match error {
            IngestError::PdfParse(message) => {
                assert!(message.contains("unsupported cross-reference stream"));
                assert!(message.contains("fallback extraction also failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn garbage_with_pdf_header_is_unreadable() {
        let error = extract_from_bytes(b"%PDF-1.4\n%broken").expect_err("both parsers should fail");
        assert!(matches!(error, IngestError::PdfParse(_)));
    }

    #[test]
    fn scratch_file_is_removed_after_extraction() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;

        let failed = extract_from_bytes_in(dir.path(), b"%PDF-1.4\n%broken");
        let succeeded = extract_from_bytes_in(dir.path(), &pdf_with_pages(&["Scratch cleanup"]));

        assert!(failed.is_err());
        assert!(succeeded.is_ok());
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn html_response_is_not_parsed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/doc");
                then.status(200)
                    .header("content-type", "text/html")
                    .body("<html>login required</html>");
            })
            .await;

        let url = Url::parse(&server.url("/doc")).expect("url");
        let extraction = source().extract(&url).await;

        assert!(matches!(
            extraction,
            Extraction::NoText(NoTextReason::NotPdf { ref content_type }) if content_type == "text/html"
        ));
    }

    #[tokio::test]
    async fn empty_and_failed_downloads_yield_no_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/empty.pdf");
                then.status(200).header("content-type", "application/pdf").body("");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone.pdf");
                then.status(404);
            })
            .await;

        let empty = Url::parse(&server.url("/empty.pdf")).expect("url");
        let gone = Url::parse(&server.url("/gone.pdf")).expect("url");

        assert!(matches!(
            source().extract(&empty).await,
            Extraction::NoText(NoTextReason::EmptyResponse)
        ));
        assert!(matches!(
            source().extract(&gone).await,
            Extraction::NoText(NoTextReason::Transport(_))
        ));
    }

    #[tokio::test]
    async fn downloaded_pdf_is_extracted_with_checksum() {
        let server = MockServer::start_async().await;
        let bytes = pdf_with_pages(&["Pressure relief settings"]);
        let expected_checksum = digest_bytes(&bytes);
        server
            .mock_async(|when, then| {
                when.method(GET).path("/manual.pdf");
                then.status(200)
                    .header("content-type", "application/pdf")
                    .body(bytes.clone());
            })
            .await;

        let url = Url::parse(&server.url("/manual.pdf")).expect("url");
        match source().extract(&url).await {
            Extraction::Pages(pdf) => {
                assert_eq!(pdf.checksum, expected_checksum);
                assert_eq!(pdf.pages.len(), 1);
                assert!(pdf.pages[0].text.contains("Pressure"));
            }
            Extraction::NoText(reason) => panic!("expected pages, got {reason}"),
        }
    }
}
