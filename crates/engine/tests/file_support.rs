//! Filesystem connector extraction: plain text passes through untouched,
//! PDFs go through `pdf-extract`, and a page that fails to extract is
//! surfaced as an error for that one item rather than aborting the run.

use tempfile::TempDir;

use kbase_core::connector::{ConnectorAdapter, SourceItem};
use kbase_core::error::RetryCallback;
use kbase_engine::connectors::filesystem::FilesystemConnector;

/// Minimal single-page PDF containing the text "kbase extraction test",
/// with correctly computed xref offsets so `pdf-extract` can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n",
    );
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 50 >> stream\nBT /F1 12 Tf 100 700 Td (kbase extraction test) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[tokio::test]
async fn plain_text_files_pass_through_verbatim() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("readme.md"), "# Title\n\nBody text.").unwrap();

    let adapter = FilesystemConnector;
    let config = serde_json::json!({ "root": dir.path() });
    let item = SourceItem { source_id: "readme.md".to_string(), title: Some("readme.md".to_string()), updated_at: None, cursor_fragment: None };

    let noop_retry: RetryCallback<'_> = &|_, _, _, _| {};
    let fetched = adapter.fetch_content(&config, &item, noop_retry).await.unwrap();
    assert_eq!(fetched.canonical_text, "# Title\n\nBody text.");
}

#[tokio::test]
async fn pdf_content_is_extracted_to_text() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("doc.pdf"), minimal_pdf_with_phrase()).unwrap();

    let adapter = FilesystemConnector;
    let config = serde_json::json!({ "root": dir.path() });
    let item = SourceItem { source_id: "doc.pdf".to_string(), title: Some("doc.pdf".to_string()), updated_at: None, cursor_fragment: None };

    let noop_retry: RetryCallback<'_> = &|_, _, _, _| {};
    let fetched = adapter.fetch_content(&config, &item, noop_retry).await.unwrap();
    assert!(
        fetched.canonical_text.contains("kbase extraction test"),
        "expected extracted text to contain the embedded phrase, got: {:?}",
        fetched.canonical_text
    );
}

#[tokio::test]
async fn corrupt_pdf_fails_extraction_for_that_item_only() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("bad.pdf"), b"not a real pdf").unwrap();

    let adapter = FilesystemConnector;
    let config = serde_json::json!({ "root": dir.path() });
    let item = SourceItem { source_id: "bad.pdf".to_string(), title: Some("bad.pdf".to_string()), updated_at: None, cursor_fragment: None };

    let noop_retry: RetryCallback<'_> = &|_, _, _, _| {};
    let result = adapter.fetch_content(&config, &item, noop_retry).await;
    assert!(result.is_err(), "a corrupt PDF should fail extraction rather than return garbage text");
}
