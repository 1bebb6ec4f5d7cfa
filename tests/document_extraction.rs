use std::path::PathBuf;

use policy_rag::ingestion::DocumentFormat;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[test]
fn extracts_text_from_pdf_fixture() {
    let path = fixture("retention_policy.pdf");
    let format = DocumentFormat::from_filename("retention_policy.pdf").expect("pdf format");

    let text = format.extract_text(&path).expect("pdf text");

    let normalized = normalize(&text);
    assert!(normalized.contains("Data Retention Policy"), "{text:?}");
    assert!(
        normalized.contains("Customer records are retained for seven years."),
        "{text:?}"
    );
    assert!(!text.contains('\0'));
    assert!(text.lines().all(|line| line == line.trim_end()));
}
