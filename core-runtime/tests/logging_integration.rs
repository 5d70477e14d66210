//! Integration tests for logging system

use core_runtime::logging::{init_logging, redact_url, LogFormat, LogLevel, LoggingConfig};
use core_runtime::Error;

// A global subscriber can only be installed once per process, so the whole
// lifecycle is exercised in a single test.
#[test]
fn test_logging_initializes_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_spans(false);

    init_logging(config.clone()).unwrap();
    tracing::info!(config_id = "cfg-1", "Logging ready");

    let second = init_logging(config);
    assert!(matches!(second, Err(Error::Config(_))));
}

#[test]
fn test_signed_url_redaction() {
    let url = "https://files.example.com/v1/tok_123/photo.jpg?Expires=1700000000&Signature=abc";
    let redacted = redact_url(url);

    assert!(redacted.starts_with("https://files.example.com/v1/tok_123/photo.jpg"));
    assert!(!redacted.contains("Signature"));
}
