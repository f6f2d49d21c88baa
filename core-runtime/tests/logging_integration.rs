//! Integration tests for logging system

use bridge_traits::log::LogLevel;
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};

#[test]
fn test_logging_initialization_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_spans(false);

    assert!(init_logging(config.clone()).is_ok());

    // The global subscriber can only be installed once per process
    assert!(init_logging(config).is_err());

    tracing::info!(endpoint = "Users/{UserId}/Items", "logging initialized");
}

#[test]
fn test_credential_fields_redacted() {
    assert_eq!(redact_if_sensitive("access_token", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("password", "hunter2"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), "[REDACTED]");
}

#[test]
fn test_plain_fields_pass_through() {
    assert_eq!(redact_if_sensitive("item_id", "12345"), "12345");
    assert_eq!(redact_if_sensitive("endpoint", "Artists"), "Artists");
    assert_eq!(redact_if_sensitive("start_index", "100"), "100");
}

#[test]
fn test_invalid_custom_filter_rejected() {
    let config = LoggingConfig::default().with_filter("core_sync=[");
    assert!(init_logging(config).is_err());
}
