//! Unit tests for log.rs
//!
//! Tests LogSeverity, LogEntry, DefaultLogger filtering and MemoryLogger capture.

use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger, MemoryLogger};
use std::time::SystemTime;

fn entry(severity: LogSeverity, source: &str, message: &str) -> LogEntry {
    LogEntry {
        severity,
        timestamp: SystemTime::now(),
        source: source.to_string(),
        message: message.to_string(),
        file: None,
        line: None,
    }
}

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_labels_are_fixed_width() {
    for severity in [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ] {
        assert_eq!(severity.label().len(), 5);
    }
    assert_eq!(LogSeverity::Warn.label(), "WARN ");
}

// ============================================================================
// LOG ENTRY TESTS
// ============================================================================

#[test]
fn test_log_entry_with_file_line() {
    let entry = LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "skirmish::LockScope".to_string(),
        message: "range violation".to_string(),
        file: Some("lock_scope.rs"),
        line: Some(42),
    };

    let copy = entry.clone();
    assert_eq!(copy.severity, LogSeverity::Error);
    assert_eq!(copy.file, Some("lock_scope.rs"));
    assert_eq!(copy.line, Some(42));
}

// ============================================================================
// DEFAULT LOGGER TESTS
// ============================================================================

#[test]
fn test_default_logger_threshold() {
    assert_eq!(DefaultLogger::default().min_severity(), LogSeverity::Debug);
    let logger = DefaultLogger::with_min_severity(LogSeverity::Warn);
    assert_eq!(logger.min_severity(), LogSeverity::Warn);
}

#[test]
fn test_default_logger_all_severities() {
    let logger = DefaultLogger::with_min_severity(LogSeverity::Trace);
    for severity in [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ] {
        // Just verify it doesn't panic, with and without location
        logger.log(&entry(severity, "test", "message"));
        let mut located = entry(severity, "test", "located");
        located.file = Some("test.rs");
        located.line = Some(7);
        logger.log(&located);
    }
}

#[test]
fn test_logger_types_are_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DefaultLogger>();
    assert_send_sync::<MemoryLogger>();
}

// ============================================================================
// MEMORY LOGGER TESTS
// ============================================================================

#[test]
fn test_memory_logger_captures_entries() {
    let logger = MemoryLogger::new();
    logger.log(&entry(LogSeverity::Info, "skirmish::RenderContext", "device created"));
    logger.log(&entry(LogSeverity::Error, "skirmish::LockScope", "write past end"));
    logger.log(&entry(LogSeverity::Error, "skirmish::LockScope", "second write past end"));

    assert_eq!(logger.entries().len(), 3);
    assert_eq!(logger.count(LogSeverity::Error), 2);
    assert_eq!(logger.count(LogSeverity::Warn), 0);
    assert!(logger.contains("skirmish::LockScope", "past end"));
    assert!(!logger.contains("skirmish::RenderContext", "past end"));
}

#[test]
fn test_memory_logger_clones_share_storage() {
    let logger = MemoryLogger::new();
    let installed = logger.clone();
    installed.log(&entry(LogSeverity::Debug, "skirmish::RingAllocator", "wrap"));

    assert_eq!(logger.entries().len(), 1);

    logger.clear();
    assert!(installed.entries().is_empty());
}
