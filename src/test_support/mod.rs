//! Test utilities shared across crate-level unit tests.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::firestore::api::DocumentData;
use crate::logger::{LogLevel, Logger};

/// Converts a `json!` object literal into document data.
pub fn doc_data(value: Value) -> DocumentData {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A logger that records every line it receives.
pub fn capture_logger(name: &str) -> (Logger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
    let logger = Logger::new(name);
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    logger.set_log_handler(move |_, level, message| {
        sink.lock().unwrap().push((level, message.to_string()));
    });
    (logger, lines)
}
