use serde_json::Value;

use crate::firestore::api::DocumentData;
use crate::firestore::error::{invalid_argument, FirestoreResult};

/// Dot separated path to a (possibly nested) document field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn from_dot_separated(path: &str) -> FirestoreResult<Self> {
        if path.trim().is_empty() {
            return Err(invalid_argument("FieldPath string cannot be empty"));
        }
        if path.split('.').any(str::is_empty) {
            return Err(invalid_argument(format!(
                "Invalid field path '{path}': empty segment"
            )));
        }
        Ok(Self {
            segments: path.split('.').map(str::to_string).collect(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join(".")
    }

    /// Looks the field up inside `data`, walking nested maps.
    pub fn resolve<'a>(&self, data: &'a DocumentData) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = data.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}
