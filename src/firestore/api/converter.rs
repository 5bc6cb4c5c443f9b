use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::firestore::error::{internal_error, invalid_argument, FirestoreResult};

/// Raw document payload as stored by the datastore.
pub type DocumentData = Map<String, Value>;

/// Trait describing how to convert between user models and Firestore maps.
///
/// Writes use `to_map`, reads use `from_map`, and callers choose the `Model`
/// type they want to surface.
pub trait FirestoreDataConverter: Send + Sync + Clone + 'static {
    /// The strongly typed model associated with this converter.
    type Model: Clone + Send + Sync + 'static;

    /// Encodes the user model into a Firestore map for writes.
    fn to_map(&self, value: &Self::Model) -> FirestoreResult<DocumentData>;

    /// Decodes a Firestore map into the user model for reads.
    fn from_map(&self, value: &DocumentData) -> FirestoreResult<Self::Model>;

    /// Payload written when a document is cleared rather than patched.
    ///
    /// Converters that support soft deletion override this; the default
    /// rejects the write.
    fn cleared_map(&self) -> FirestoreResult<DocumentData> {
        Err(invalid_argument(
            "This converter cannot serialize a cleared document; override `cleared_map`",
        ))
    }
}

/// Default converter that leaves Firestore maps unchanged (raw JSON-style data).
#[derive(Clone, Default, Debug)]
pub struct PassthroughConverter;

impl FirestoreDataConverter for PassthroughConverter {
    type Model = DocumentData;

    fn to_map(&self, value: &Self::Model) -> FirestoreResult<DocumentData> {
        Ok(value.clone())
    }

    fn from_map(&self, value: &DocumentData) -> FirestoreResult<Self::Model> {
        Ok(value.clone())
    }
}

/// Converter for any serde model whose serialized form is a JSON object.
pub struct SerdeConverter<T> {
    _model: PhantomData<fn() -> T>,
}

impl<T> SerdeConverter<T> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<T> Default for SerdeConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeConverter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SerdeConverter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SerdeConverter")
    }
}

impl<T> FirestoreDataConverter for SerdeConverter<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Model = T;

    fn to_map(&self, value: &T) -> FirestoreResult<DocumentData> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(invalid_argument(format!(
                "Documents must serialize to an object, got {other}"
            ))),
            Err(err) => Err(invalid_argument(format!("Failed to serialize document: {err}"))),
        }
    }

    fn from_map(&self, value: &DocumentData) -> FirestoreResult<T> {
        serde_json::from_value(Value::Object(value.clone()))
            .map_err(|err| internal_error(format!("Failed to deserialize document: {err}")))
    }
}
