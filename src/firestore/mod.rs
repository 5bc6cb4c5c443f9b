pub mod api;
pub mod error;
pub mod model;
pub mod remote;

pub use api::{CollectionReference, DocumentReference, Firestore};
pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
