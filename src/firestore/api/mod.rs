mod converter;
mod database;
pub(crate) mod operations;
pub(crate) mod query;
pub(crate) mod reference;
mod snapshot;
mod write_batch;

pub use converter::{DocumentData, FirestoreDataConverter, PassthroughConverter, SerdeConverter};
pub use database::Firestore;
pub use operations::SetOptions;
pub use query::{
    limit, order_by, where_field, FieldFilter, FilterOperator, OrderBy, OrderDirection, Query,
    QueryConstraint,
};
pub use reference::{CollectionReference, DocumentReference};
pub use snapshot::{
    compute_doc_changes, DocumentChange, DocumentChangeType, DocumentSnapshot, QuerySnapshot,
};
pub use write_batch::WriteBatch;
