use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::api::{DocumentData, DocumentSnapshot, Query, QuerySnapshot, SetOptions};
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::DocumentKey;
use crate::util::ListenerRegistration;

pub mod in_memory;

#[derive(Clone, Debug)]
pub enum WriteOperation {
    Set {
        key: DocumentKey,
        data: DocumentData,
        options: SetOptions,
    },
    Update {
        key: DocumentKey,
        data: DocumentData,
    },
    Delete {
        key: DocumentKey,
    },
}

impl WriteOperation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set { key, .. }
            | WriteOperation::Update { key, .. }
            | WriteOperation::Delete { key } => key,
        }
    }
}

pub type QuerySnapshotListener = Arc<dyn Fn(&QuerySnapshot) + Send + Sync + 'static>;
pub type DocumentSnapshotListener = Arc<dyn Fn(&DocumentSnapshot) + Send + Sync + 'static>;

/// Backend seam consumed by [`crate::firestore::api::Firestore`].
///
/// Listeners receive their first snapshot before `listen_*` returns, then one
/// snapshot per change to their result. Nothing is delivered once the returned
/// registration has been detached.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Datastore: Send + Sync + 'static {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot>;
    async fn set_document(
        &self,
        key: &DocumentKey,
        data: DocumentData,
        options: SetOptions,
    ) -> FirestoreResult<()>;
    async fn update_document(&self, key: &DocumentKey, data: DocumentData) -> FirestoreResult<()>;
    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()>;
    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()>;
    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>>;

    fn listen_query(
        &self,
        query: Query,
        listener: QuerySnapshotListener,
    ) -> FirestoreResult<ListenerRegistration>;

    fn listen_document(
        &self,
        key: DocumentKey,
        listener: DocumentSnapshotListener,
    ) -> FirestoreResult<ListenerRegistration>;
}

pub use in_memory::InMemoryDatastore;
