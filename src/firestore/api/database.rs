use std::fmt;
use std::sync::Arc;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::ResourcePath;
use crate::firestore::remote::datastore::{Datastore, InMemoryDatastore};
use crate::util::ListenerRegistration;

use super::converter::DocumentData;
use super::operations::SetOptions;
use super::query::Query;
use super::reference::{CollectionReference, DocumentReference};
use super::snapshot::{DocumentSnapshot, QuerySnapshot};
use super::write_batch::WriteBatch;

/// Handle to a document database backed by a [`Datastore`].
///
/// Cloning is cheap; clones share the same backend.
#[derive(Clone)]
pub struct Firestore {
    inner: Arc<FirestoreInner>,
}

struct FirestoreInner {
    datastore: Arc<dyn Datastore>,
}

impl Firestore {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            inner: Arc::new(FirestoreInner { datastore }),
        }
    }

    /// Creates a Firestore handle over a fresh [`InMemoryDatastore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDatastore::new()))
    }

    pub fn datastore(&self) -> Arc<dyn Datastore> {
        self.inner.datastore.clone()
    }

    /// Whether both handles point at the same backend instance.
    pub fn same_instance(&self, other: &Firestore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates a `CollectionReference` pointing at `path`.
    ///
    /// The path is interpreted relative to the root using forward slashes to
    /// separate segments (e.g. `"users/alovelace/repos"`).
    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        let resource = ResourcePath::from_string(path)?;
        CollectionReference::new(self.clone(), resource)
    }

    /// Creates a `DocumentReference` pointing at `path`.
    ///
    /// The path must contain an even number of segments (collection/doc pairs).
    pub fn doc(&self, path: &str) -> FirestoreResult<DocumentReference> {
        let resource = ResourcePath::from_string(path)?;
        DocumentReference::new(self.clone(), resource)
    }

    pub async fn get_doc(&self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot> {
        self.ensure_same_instance(reference.firestore())?;
        self.inner.datastore.get_document(reference.key()).await
    }

    pub async fn set_doc(
        &self,
        reference: &DocumentReference,
        data: DocumentData,
        options: Option<SetOptions>,
    ) -> FirestoreResult<()> {
        self.ensure_same_instance(reference.firestore())?;
        self.inner
            .datastore
            .set_document(reference.key(), data, options.unwrap_or_default())
            .await
    }

    /// Overwrites the given top-level fields; fails with `not-found` when the
    /// document does not exist.
    pub async fn update_doc(
        &self,
        reference: &DocumentReference,
        data: DocumentData,
    ) -> FirestoreResult<()> {
        self.ensure_same_instance(reference.firestore())?;
        self.inner
            .datastore
            .update_document(reference.key(), data)
            .await
    }

    pub async fn delete_doc(&self, reference: &DocumentReference) -> FirestoreResult<()> {
        self.ensure_same_instance(reference.firestore())?;
        self.inner.datastore.delete_document(reference.key()).await
    }

    /// Writes `data` under a freshly generated id and returns the new reference.
    pub async fn add_doc(
        &self,
        collection: &CollectionReference,
        data: DocumentData,
    ) -> FirestoreResult<DocumentReference> {
        let reference = collection.doc(None)?;
        self.set_doc(&reference, data, None).await?;
        Ok(reference)
    }

    pub async fn get_docs(&self, query: &Query) -> FirestoreResult<QuerySnapshot> {
        let documents = self.inner.datastore.run_query(query).await?;
        Ok(QuerySnapshot::from_documents(documents))
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new(self.clone(), self.inner.datastore.clone())
    }

    /// Listens to a query. The first snapshot is delivered before this returns.
    pub fn on_snapshot<F>(&self, query: &Query, callback: F) -> FirestoreResult<ListenerRegistration>
    where
        F: Fn(&QuerySnapshot) + Send + Sync + 'static,
    {
        self.inner
            .datastore
            .listen_query(query.clone(), Arc::new(callback))
    }

    /// Listens to a single document, including its deletion.
    pub fn on_document_snapshot<F>(
        &self,
        reference: &DocumentReference,
        callback: F,
    ) -> FirestoreResult<ListenerRegistration>
    where
        F: Fn(&DocumentSnapshot) + Send + Sync + 'static,
    {
        self.ensure_same_instance(reference.firestore())?;
        self.inner
            .datastore
            .listen_document(reference.key().clone(), Arc::new(callback))
    }

    fn ensure_same_instance(&self, other: &Firestore) -> FirestoreResult<()> {
        if !self.same_instance(other) {
            return Err(invalid_argument(
                "Reference belongs to a different Firestore instance",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Firestore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Firestore")
            .field("instance", &Arc::as_ptr(&self.inner))
            .finish()
    }
}
