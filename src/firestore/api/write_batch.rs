use std::sync::Arc;

use crate::firestore::api::operations::SetOptions;
use crate::firestore::api::{converter::DocumentData, database::Firestore};
use crate::firestore::error::{invalid_argument, resource_exhausted, FirestoreResult};
use crate::firestore::remote::datastore::{Datastore, WriteOperation};

use super::reference::DocumentReference;

const MAX_BATCH_WRITES: usize = 500;

/// Aggregates write operations and commits them atomically.
///
/// Either every queued write is applied or none is.
#[derive(Clone)]
pub struct WriteBatch {
    firestore: Firestore,
    datastore: Arc<dyn Datastore>,
    writes: Vec<WriteOperation>,
}

impl WriteBatch {
    pub(crate) fn new(firestore: Firestore, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            firestore,
            datastore,
            writes: Vec::new(),
        }
    }

    /// Adds a set operation to the batch.
    pub fn set(
        &mut self,
        reference: &DocumentReference,
        data: DocumentData,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.ensure_same_firestore(reference.firestore())?;
        self.writes.push(WriteOperation::Set {
            key: reference.key().clone(),
            data,
            options: options.unwrap_or_default(),
        });
        Ok(self)
    }

    /// Adds an update operation; the commit fails if the document is missing.
    pub fn update(
        &mut self,
        reference: &DocumentReference,
        data: DocumentData,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.ensure_same_firestore(reference.firestore())?;
        self.writes.push(WriteOperation::Update {
            key: reference.key().clone(),
            data,
        });
        Ok(self)
    }

    /// Adds a delete operation to the batch.
    pub fn delete(&mut self, reference: &DocumentReference) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.ensure_same_firestore(reference.firestore())?;
        self.writes.push(WriteOperation::Delete {
            key: reference.key().clone(),
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commits all queued writes atomically.
    pub async fn commit(self) -> FirestoreResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        self.datastore.commit(self.writes).await
    }

    fn ensure_same_firestore(&self, other: &Firestore) -> FirestoreResult<()> {
        if !self.firestore.same_instance(other) {
            return Err(invalid_argument(
                "All WriteBatch operations must target the same Firestore instance",
            ));
        }
        Ok(())
    }

    fn ensure_capacity(&self) -> FirestoreResult<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(resource_exhausted(
                "WriteBatch cannot contain more than 500 operations",
            ));
        }
        Ok(())
    }
}
