use std::collections::BTreeMap;

use crate::firestore::model::DocumentKey;

use super::converter::DocumentData;

/// A point-in-time read of a single document.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    key: DocumentKey,
    data: Option<DocumentData>,
}

impl DocumentSnapshot {
    pub fn new(key: DocumentKey, data: Option<DocumentData>) -> Self {
        Self { key, data }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// The document payload, or `None` when the document does not exist.
    pub fn data(&self) -> Option<&DocumentData> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<DocumentData> {
        self.data
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentChangeType {
    Added,
    Modified,
    Removed,
}

/// A single delta between two consecutive query results.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentChange {
    change_type: DocumentChangeType,
    doc: DocumentSnapshot,
}

impl DocumentChange {
    pub fn new(change_type: DocumentChangeType, doc: DocumentSnapshot) -> Self {
        Self { change_type, doc }
    }

    pub fn change_type(&self) -> DocumentChangeType {
        self.change_type
    }

    pub fn doc(&self) -> &DocumentSnapshot {
        &self.doc
    }
}

/// The result of a query: the matching documents plus the changes since the
/// previous delivery to the same listener.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySnapshot {
    documents: Vec<DocumentSnapshot>,
    changes: Vec<DocumentChange>,
}

impl QuerySnapshot {
    pub fn new(documents: Vec<DocumentSnapshot>, changes: Vec<DocumentChange>) -> Self {
        Self { documents, changes }
    }

    /// Snapshot for a one-shot read, where every document counts as added.
    pub(crate) fn from_documents(documents: Vec<DocumentSnapshot>) -> Self {
        let changes = compute_doc_changes(&[], &documents);
        Self { documents, changes }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn size(&self) -> usize {
        self.documents.len()
    }

    pub fn docs(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    pub fn doc_changes(&self) -> &[DocumentChange] {
        &self.changes
    }
}

/// Diffs two result sets keyed by document path.
///
/// Removals come first, then additions and modifications in the order of
/// `next`.
pub fn compute_doc_changes(
    previous: &[DocumentSnapshot],
    next: &[DocumentSnapshot],
) -> Vec<DocumentChange> {
    let before: BTreeMap<&DocumentKey, &DocumentSnapshot> =
        previous.iter().map(|doc| (doc.key(), doc)).collect();
    let after: BTreeMap<&DocumentKey, &DocumentSnapshot> =
        next.iter().map(|doc| (doc.key(), doc)).collect();

    let mut changes: Vec<DocumentChange> = previous
        .iter()
        .filter(|doc| !after.contains_key(doc.key()))
        .map(|doc| DocumentChange::new(DocumentChangeType::Removed, doc.clone()))
        .collect();

    for doc in next {
        match before.get(doc.key()) {
            None => changes.push(DocumentChange::new(DocumentChangeType::Added, doc.clone())),
            Some(old) if old.data() != doc.data() => {
                changes.push(DocumentChange::new(DocumentChangeType::Modified, doc.clone()))
            }
            Some(_) => {}
        }
    }
    changes
}
