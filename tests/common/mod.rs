#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use firestorable::collection::{Collection, CollectionDependencies, CollectionOptions};
use firestorable::firestore::api::{DocumentData, PassthroughConverter};
use firestorable::firestore::remote::InMemoryDatastore;
use firestorable::firestore::Firestore;
use firestorable::stores::{AuthProvider, AuthUser};
use firestorable::firestore::FirestoreResult;
use serde_json::Value;

pub fn doc_data(value: Value) -> DocumentData {
    value.as_object().cloned().expect("object literal")
}

/// A firestore over a fresh in-memory backend, plus the backend itself.
pub fn in_memory() -> (Firestore, Arc<InMemoryDatastore>) {
    let datastore = Arc::new(InMemoryDatastore::new());
    let firestore = Firestore::new(datastore.clone());
    (firestore, datastore)
}

pub async fn seed(firestore: &Firestore, path: &str, value: Value) {
    let reference = firestore.doc(path).unwrap();
    firestore.set_doc(&reference, doc_data(value), None).await.unwrap();
}

pub async fn exists(firestore: &Firestore, path: &str) -> bool {
    let reference = firestore.doc(path).unwrap();
    firestore.get_doc(&reference).await.unwrap().exists()
}

pub fn books(
    firestore: &Firestore,
    options: CollectionOptions<PassthroughConverter>,
) -> Collection<PassthroughConverter> {
    Collection::new(firestore, "books", options, CollectionDependencies::default()).unwrap()
}

pub fn ids(collection: &Collection<PassthroughConverter>) -> Vec<String> {
    collection.docs().iter().map(|doc| doc.id().to_string()).collect()
}

/// Auth provider driven by the test through its sender.
pub struct MockAuthProvider {
    user: Mutex<Option<AuthUser>>,
    sender: async_channel::Sender<Option<AuthUser>>,
    receiver: async_channel::Receiver<Option<AuthUser>>,
}

impl MockAuthProvider {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = async_channel::unbounded();
        Arc::new(Self {
            user: Mutex::new(None),
            sender,
            receiver,
        })
    }

    pub async fn sign_in(&self, user: AuthUser) {
        *self.user.lock().unwrap() = Some(user.clone());
        self.sender.send(Some(user)).await.unwrap();
    }

    pub fn close(&self) {
        self.sender.close();
    }
}

#[async_trait::async_trait]
impl AuthProvider for MockAuthProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.lock().unwrap().clone()
    }

    async fn sign_out(&self) -> FirestoreResult<()> {
        self.user.lock().unwrap().take();
        let _ = self.sender.send(None).await;
        Ok(())
    }

    fn auth_state_changes(&self) -> async_channel::Receiver<Option<AuthUser>> {
        self.receiver.clone()
    }
}
