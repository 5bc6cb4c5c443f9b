use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::collection::{
    Collection, CollectionDependencies, CollectionOptions, GetOptions, UpdatePatch,
};
use crate::document::Doc;
use crate::firestore::api::{DocumentData, Firestore, FirestoreDataConverter, PassthroughConverter};
use crate::firestore::error::{failed_precondition, FirestoreResult};
use crate::reactive::Observable;
use crate::util::{shallow_merge, ListenerRegistration};

pub type NewDocumentDefaults = Arc<dyn Fn() -> BoxFuture<'static, DocumentData> + Send + Sync>;

pub struct StoreOptions<C = PassthroughConverter> {
    /// Collection path, e.g. `"users"`.
    pub collection: String,
    pub collection_options: CollectionOptions<C>,
    pub collection_dependencies: CollectionDependencies,
    /// Produces the fields every new draft starts from.
    pub create_new_document_defaults: Option<NewDocumentDefaults>,
}

impl<C: Default> StoreOptions<C> {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            collection_options: CollectionOptions::default(),
            collection_dependencies: CollectionDependencies::default(),
            create_new_document_defaults: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Soft delete: write the converter's cleared payload instead.
    pub use_flag: bool,
}

/// What [`CrudStore::active_document`] currently points at.
#[derive(Clone, Debug, PartialEq)]
pub enum ActiveDocument<M> {
    Persisted(M),
    Draft(DocumentData),
}

struct ActiveState<C: FirestoreDataConverter> {
    document: Option<Doc<C>>,
    draft: Option<DocumentData>,
    /// Bumped by every activation so a slow lookup cannot install a
    /// document that is no longer wanted.
    generation: u64,
}

/// CRUD facade over a [`Collection`] with one "active" document.
///
/// The active document is watched while active. A draft created with
/// [`CrudStore::create_new_document`] stands in for it until a persisted
/// document is activated.
pub struct CrudStore<C: FirestoreDataConverter = PassthroughConverter> {
    collection: Collection<C>,
    active_id: Observable<Option<String>>,
    state: Mutex<ActiveState<C>>,
    defaults: Option<NewDocumentDefaults>,
}

impl<C: FirestoreDataConverter> CrudStore<C> {
    pub fn new(firestore: &Firestore, options: StoreOptions<C>) -> FirestoreResult<Self> {
        let StoreOptions {
            collection,
            collection_options,
            collection_dependencies,
            create_new_document_defaults,
        } = options;
        let collection = Collection::new(
            firestore,
            collection,
            collection_options,
            collection_dependencies,
        )?;
        Ok(Self {
            collection,
            active_id: Observable::new(None),
            state: Mutex::new(ActiveState {
                document: None,
                draft: None,
                generation: 0,
            }),
            defaults: create_new_document_defaults,
        })
    }

    pub fn collection(&self) -> &Collection<C> {
        &self.collection
    }

    pub fn active_document_id(&self) -> Option<String> {
        self.active_id.get()
    }

    pub fn observe_active_document_id<F>(&self, observer: F) -> ListenerRegistration
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.active_id.observe(move |id| observer(id.as_deref()))
    }

    /// The active document's handle, once it has been resolved.
    pub fn active_doc(&self) -> Option<Doc<C>> {
        self.state.lock().unwrap().document.clone()
    }

    /// The active document's data, or the draft when none is active.
    pub fn active_document(&self) -> Option<ActiveDocument<C::Model>> {
        let state = self.state.lock().unwrap();
        match &state.document {
            Some(document) => document.data().map(ActiveDocument::Persisted),
            None => state.draft.clone().map(ActiveDocument::Draft),
        }
    }

    /// Activates `id`, or clears the active document and draft for `None`.
    ///
    /// The mirrored entry is used when present, otherwise the document is
    /// read from the datastore. When that read fails the active id falls
    /// back to `None` and the error is returned.
    pub async fn set_active_document_id(&self, id: Option<&str>) -> FirestoreResult<()> {
        let generation = {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            if let Some(previous) = state.document.take() {
                previous.unwatch();
            }
            if id.is_none() {
                state.draft = None;
            }
            state.generation
        };
        self.active_id.set(id.map(str::to_string));

        let Some(id) = id else {
            return Ok(());
        };

        let document = match self.collection.get(id) {
            Some(document) => document,
            None => match self
                .collection
                .get_async(id, GetOptions { watch: false })
                .await
            {
                Ok(document) => document,
                Err(err) => {
                    if self.state.lock().unwrap().generation == generation {
                        self.active_id.set(None);
                    }
                    return Err(err);
                }
            },
        };

        document.watch()?;
        let stale = {
            let mut state = self.state.lock().unwrap();
            if state.generation == generation {
                state.document = Some(document);
                None
            } else {
                Some(document)
            }
        };
        if let Some(stale) = stale {
            stale.unwatch();
        }
        Ok(())
    }

    /// Starts a draft from the configured defaults overlaid with `document`.
    /// Any active document is deactivated; the draft is kept.
    pub async fn create_new_document(&self, document: DocumentData) -> DocumentData {
        let defaults = match &self.defaults {
            Some(defaults) => defaults().await,
            None => DocumentData::new(),
        };
        let draft = shallow_merge(defaults, &document);
        {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            if let Some(previous) = state.document.take() {
                previous.unwatch();
            }
            state.draft = Some(draft.clone());
        }
        self.active_id.set(None);
        draft
    }

    pub async fn add_document(&self, document: &C::Model, id: Option<&str>) -> FirestoreResult<String> {
        self.collection.add_async(document, id, None).await
    }

    pub async fn add_documents(&self, documents: &[C::Model]) -> FirestoreResult<Vec<String>> {
        self.collection.add_many_async(documents, None).await
    }

    pub async fn update_document(&self, patch: DocumentData, id: &str) -> FirestoreResult<()> {
        self.collection.update_async(patch, &[id]).await
    }

    /// Applies `patch` to the active document.
    ///
    /// Fails with `failed-precondition`, before any I/O, when no document is
    /// active.
    pub async fn update_active_document(&self, patch: DocumentData) -> FirestoreResult<()> {
        let Some(id) = self.active_document_id() else {
            return Err(failed_precondition(
                "Can't update active document. No active document set.",
            ));
        };
        self.update_document(patch, &id).await
    }

    pub async fn delete_document(&self, id: &str, options: DeleteOptions) {
        self.delete_documents(options, &[id]).await
    }

    /// Deletes (or soft-deletes) `ids`. Failures are logged, not returned.
    pub async fn delete_documents(&self, options: DeleteOptions, ids: &[&str]) {
        if ids.is_empty() {
            return;
        }
        let result = if options.use_flag {
            self.collection.update_async(UpdatePatch::Clear, ids).await
        } else {
            self.collection.delete_async(ids).await
        };
        if let Err(err) = result {
            log::error!("{}: failed to delete {ids:?}: {err}", self.collection.name());
        }
    }

    /// Unwatches the active document, clears the store and disposes the
    /// collection.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            if let Some(document) = state.document.take() {
                document.unwatch();
            }
            state.draft = None;
        }
        self.active_id.set(None);
        self.collection.dispose();
    }
}

impl<C: FirestoreDataConverter> fmt::Debug for CrudStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudStore")
            .field("collection", &self.collection)
            .field("active_document_id", &self.active_document_id())
            .finish()
    }
}
