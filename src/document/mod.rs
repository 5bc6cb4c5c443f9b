//! Watched document cell.
//!
//! A [`Doc`] holds the deserialized value of one document. Created with
//! `watch = true` (or after [`Doc::watch`]) it follows the remote document,
//! including its deletion; otherwise its value stays as constructed.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::firestore::api::{
    CollectionReference, DocumentData, DocumentReference, DocumentSnapshot,
    FirestoreDataConverter, PassthroughConverter,
};
use crate::firestore::error::FirestoreResult;
use crate::reactive::Observable;
use crate::util::ListenerRegistration;

pub struct Doc<C: FirestoreDataConverter = PassthroughConverter> {
    inner: Arc<DocInner<C>>,
}

struct DocInner<C: FirestoreDataConverter> {
    reference: DocumentReference,
    converter: C,
    data: Observable<Option<C::Model>>,
    subscription: Mutex<Option<ListenerRegistration>>,
}

impl<C: FirestoreDataConverter> Clone for Doc<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: FirestoreDataConverter> Doc<C> {
    /// Builds a handle for `id` in `collection` (a fresh id when `None`).
    ///
    /// `data` is deserialized right away; no network I/O happens unless
    /// `watch` is set.
    pub fn new(
        collection: &CollectionReference,
        data: Option<&DocumentData>,
        converter: C,
        id: Option<&str>,
        watch: bool,
    ) -> FirestoreResult<Self> {
        let reference = collection.doc(id)?;
        let model = data.map(|data| converter.from_map(data)).transpose()?;
        let doc = Self {
            inner: Arc::new(DocInner {
                reference,
                converter,
                data: Observable::new(model),
                subscription: Mutex::new(None),
            }),
        };
        if watch {
            doc.watch()?;
        }
        Ok(doc)
    }

    pub fn id(&self) -> &str {
        self.inner.reference.id()
    }

    pub fn reference(&self) -> &DocumentReference {
        &self.inner.reference
    }

    /// The latest value; `None` when the document is absent.
    pub fn data(&self) -> Option<C::Model> {
        self.inner.data.get()
    }

    pub fn with_data<R>(&self, f: impl FnOnce(Option<&C::Model>) -> R) -> R {
        self.inner.data.with(|data| f(data.as_ref()))
    }

    /// Calls `observer` after every change of the stored value.
    pub fn observe_data<F>(&self, observer: F) -> ListenerRegistration
    where
        F: Fn(Option<&C::Model>) + Send + Sync + 'static,
    {
        self.inner.data.observe(move |data| observer(data.as_ref()))
    }

    /// Follows the remote document, replacing any earlier subscription.
    pub fn watch(&self) -> FirestoreResult<()> {
        self.unwatch();
        let weak: Weak<DocInner<C>> = Arc::downgrade(&self.inner);
        let reference = &self.inner.reference;
        let registration = reference
            .firestore()
            .on_document_snapshot(reference, move |snapshot| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_snapshot(snapshot);
                }
            })?;
        let previous = self.inner.subscription.lock().unwrap().replace(registration);
        if let Some(previous) = previous {
            previous.detach();
        }
        Ok(())
    }

    /// Stops following the remote document. No-op when not watching.
    pub fn unwatch(&self) {
        let registration = self.inner.subscription.lock().unwrap().take();
        if let Some(registration) = registration {
            registration.detach();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner.subscription.lock().unwrap().is_some()
    }
}

impl<C: FirestoreDataConverter> DocInner<C> {
    fn apply_snapshot(&self, snapshot: &DocumentSnapshot) {
        match snapshot.data() {
            None => self.data.set(None),
            Some(data) => match self.converter.from_map(data) {
                Ok(model) => self.data.set(Some(model)),
                Err(err) => log::warn!(
                    "keeping previous value of {}: {err}",
                    self.reference.path()
                ),
            },
        }
    }
}

impl<C> fmt::Debug for Doc<C>
where
    C: FirestoreDataConverter,
    C::Model: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("id", &self.id())
            .field("data", &self.data())
            .field("watching", &self.is_watching())
            .finish()
    }
}
