use std::fmt;
use std::sync::Arc;

use crate::document::Doc;
use crate::firestore::api::{
    CollectionReference, DocumentData, Firestore, FirestoreDataConverter, PassthroughConverter,
    Query, SetOptions,
};
use crate::firestore::error::FirestoreResult;
use crate::logger::Logger;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RealtimeMode {
    /// Keep the subscription open and stream every change.
    #[default]
    On,
    /// Cancel the subscription after the first snapshot of each fetch.
    Off,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// Fetch while `docs` or `is_fetched` is observed; refetch on query changes.
    #[default]
    Auto,
    /// Fetch only through `Collection::fetch_async`.
    Manual,
    /// Fetch once at construction; refetch on query changes.
    Once,
}

type QueryFn = Arc<dyn Fn(&CollectionReference) -> FirestoreResult<Query> + Send + Sync + 'static>;

/// Filter applied to the mirrored collection.
#[derive(Clone, Default)]
pub enum CollectionQuery {
    /// The whole collection.
    #[default]
    All,
    /// Builds the query from the base collection at every refresh.
    Filtered(QueryFn),
    /// Matches zero documents without opening a subscription.
    Empty,
}

impl CollectionQuery {
    pub fn filtered<F>(build: F) -> Self
    where
        F: Fn(&CollectionReference) -> FirestoreResult<Query> + Send + Sync + 'static,
    {
        CollectionQuery::Filtered(Arc::new(build))
    }

    /// `None` means the collection logically holds no documents.
    pub(crate) fn resolve(&self, collection: &CollectionReference) -> FirestoreResult<Option<Query>> {
        match self {
            CollectionQuery::All => Ok(Some(collection.query())),
            CollectionQuery::Filtered(build) => build(collection).map(Some),
            CollectionQuery::Empty => Ok(None),
        }
    }
}

impl fmt::Debug for CollectionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionQuery::All => f.write_str("All"),
            CollectionQuery::Filtered(_) => f.write_str("Filtered(..)"),
            CollectionQuery::Empty => f.write_str("Empty"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CollectionOptions<C = PassthroughConverter> {
    pub realtime_mode: RealtimeMode,
    pub fetch_mode: FetchMode,
    pub query: CollectionQuery,
    pub converter: C,
    /// Log tag; defaults to the collection id.
    pub name: Option<String>,
    /// Layered under the per-call options of `add_async`.
    pub default_set_options: Option<SetOptions>,
}

impl<C: Default> Default for CollectionOptions<C> {
    fn default() -> Self {
        Self {
            realtime_mode: RealtimeMode::default(),
            fetch_mode: FetchMode::default(),
            query: CollectionQuery::default(),
            converter: C::default(),
            name: None,
            default_set_options: None,
        }
    }
}

impl<C> CollectionOptions<C> {
    pub fn with_converter(converter: C) -> Self {
        Self {
            realtime_mode: RealtimeMode::default(),
            fetch_mode: FetchMode::default(),
            query: CollectionQuery::default(),
            converter,
            name: None,
            default_set_options: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CollectionDependencies {
    pub logger: Option<Logger>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GetOptions {
    /// Whether the returned handle follows the remote document.
    pub watch: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self { watch: true }
    }
}

type CollectionResolver = Arc<dyn Fn(&Firestore) -> FirestoreResult<CollectionReference> + Send + Sync>;

/// Where a mirror finds its collection.
#[derive(Clone)]
pub enum CollectionSource {
    Reference(CollectionReference),
    Path(String),
    Resolver(CollectionResolver),
}

impl CollectionSource {
    pub fn resolver<F>(resolve: F) -> Self
    where
        F: Fn(&Firestore) -> FirestoreResult<CollectionReference> + Send + Sync + 'static,
    {
        CollectionSource::Resolver(Arc::new(resolve))
    }

    pub(crate) fn resolve(&self, firestore: &Firestore) -> FirestoreResult<CollectionReference> {
        match self {
            CollectionSource::Reference(reference) => Ok(reference.clone()),
            CollectionSource::Path(path) => firestore.collection(path),
            CollectionSource::Resolver(resolve) => resolve(firestore),
        }
    }
}

impl From<CollectionReference> for CollectionSource {
    fn from(reference: CollectionReference) -> Self {
        CollectionSource::Reference(reference)
    }
}

impl From<&str> for CollectionSource {
    fn from(path: &str) -> Self {
        CollectionSource::Path(path.to_string())
    }
}

impl From<String> for CollectionSource {
    fn from(path: String) -> Self {
        CollectionSource::Path(path)
    }
}

impl fmt::Debug for CollectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionSource::Reference(reference) => write!(f, "{reference}"),
            CollectionSource::Path(path) => write!(f, "Path({path})"),
            CollectionSource::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// Patch accepted by `Collection::update_async`.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdatePatch {
    /// Top-level fields written over the current document.
    Merge(DocumentData),
    /// Writes the converter's cleared payload.
    Clear,
}

impl From<DocumentData> for UpdatePatch {
    fn from(patch: DocumentData) -> Self {
        UpdatePatch::Merge(patch)
    }
}

/// One slot of `Collection::get_many_async`.
pub enum DocLookup<C: FirestoreDataConverter = PassthroughConverter> {
    Found(Doc<C>),
    Missing(String),
}

impl<C: FirestoreDataConverter> DocLookup<C> {
    pub fn found(&self) -> Option<&Doc<C>> {
        match self {
            DocLookup::Found(doc) => Some(doc),
            DocLookup::Missing(_) => None,
        }
    }

    pub fn missing_id(&self) -> Option<&str> {
        match self {
            DocLookup::Found(_) => None,
            DocLookup::Missing(id) => Some(id),
        }
    }

    pub fn into_found(self) -> Option<Doc<C>> {
        match self {
            DocLookup::Found(doc) => Some(doc),
            DocLookup::Missing(_) => None,
        }
    }
}

impl<C> fmt::Debug for DocLookup<C>
where
    C: FirestoreDataConverter,
    C::Model: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocLookup::Found(doc) => f.debug_tuple("Found").field(doc).finish(),
            DocLookup::Missing(id) => f.debug_tuple("Missing").field(id).finish(),
        }
    }
}
