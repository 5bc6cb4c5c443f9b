//! Live collection mirror.
//!
//! A [`Collection`] keeps an observable map of the documents matching its
//! query. Under [`FetchMode::Auto`] the subscription is opened when `docs` or
//! `is_fetched` gains its first observer and closed when both lose their last
//! one. Writes go straight to the datastore; the map only changes when the
//! subscription reports them.

mod options;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future::{join_all, select, try_join_all, Either};

use crate::document::Doc;
use crate::firestore::api::reference::generate_auto_id;
use crate::firestore::api::{
    CollectionReference, DocumentChangeType, Firestore, FirestoreDataConverter,
    PassthroughConverter, QueryConstraint, QuerySnapshot, SetOptions,
};
use crate::firestore::error::{failed_precondition, not_found, FirestoreError, FirestoreResult};
use crate::logger::{LogLevel, Logger};
use crate::reactive::{transaction, Observable};
use crate::util::{shallow_merge, ListenerRegistration};

pub use options::{
    CollectionDependencies, CollectionOptions, CollectionQuery, CollectionSource, DocLookup,
    FetchMode, GetOptions, RealtimeMode, UpdatePatch,
};

type DocMap<C> = BTreeMap<String, Doc<C>>;

pub struct Collection<C: FirestoreDataConverter = PassthroughConverter> {
    inner: Arc<CollectionInner<C>>,
}

impl<C: FirestoreDataConverter> Clone for Collection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CollectionInner<C: FirestoreDataConverter> {
    firestore: Firestore,
    reference: CollectionReference,
    converter: C,
    name: String,
    logger: Option<Logger>,
    realtime_mode: RealtimeMode,
    fetch_mode: FetchMode,
    default_set_options: Option<SetOptions>,
    docs: Observable<DocMap<C>>,
    query: Observable<CollectionQuery>,
    is_fetched: Observable<bool>,
    is_loading: Observable<bool>,
    /// Raised once by `dispose`, so pending waits can give up.
    is_disposed: Observable<bool>,
    /// Set at every refresh, consumed by the first snapshot of that cycle.
    can_clear: AtomicBool,
    sync: Mutex<SyncState>,
    reactions: Mutex<Vec<ListenerRegistration>>,
}

#[derive(Default)]
struct SyncState {
    listener: Option<ListenerRegistration>,
    /// Bumped on every cancel and every new listen; deliveries tagged with
    /// an older cycle are dropped.
    cycle: u64,
    observers: usize,
    is_observed: bool,
    disposed: bool,
}

enum EntryChange<C: FirestoreDataConverter> {
    Upsert(String, Doc<C>),
    Remove(String),
}

impl<C: FirestoreDataConverter> Collection<C> {
    pub fn new(
        firestore: &Firestore,
        source: impl Into<CollectionSource>,
        options: CollectionOptions<C>,
        dependencies: CollectionDependencies,
    ) -> FirestoreResult<Self> {
        let reference = source.into().resolve(firestore)?;
        let CollectionOptions {
            realtime_mode,
            fetch_mode,
            query,
            converter,
            name,
            default_set_options,
        } = options;

        let inner = Arc::new(CollectionInner {
            firestore: firestore.clone(),
            name: name.unwrap_or_else(|| reference.id().to_string()),
            reference,
            converter,
            logger: dependencies.logger,
            realtime_mode,
            fetch_mode,
            default_set_options,
            docs: Observable::new(BTreeMap::new()),
            query: Observable::new(query),
            is_fetched: Observable::new(false),
            is_loading: Observable::new(false),
            is_disposed: Observable::new(false),
            can_clear: AtomicBool::new(false),
            sync: Mutex::new(SyncState::default()),
            reactions: Mutex::new(Vec::new()),
        });

        if fetch_mode != FetchMode::Manual || realtime_mode == RealtimeMode::On {
            let mut reactions = Vec::new();
            let weak = Arc::downgrade(&inner);
            reactions.push(inner.query.observe(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_query_changed();
                }
            }));

            if fetch_mode == FetchMode::Auto {
                reactions.extend([
                    inner.docs.on_become_observed(observed_hook(&inner, true)),
                    inner.docs.on_become_unobserved(observed_hook(&inner, false)),
                    inner.is_fetched.on_become_observed(observed_hook(&inner, true)),
                    inner.is_fetched.on_become_unobserved(observed_hook(&inner, false)),
                ]);
            }
            *inner.reactions.lock().unwrap() = reactions;
        }

        inner.log(LogLevel::Info, "Created");

        if fetch_mode == FetchMode::Once {
            inner.refresh()?;
        }

        Ok(Self { inner })
    }

    /// Tag prefixed to every log line.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn reference(&self) -> &CollectionReference {
        &self.inner.reference
    }

    pub fn converter(&self) -> &C {
        &self.inner.converter
    }

    pub fn realtime_mode(&self) -> RealtimeMode {
        self.inner.realtime_mode
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.inner.fetch_mode
    }

    /// Snapshot of the mirrored documents, ordered by id.
    pub fn docs(&self) -> Vec<Doc<C>> {
        self.inner.docs.with(|docs| docs.values().cloned().collect())
    }

    pub fn get(&self, id: &str) -> Option<Doc<C>> {
        self.inner.docs.with(|docs| docs.get(id).cloned())
    }

    pub fn query(&self) -> CollectionQuery {
        self.inner.query.get()
    }

    /// Replaces the query. A fetched or loading mirror refetches right away;
    /// otherwise the query applies to the next fetch.
    pub fn set_query(&self, query: CollectionQuery) {
        self.inner.query.set(query);
    }

    /// `false` until the first snapshot of the current fetch has been applied.
    pub fn is_fetched(&self) -> bool {
        self.inner.is_fetched.get()
    }

    /// `true` between opening a subscription and its first snapshot.
    pub fn is_loading(&self) -> bool {
        self.inner.is_loading.get()
    }

    /// Whether a subscription is currently open.
    pub fn is_active(&self) -> bool {
        self.inner.sync.lock().unwrap().listener.is_some()
    }

    /// Observes the mirrored documents. Counts as an observer for
    /// [`FetchMode::Auto`].
    pub fn observe_docs<F>(&self, observer: F) -> ListenerRegistration
    where
        F: Fn(&[Doc<C>]) + Send + Sync + 'static,
    {
        self.inner.docs.observe(move |docs| {
            let docs: Vec<Doc<C>> = docs.values().cloned().collect();
            observer(&docs);
        })
    }

    /// Observes `is_fetched`. Counts as an observer for [`FetchMode::Auto`].
    pub fn observe_is_fetched<F>(&self, observer: F) -> ListenerRegistration
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.is_fetched.observe(move |value| observer(*value))
    }

    pub fn observe_is_loading<F>(&self, observer: F) -> ListenerRegistration
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.is_loading.observe(move |value| observer(*value))
    }

    pub fn new_id(&self) -> String {
        generate_auto_id()
    }

    /// Fetches the documents and resolves once they are applied.
    ///
    /// Only valid under [`FetchMode::Manual`]. Fails with
    /// `failed-precondition` if the collection is disposed before the first
    /// snapshot arrives.
    pub async fn fetch_async(&self) -> FirestoreResult<()> {
        if self.inner.fetch_mode != FetchMode::Manual {
            return Err(failed_precondition(
                "Documents can only be fetched manually when fetch_mode is FetchMode::Manual. \
                 Set fetch_mode to Manual in the collection options.",
            ));
        }
        if self.inner.sync.lock().unwrap().disposed {
            return Err(self.inner.disposed_error());
        }
        self.inner.refresh()?;

        let fetched = self.inner.is_fetched.when(|fetched| *fetched);
        let disposed = self.inner.is_disposed.when(|disposed| *disposed);
        futures::pin_mut!(fetched, disposed);
        match select(fetched, disposed).await {
            Either::Left(_) => Ok(()),
            Either::Right(_) => Err(self.inner.disposed_error()),
        }
    }

    /// Writes one document and returns its id (generated when `id` is `None`).
    pub async fn add_async(
        &self,
        data: &C::Model,
        id: Option<&str>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<String> {
        let map = self.inner.converter.to_map(data)?;
        let reference = self.inner.reference.doc(id)?;
        self.inner
            .firestore
            .set_doc(&reference, map, self.inner.set_options(options))
            .await?;
        Ok(reference.id().to_string())
    }

    /// Writes every document in one batch; ids are returned in input order.
    pub async fn add_many_async(
        &self,
        data: &[C::Model],
        options: Option<SetOptions>,
    ) -> FirestoreResult<Vec<String>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let options = self.inner.set_options(options);
        let mut batch = self.inner.firestore.batch();
        let mut ids = Vec::with_capacity(data.len());
        for model in data {
            let reference = self.inner.reference.doc(None)?;
            batch.set(&reference, self.inner.converter.to_map(model)?, options.clone())?;
            ids.push(reference.id().to_string());
        }
        batch.commit().await?;
        Ok(ids)
    }

    /// Applies `patch` to each existing document in `ids`; missing ids are
    /// skipped. Any other read failure aborts the update before it writes.
    ///
    /// Each document is read, merged client-side and written back without a
    /// concurrency guard, so two concurrent updates of one id may lose one.
    pub async fn update_async(
        &self,
        patch: impl Into<UpdatePatch>,
        ids: &[&str],
    ) -> FirestoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let patch = patch.into();
        let lookups = ids.iter().map(|id| async move {
            match self.get_async(id, GetOptions { watch: false }).await {
                Ok(doc) => Ok(Some(doc)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            }
        });
        let found: Vec<Doc<C>> = try_join_all(lookups).await?.into_iter().flatten().collect();

        let converter = &self.inner.converter;
        let writes = found.iter().map(|doc| {
            let patch = &patch;
            async move {
                let data = match patch {
                    UpdatePatch::Merge(fields) => {
                        let current = doc
                            .with_data(|model| model.map(|model| converter.to_map(model)).transpose())?
                            .unwrap_or_default();
                        shallow_merge(current, fields)
                    }
                    UpdatePatch::Clear => converter.cleared_map()?,
                };
                self.inner.firestore.update_doc(doc.reference(), data).await
            }
        });
        try_join_all(writes).await?;
        Ok(())
    }

    /// Reads one document straight from the datastore.
    ///
    /// Fails with `not-found` when the document does not exist.
    pub async fn get_async(&self, id: &str, options: GetOptions) -> FirestoreResult<Doc<C>> {
        let reference = self.inner.reference.doc(Some(id))?;
        let snapshot = self.inner.firestore.get_doc(&reference).await?;
        let Some(data) = snapshot.data() else {
            return Err(not_found(format!(
                "Collection '{}' contains no document with id '{}'",
                self.inner.reference.id(),
                id
            )));
        };
        Doc::new(
            &self.inner.reference,
            Some(data),
            self.inner.converter.clone(),
            Some(id),
            options.watch,
        )
    }

    /// Reads every id concurrently. A failed read yields
    /// [`DocLookup::Missing`] in that slot; failures other than `not-found`
    /// are logged as warnings.
    pub async fn get_many_async(&self, ids: &[&str], options: GetOptions) -> Vec<DocLookup<C>> {
        let lookups = ids.iter().map(|id| async move {
            match self.get_async(id, options).await {
                Ok(doc) => DocLookup::Found(doc),
                Err(err) => {
                    if err.is_not_found() {
                        self.inner.log(
                            LogLevel::Info,
                            format!(
                                "get_many_async: id {id} not found in collection {}.",
                                self.inner.reference.id()
                            ),
                        );
                    } else {
                        self.inner.log(
                            LogLevel::Warn,
                            format!("get_many_async: failed to read id {id}: {err}"),
                        );
                    }
                    DocLookup::Missing(id.to_string())
                }
            }
        });
        join_all(lookups).await
    }

    /// Runs a one-off query against the base collection, ignoring the
    /// mirror's own query. The mirror is left untouched.
    pub async fn query_async(
        &self,
        constraints: impl IntoIterator<Item = QueryConstraint>,
    ) -> FirestoreResult<Vec<C::Model>> {
        let query = self.inner.reference.query().with_constraints(constraints)?;
        let snapshot = self.inner.firestore.get_docs(&query).await?;
        snapshot
            .docs()
            .iter()
            .filter_map(|doc| doc.data())
            .map(|data| self.inner.converter.from_map(data))
            .collect()
    }

    /// Deletes one document directly, or several in one batch.
    pub async fn delete_async(&self, ids: &[&str]) -> FirestoreResult<()> {
        match ids {
            [] => Ok(()),
            [id] => {
                let reference = self.inner.reference.doc(Some(*id))?;
                self.inner.firestore.delete_doc(&reference).await
            }
            _ => {
                let mut batch = self.inner.firestore.batch();
                for id in ids {
                    batch.delete(&self.inner.reference.doc(Some(*id))?)?;
                }
                batch.commit().await
            }
        }
    }

    /// Cancels the subscription, clears the documents and detaches every
    /// reaction. Safe to call more than once.
    pub fn dispose(&self) {
        self.inner.sync.lock().unwrap().disposed = true;
        self.inner.is_disposed.set(true);
        self.inner.cancel_listener(true);
        self.inner.clear_docs();
        let reactions = std::mem::take(&mut *self.inner.reactions.lock().unwrap());
        for reaction in reactions.into_iter().rev() {
            reaction.detach();
        }
    }
}

fn observed_hook<C: FirestoreDataConverter>(
    inner: &Arc<CollectionInner<C>>,
    observed: bool,
) -> impl Fn() + Send + Sync + 'static {
    let weak: Weak<CollectionInner<C>> = Arc::downgrade(inner);
    move || {
        if let Some(inner) = weak.upgrade() {
            inner.on_observed_status_changed(observed);
        }
    }
}

impl<C: FirestoreDataConverter> CollectionInner<C> {
    fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        let Some(logger) = &self.logger else {
            return;
        };
        let line = format!("{}: {}", self.name, message.as_ref());
        match level {
            LogLevel::Warn => logger.warn(line),
            LogLevel::Error => logger.error(line),
            _ => logger.info(line),
        }
    }

    fn disposed_error(&self) -> FirestoreError {
        failed_precondition(format!("Collection '{}' has been disposed", self.name))
    }

    fn set_options(&self, options: Option<SetOptions>) -> Option<SetOptions> {
        match (options, &self.default_set_options) {
            (None, None) => None,
            (options, defaults) => {
                Some(options.unwrap_or_default().with_defaults(&defaults.clone().unwrap_or_default()))
            }
        }
    }

    fn on_observed_status_changed(self: &Arc<Self>, observed: bool) {
        let (count, transition) = {
            let mut state = self.sync.lock().unwrap();
            if observed {
                state.observers += 1;
            } else {
                debug_assert!(state.observers > 0, "unobserved hook without a matching observed hook");
                state.observers = state.observers.saturating_sub(1);
            }
            let transition = if state.observers == 1 && !state.is_observed {
                state.is_observed = true;
                Some(true)
            } else if state.observers == 0 {
                state.is_observed = false;
                Some(false)
            } else {
                None
            };
            (state.observers, transition)
        };

        self.log(LogLevel::Info, format!("Number of observers changed to: {count}"));
        match transition {
            Some(true) => {
                self.log(LogLevel::Info, "Docs became observed.");
                if let Err(err) = self.refresh() {
                    self.log(LogLevel::Error, format!("Failed to fetch docs: {err}"));
                }
            }
            Some(false) => {
                self.log(LogLevel::Info, "Docs in collection became unobserved.");
                self.cancel_listener(true);
            }
            None => {}
        }
    }

    fn on_query_changed(self: &Arc<Self>) {
        self.log(LogLevel::Info, "Received new query");
        if self.is_fetched.get() || self.is_loading.get() {
            if let Err(err) = self.refresh() {
                self.log(LogLevel::Error, format!("Failed to fetch docs: {err}"));
            }
        }
    }

    /// Starts a new fetch cycle for the current query.
    fn refresh(self: &Arc<Self>) -> FirestoreResult<()> {
        if self.sync.lock().unwrap().disposed {
            return Ok(());
        }
        self.log(LogLevel::Info, "Getting docs...");

        self.is_fetched.set(false);
        self.cancel_listener(true);

        let query = match self.query.get().resolve(&self.reference) {
            Ok(query) => query,
            Err(err) => {
                self.is_loading.set(false);
                return Err(err);
            }
        };
        let Some(query) = query else {
            transaction(|| {
                self.is_fetched.set(true);
                self.is_loading.set(false);
                self.clear_docs();
            });
            return Ok(());
        };

        self.can_clear.store(true, Ordering::SeqCst);
        self.is_loading.set(true);

        let cycle = {
            let mut state = self.sync.lock().unwrap();
            state.cycle += 1;
            state.cycle
        };
        let weak = Arc::downgrade(self);
        let registration = match self.firestore.on_snapshot(&query, move |snapshot| {
            if let Some(inner) = weak.upgrade() {
                inner.on_snapshot(cycle, snapshot);
            }
        }) {
            Ok(registration) => registration,
            Err(err) => {
                self.is_loading.set(false);
                return Err(err);
            }
        };

        // The first snapshot may already have been delivered, and may have
        // cancelled this cycle (realtime off) or been superseded.
        let stale = {
            let mut state = self.sync.lock().unwrap();
            if state.cycle == cycle && !state.disposed {
                state.listener = Some(registration);
                None
            } else {
                Some(registration)
            }
        };
        if let Some(registration) = stale {
            registration.detach();
        }
        Ok(())
    }

    fn on_snapshot(&self, cycle: u64, snapshot: &QuerySnapshot) {
        {
            let state = self.sync.lock().unwrap();
            if state.cycle != cycle || state.disposed {
                log::debug!("{}: dropping stale snapshot", self.name);
                return;
            }
        }

        match self.realtime_mode {
            RealtimeMode::Off => self.cancel_listener(false),
            RealtimeMode::On => self.log(LogLevel::Info, "Subscribed for updates"),
        }

        transaction(|| {
            self.is_fetched.set(true);
            self.is_loading.set(false);
            if self.can_clear.swap(false, Ordering::SeqCst) {
                self.clear_docs();
            }
            self.read_snapshot(snapshot);
        });
    }

    fn read_snapshot(&self, snapshot: &QuerySnapshot) {
        if snapshot.is_empty() {
            self.log(
                LogLevel::Info,
                format!(
                    "Received empty snapshot in '{}' collection.",
                    self.reference.id()
                ),
            );
            self.docs.update(|docs| docs.clear());
            return;
        }

        let changes = snapshot.doc_changes();
        self.log(LogLevel::Info, format!("Received {} changes.", changes.len()));

        let mut entries = Vec::with_capacity(changes.len());
        for change in changes {
            let id = change.doc().id();
            match change.change_type() {
                DocumentChangeType::Added | DocumentChangeType::Modified => {
                    match Doc::new(
                        &self.reference,
                        change.doc().data(),
                        self.converter.clone(),
                        Some(id),
                        false,
                    ) {
                        Ok(doc) => entries.push(EntryChange::Upsert(id.to_string(), doc)),
                        Err(err) => self.log(
                            LogLevel::Warn,
                            format!("Skipping document '{id}' that failed to deserialize: {err}"),
                        ),
                    }
                }
                DocumentChangeType::Removed => entries.push(EntryChange::Remove(id.to_string())),
            }
        }

        self.docs.update(|docs| {
            for entry in entries {
                match entry {
                    EntryChange::Upsert(id, doc) => {
                        docs.insert(id, doc);
                    }
                    EntryChange::Remove(id) => {
                        docs.remove(&id);
                    }
                }
            }
        });
    }

    fn cancel_listener(&self, announce: bool) {
        let registration = {
            let mut state = self.sync.lock().unwrap();
            state.cycle += 1;
            state.listener.take()
        };
        if let Some(registration) = registration {
            if announce {
                self.log(LogLevel::Info, "Unsubscribing listener on docs...");
            }
            registration.detach();
        }
    }

    fn clear_docs(&self) {
        if self.docs.with(|docs| docs.is_empty()) {
            return;
        }
        self.log(LogLevel::Info, "Docs cleared.");
        self.docs.update(|docs| docs.clear());
    }
}

impl<C: FirestoreDataConverter> fmt::Debug for Collection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("docs", &self.inner.docs.with(|docs| docs.len()))
            .field("is_fetched", &self.is_fetched())
            .field("is_loading", &self.is_loading())
            .field("is_active", &self.is_active())
            .finish()
    }
}
