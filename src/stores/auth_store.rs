use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::GetOptions;
use crate::document::Doc;
use crate::firestore::api::{DocumentData, Firestore, FirestoreDataConverter, PassthroughConverter};
use crate::firestore::error::FirestoreResult;
use crate::reactive::{transaction, Observable};
use crate::util::ListenerRegistration;

use super::crud_store::{ActiveDocument, CrudStore, StoreOptions};

/// Identity reported by an [`AuthProvider`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    /// Fields a freshly created user document starts with.
    fn profile(&self) -> DocumentData {
        let mut profile = DocumentData::new();
        profile.insert("uid".to_string(), Value::String(self.uid.clone()));
        if let Some(name) = &self.name {
            profile.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(email) = &self.email {
            profile.insert("email".to_string(), Value::String(email.clone()));
        }
        profile
    }
}

/// Source of authentication state.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait AuthProvider: Send + Sync + 'static {
    fn current_user(&self) -> Option<AuthUser>;

    async fn sign_out(&self) -> FirestoreResult<()>;

    /// Emits the signed-in user (or `None`) on every auth state change.
    fn auth_state_changes(&self) -> async_channel::Receiver<Option<AuthUser>>;
}

pub type PatchExistingUser<C> = Arc<
    dyn Fn(Doc<C>, AuthUser) -> BoxFuture<'static, FirestoreResult<Doc<C>>> + Send + Sync,
>;

type SignOutCallback = Arc<dyn Fn() + Send + Sync>;

pub struct AuthStoreOptions<C: FirestoreDataConverter = PassthroughConverter> {
    pub store: StoreOptions<C>,
    /// Runs against an existing user document before it is activated.
    pub patch_existing_user: Option<PatchExistingUser<C>>,
    pub on_sign_out: Option<SignOutCallback>,
}

impl<C: FirestoreDataConverter + Default> Default for AuthStoreOptions<C> {
    fn default() -> Self {
        Self {
            store: StoreOptions::new("users"),
            patch_existing_user: None,
            on_sign_out: None,
        }
    }
}

/// A [`CrudStore`] over the users collection whose active document follows
/// the signed-in user.
pub struct AuthStore<C: FirestoreDataConverter = PassthroughConverter> {
    store: CrudStore<C>,
    provider: Arc<dyn AuthProvider>,
    auth_state: async_channel::Receiver<Option<AuthUser>>,
    is_auth_initialised: Observable<bool>,
    patch_existing_user: Option<PatchExistingUser<C>>,
    on_sign_out: Option<SignOutCallback>,
}

impl<C: FirestoreDataConverter> AuthStore<C> {
    pub fn new(
        firestore: &Firestore,
        provider: Arc<dyn AuthProvider>,
        options: AuthStoreOptions<C>,
    ) -> FirestoreResult<Self> {
        let AuthStoreOptions {
            store,
            patch_existing_user,
            on_sign_out,
        } = options;
        let auth_state = provider.auth_state_changes();
        Ok(Self {
            store: CrudStore::new(firestore, store)?,
            provider,
            auth_state,
            is_auth_initialised: Observable::new(false),
            patch_existing_user,
            on_sign_out,
        })
    }

    pub fn store(&self) -> &CrudStore<C> {
        &self.store
    }

    pub fn is_auth_initialised(&self) -> bool {
        self.is_auth_initialised.get()
    }

    pub fn observe_is_auth_initialised<F>(&self, observer: F) -> ListenerRegistration
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.is_auth_initialised.observe(move |value| observer(*value))
    }

    pub fn logged_in_user(&self) -> Option<AuthUser> {
        self.provider.current_user()
    }

    /// The signed-in user's document, once loaded.
    pub fn user(&self) -> Option<C::Model> {
        match self.store.active_document()? {
            ActiveDocument::Persisted(model) => Some(model),
            ActiveDocument::Draft(_) => None,
        }
    }

    /// Applies auth state changes until the provider's channel closes or the
    /// store is disposed. Failures are logged and do not stop the loop.
    pub async fn run(&self) {
        let changes = self.auth_state.clone();
        futures::pin_mut!(changes);
        while let Some(user) = changes.next().await {
            if let Err(err) = self.set_user(user).await {
                log::error!("{}: failed to load user: {err}", self.store.collection().name());
            }
        }
    }

    /// Loads (or creates) the document for `user` and makes it active.
    ///
    /// `None` clears the active document and fires the sign-out callback.
    /// Auth counts as initialised once either branch completes.
    pub async fn set_user(&self, user: Option<AuthUser>) -> FirestoreResult<()> {
        let result = match user {
            None => {
                let result = self.store.set_active_document_id(None).await;
                if let Some(on_sign_out) = &self.on_sign_out {
                    on_sign_out();
                }
                result
            }
            Some(user) => self.load_user(user).await,
        };
        self.is_auth_initialised.set(true);
        result
    }

    pub async fn sign_out(&self) -> FirestoreResult<()> {
        self.provider.sign_out().await
    }

    /// Stops [`AuthStore::run`] and disposes the underlying store.
    pub fn dispose(&self) {
        self.auth_state.close();
        transaction(|| self.store.dispose());
    }

    async fn load_user(&self, user: AuthUser) -> FirestoreResult<()> {
        let collection = self.store.collection();
        let existing = collection
            .get_async(&user.uid, GetOptions { watch: false })
            .await;
        match existing {
            Ok(document) => {
                if let Some(patch) = &self.patch_existing_user {
                    patch(document, user.clone()).await?;
                }
            }
            Err(err) if err.is_not_found() => {
                let draft = self.store.create_new_document(user.profile()).await;
                let model = collection.converter().from_map(&draft)?;
                self.store.add_document(&model, Some(&user.uid)).await?;
            }
            Err(err) => return Err(err),
        }
        self.store.set_active_document_id(Some(&user.uid)).await
    }
}

impl<C: FirestoreDataConverter> fmt::Debug for AuthStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStore")
            .field("store", &self.store)
            .field("is_auth_initialised", &self.is_auth_initialised())
            .finish()
    }
}
