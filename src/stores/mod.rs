//! Application-facing stores built on [`crate::collection::Collection`].

pub mod auth_store;
pub mod crud_store;

pub use auth_store::{AuthProvider, AuthStore, AuthStoreOptions, AuthUser, PatchExistingUser};
pub use crud_store::{ActiveDocument, CrudStore, DeleteOptions, NewDocumentDefaults, StoreOptions};
