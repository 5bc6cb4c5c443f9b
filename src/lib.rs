//! # firestorable
//!
//! Observable mirrors of Firestore collections and documents.
//!
//! A [`collection::Collection`] keeps its documents in sync with a query for
//! as long as somebody observes it, and releases the subscription when the
//! last observer goes away. A [`document::Doc`] is a single document cell
//! that can follow the remote document on demand.
//!
//! ```ignore
//! use firestorable::collection::{Collection, CollectionDependencies, CollectionOptions};
//! use firestorable::firestore::Firestore;
//!
//! let firestore = Firestore::in_memory();
//! let books = Collection::new(
//!     &firestore,
//!     "books",
//!     CollectionOptions::default(),
//!     CollectionDependencies::default(),
//! )?;
//! let _registration = books.observe_docs(|docs| println!("{} books", docs.len()));
//! ```

pub mod collection;
pub mod document;
pub mod firestore;
pub mod logger;
pub mod reactive;
pub mod stores;
pub mod util;

#[cfg(test)]
pub mod test_support;
