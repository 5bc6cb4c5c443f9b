//! Minimal reactive substrate: observable cells with observer-count hooks,
//! batched notifications and predicate waits.

mod batch;
mod observable;

pub use batch::{in_transaction, transaction};
pub use observable::Observable;
