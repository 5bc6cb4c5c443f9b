pub mod merge;
pub mod subscribe;

pub use merge::{deep_merge, shallow_merge};
pub use subscribe::{ListenerRegistration, Unsubscribe};
