//! sidecar-core: Keeps markdown sidecars in step with the attachments they describe.
//!
//! Every non-markdown file in a store (the "main" file) gets a companion note
//! holding a link and an embed back to it. This crate provides:
//! - The naming convention and the fixed sidecar template
//! - Back-reference rewriting for renames
//! - A `Reactor` applying create/rename/delete policies to store events
//! - `reconcile` and `repair` passes over a whole store
//! - The `Store` trait abstraction, with an in-memory implementation for tests

pub mod events;
pub mod links;
pub mod naming;
pub mod reactor;
pub mod reconcile;
pub mod rewrite;
pub mod store;
pub mod template;

pub use events::{EventBus, StoreEvent, Subscription};
pub use naming::FileKind;
pub use reactor::{DeleteMode, Outcome, Reactor, ReactorConfig, SkipReason};
pub use reconcile::{reconcile, repair, ReconcileReport, RepairReport};
pub use store::{FileHandle, InMemoryStore, Store, StoreError};
