//! The pluggable contract implemented by every topology backend.
//!
//! A topology service is a hierarchical key-value store with versioned
//! writes, directory listings, change notifications and advisory locks. This
//! crate defines the [`Conn`] trait that backends implement, the [`Factory`]
//! trait and process-wide registry through which backends are selected by
//! name, the [`TopoError`] taxonomy all callers match on, and the
//! [`Context`] cancellation/deadline scope every blocking operation takes.
//!
//! Higher-level typed APIs (cells, databases, gateways, poolers) live in the
//! `multipg-topo` crate; the reference in-memory backend lives in
//! `multipg-topo-memory`.

pub mod conn;
pub mod context;
pub mod error;
pub mod factory;

pub use conn::{
    Conn, DirEntry, DirEntryKind, KvEntry, LockDescriptor, RecursiveWatchStream, Version,
    WatchData, WatchDataRecursive, WatchStream,
};
pub use context::Context;
pub use error::{TopoError, TopoErrorIntrospect, TopoErrorKind};
pub use factory::{get_factory, register_factory, Factory};
