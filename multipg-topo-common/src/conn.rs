use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::TopoError;

/// An opaque, backend-assigned token identifying one write to one path.
///
/// Callers hold it only to pass it back as the compare-and-set precondition
/// of a later `update` or `delete`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version(u64);

impl Version {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Version(v)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirEntryKind {
    #[default]
    File,
    Directory,
}

/// One entry of a shallow directory listing.
///
/// `kind` and `ephemeral` are only populated when the listing was requested
/// with `full = true`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: DirEntryKind,
    pub ephemeral: bool,
}

/// One record of a deep, recursive listing: the full absolute key plus the
/// stored bytes and their version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub version: Version,
}

/// One notification delivered on a watch.
///
/// A terminal notification carries `err` (`NoNode` when the watched path was
/// deleted, `Interrupted` when the watch was cancelled); the stream closes
/// after delivering it. Duplicate notifications are permitted and consumers
/// must tolerate them.
#[derive(Debug)]
pub struct WatchData {
    pub contents: Vec<u8>,
    pub version: Version,
    pub err: Option<TopoError>,
}

/// A [`WatchData`] tagged with the absolute path it concerns, for recursive
/// watches. A per-key `NoNode` marks that key's deletion and is not terminal
/// for the subtree stream.
#[derive(Debug)]
pub struct WatchDataRecursive {
    pub path: String,
    pub data: WatchData,
}

pub type WatchStream = mpsc::UnboundedReceiver<WatchData>;
pub type RecursiveWatchStream = mpsc::UnboundedReceiver<WatchDataRecursive>;

/// A handle representing held exclusivity on a path. Dropping the descriptor
/// does not release the lock; call [`LockDescriptor::unlock`].
#[async_trait]
pub trait LockDescriptor: Send + Sync {
    /// Probe that the lock is still held (e.g. the backend lease is alive).
    async fn check(&self, ctx: &Context) -> Result<(), TopoError>;

    /// Release the lock. A second call through the same descriptor fails.
    async fn unlock(&self, ctx: &Context) -> Result<(), TopoError>;
}

/// One connection to a single topology namespace, either the global one or a
/// cell's.
///
/// Paths are `/`-separated and relative to the namespace root; intermediate
/// directories implicitly exist and are pruned when their last file goes
/// away. All operations are safe to invoke concurrently.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Atomically create `path` holding `contents`. Fails with `NodeExists`
    /// when the file is already there.
    async fn create(
        &self,
        ctx: &Context,
        path: &str,
        contents: &[u8],
    ) -> Result<Version, TopoError>;

    /// Read the file and its current version. `NoNode` when absent.
    async fn get(&self, ctx: &Context, path: &str) -> Result<(Vec<u8>, Version), TopoError>;

    /// Overwrite the file if `version` still matches (`BadVersion`
    /// otherwise). A `None` version is an unconditional upsert that creates
    /// the file when absent.
    async fn update(
        &self,
        ctx: &Context,
        path: &str,
        contents: &[u8],
        version: Option<&Version>,
    ) -> Result<Version, TopoError>;

    /// Remove the file, checking `version` when given. A `None` version
    /// deletes unconditionally.
    async fn delete(
        &self,
        ctx: &Context,
        path: &str,
        version: Option<&Version>,
    ) -> Result<(), TopoError>;

    /// Shallow listing of `dir_path`'s direct children, sorted by name.
    async fn list_dir(
        &self,
        ctx: &Context,
        dir_path: &str,
        full: bool,
    ) -> Result<Vec<DirEntry>, TopoError>;

    /// Deep listing of every file whose absolute key matches `path_prefix`.
    /// Backends without support return `NoImplementation`.
    async fn list(&self, ctx: &Context, path_prefix: &str) -> Result<Vec<KvEntry>, TopoError>;

    /// Watch one file: returns its current value and a stream of
    /// notifications for subsequent writes. The stream terminates with
    /// `NoNode` on deletion or `Interrupted` when `ctx` is cancelled.
    async fn watch(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<(WatchData, WatchStream), TopoError>;

    /// Watch a subtree: returns the current files under `path` and a stream
    /// of per-key notifications. Backends without support return
    /// `NoImplementation`.
    async fn watch_recursive(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<(Vec<WatchDataRecursive>, RecursiveWatchStream), TopoError>;

    /// Acquire the exclusive advisory lock on `dir_path`, blocking until the
    /// holder releases it or `ctx` terminates. The path must exist.
    async fn lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError>;

    /// Like [`Conn::lock`], with a lease TTL after which a real backend may
    /// expire the lock on its own.
    async fn lock_with_ttl(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
        ttl: Duration,
    ) -> Result<Box<dyn LockDescriptor>, TopoError>;

    /// Like [`Conn::lock`], but the path does not have to exist; it is
    /// created on demand.
    async fn lock_name(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError>;

    /// Non-blocking acquire: fails immediately with `NodeExists` when the
    /// lock is held.
    async fn try_lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError>;

    /// Release this connection's resources. Watches and locks created
    /// through it are not usable afterwards.
    fn close(&self) -> Result<(), TopoError>;
}
