//! An in-memory topology backend.
//!
//! One factory owns one shared tree of namespaces: every connection it
//! creates for the same cell operates on that cell's namespace, and
//! `global` is a namespace of its own. Everything is guarded by a single
//! mutex, which keeps the implementation deterministic; it is meant for
//! tests and single-process setups, not for production scale.
//!
//! The factory doubles as a fault-injection point: tests can arrange for
//! specific operations on specific paths to fail once or persistently, which
//! is how retry and propagation behavior is exercised.

mod directory;
mod file;
mod lock;
#[cfg(test)]
mod test;
mod watch;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once};

use regex::Regex;
use tokio::sync::{mpsc, watch as watchch};

use multipg_topo::records::Cell;
use multipg_topo::TopoStore;
use multipg_topo_common::{
    register_factory, Conn, Context, Factory, LockDescriptor, TopoError, TopoErrorKind, Version,
    WatchData, WatchDataRecursive,
};

/// Implementation name under which the backend registers itself.
pub const IMPLEMENTATION_NAME: &str = "memory";

/// The operations fault injection can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    ListDir,
    Create,
    Get,
    Update,
    Delete,
    List,
    Watch,
    WatchRecursive,
    Lock,
    TryLock,
    Unlock,
}

struct OpError {
    op: Operation,
    path: Regex,
    kind: TopoErrorKind,
    one_time: bool,
}

/// Lock state of a node: the holder's contents plus the signal that wakes
/// every waiter on release.
struct NodeLock {
    contents: String,
    released: watchch::Sender<bool>,
}

enum Watcher {
    File(mpsc::UnboundedSender<WatchData>),
    Recursive(mpsc::UnboundedSender<WatchDataRecursive>),
}

/// One node of a namespace tree: either a file (`contents`) or a directory
/// (`children`), never both.
#[derive(Default)]
struct Node {
    version: u64,
    contents: Option<Vec<u8>>,
    children: Option<BTreeMap<String, Node>>,
    lock: Option<NodeLock>,
    watches: HashMap<u64, Watcher>,
}

impl Node {
    fn new_directory() -> Self {
        Node {
            children: Some(BTreeMap::new()),
            ..Node::default()
        }
    }

    fn new_file(contents: Vec<u8>, version: u64) -> Self {
        Node {
            version,
            contents: Some(contents),
            ..Node::default()
        }
    }

    fn is_directory(&self) -> bool {
        self.children.is_some()
    }

    /// Senders of every recursive watcher registered on this node.
    fn recursive_watchers(&self) -> Vec<mpsc::UnboundedSender<WatchDataRecursive>> {
        self.watches
            .values()
            .filter_map(|w| match w {
                Watcher::Recursive(sender) => Some(sender.clone()),
                Watcher::File(_) => None,
            })
            .collect()
    }
}

struct FactoryState {
    /// One namespace tree per cell name; `global` is just another entry.
    cells: HashMap<String, Node>,
    /// Monotonically increasing version counter, shared by all paths.
    generation: u64,
    /// When set, every subsequent call fails with this error.
    err: Option<TopoErrorKind>,
    op_errors: Vec<OpError>,
    next_watch_id: u64,
}

impl FactoryState {
    fn next_version(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn take_operation_error(&mut self, op: Operation, path: &str) -> Option<TopoError> {
        let idx = self
            .op_errors
            .iter()
            .position(|e| e.op == op && e.path.is_match(path))?;
        let kind = self.op_errors[idx].kind.clone();
        if self.op_errors[idx].one_time {
            self.op_errors.remove(idx);
        }
        Some(kind.into())
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn node_by_path<'a>(state: &'a FactoryState, cell: &str, path: &str) -> Option<&'a Node> {
    let mut node = state.cells.get(cell)?;
    for segment in split_path(path) {
        node = node.children.as_ref()?.get(segment)?;
    }
    Some(node)
}

fn node_by_path_mut<'a>(
    state: &'a mut FactoryState,
    cell: &str,
    path: &str,
) -> Option<&'a mut Node> {
    let mut node = state.cells.get_mut(cell)?;
    for segment in split_path(path) {
        node = node.children.as_mut()?.get_mut(segment)?;
    }
    Some(node)
}

/// Walk to `path`, creating the namespace root and any missing intermediate
/// node as a directory. Returns `None` when an existing file is in the way.
fn get_or_create_path<'a>(
    state: &'a mut FactoryState,
    cell: &str,
    path: &str,
) -> Option<&'a mut Node> {
    let mut node = state
        .cells
        .entry(cell.to_owned())
        .or_insert_with(Node::new_directory);
    for segment in split_path(path) {
        node = node
            .children
            .as_mut()?
            .entry(segment.to_owned())
            .or_insert_with(Node::new_directory);
    }
    Some(node)
}

/// The factory behind every memory connection, holding the shared trees and
/// the fault-injection registry.
pub struct MemoryFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FactoryState {
                cells: HashMap::new(),
                generation: 0,
                err: None,
                op_errors: Vec::new(),
                next_watch_id: 0,
            })),
        }
    }

    /// Make every call matching `(op, path_pattern)` fail with `kind` until
    /// the entry is superseded.
    pub fn add_operation_error(&self, op: Operation, path_pattern: &str, kind: TopoErrorKind) {
        self.push_op_error(op, path_pattern, kind, false);
    }

    /// Make the first call matching `(op, path_pattern)` fail with `kind`;
    /// later calls proceed normally.
    pub fn add_one_time_operation_error(
        &self,
        op: Operation,
        path_pattern: &str,
        kind: TopoErrorKind,
    ) {
        self.push_op_error(op, path_pattern, kind, true);
    }

    fn push_op_error(&self, op: Operation, path_pattern: &str, kind: TopoErrorKind, one_time: bool) {
        let path = Regex::new(path_pattern).expect("invalid operation error pattern");
        let mut state = self.state.lock().expect("memory topo state poisoned");
        state.op_errors.push(OpError {
            op,
            path,
            kind,
            one_time,
        });
    }

    /// Poison the whole factory: every subsequent call on any connection
    /// fails with `kind`.
    pub fn set_error(&self, kind: TopoErrorKind) {
        let mut state = self.state.lock().expect("memory topo state poisoned");
        state.err = Some(kind);
    }
}

impl Default for MemoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Factory for MemoryFactory {
    fn create(
        &self,
        cell: &str,
        _root: &str,
        _server_addresses: &[String],
    ) -> Result<Arc<dyn Conn>, TopoError> {
        let mut state = self.state.lock().expect("memory topo state poisoned");
        if let Some(kind) = &state.err {
            return Err(kind.clone().into());
        }
        state
            .cells
            .entry(cell.to_owned())
            .or_insert_with(Node::new_directory);
        Ok(Arc::new(MemoryConn {
            state: self.state.clone(),
            cell: cell.to_owned(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One connection to one cell namespace of a [`MemoryFactory`].
pub struct MemoryConn {
    state: Arc<Mutex<FactoryState>>,
    cell: String,
    closed: AtomicBool,
}

impl MemoryConn {
    /// Entry check shared by every operation: connection liveness, context,
    /// factory poisoning, and fault injection, in that order.
    fn begin_op(
        &self,
        ctx: &Context,
        op: Operation,
        path: &str,
    ) -> Result<MutexGuard<'_, FactoryState>, TopoError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TopoError::internal("use of closed topology connection"));
        }
        if ctx.is_done() {
            return Err(ctx.error(path));
        }
        let mut state = self.state.lock().expect("memory topo state poisoned");
        if let Some(kind) = &state.err {
            return Err(kind.clone().into());
        }
        if let Some(err) = state.take_operation_error(op, path) {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl Conn for MemoryConn {
    async fn create(
        &self,
        ctx: &Context,
        path: &str,
        contents: &[u8],
    ) -> Result<Version, TopoError> {
        self.file_create(ctx, path, contents)
    }

    async fn get(&self, ctx: &Context, path: &str) -> Result<(Vec<u8>, Version), TopoError> {
        self.file_get(ctx, path)
    }

    async fn update(
        &self,
        ctx: &Context,
        path: &str,
        contents: &[u8],
        version: Option<&Version>,
    ) -> Result<Version, TopoError> {
        self.file_update(ctx, path, contents, version)
    }

    async fn delete(
        &self,
        ctx: &Context,
        path: &str,
        version: Option<&Version>,
    ) -> Result<(), TopoError> {
        self.file_delete(ctx, path, version)
    }

    async fn list_dir(
        &self,
        ctx: &Context,
        dir_path: &str,
        full: bool,
    ) -> Result<Vec<multipg_topo_common::DirEntry>, TopoError> {
        self.dir_list(ctx, dir_path, full)
    }

    async fn list(
        &self,
        ctx: &Context,
        path_prefix: &str,
    ) -> Result<Vec<multipg_topo_common::KvEntry>, TopoError> {
        self.deep_list(ctx, path_prefix)
    }

    async fn watch(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<(WatchData, multipg_topo_common::WatchStream), TopoError> {
        self.watch_file(ctx, path)
    }

    async fn watch_recursive(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<
        (
            Vec<WatchDataRecursive>,
            multipg_topo_common::RecursiveWatchStream,
        ),
        TopoError,
    > {
        self.watch_subtree(ctx, path)
    }

    async fn lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        {
            let _guard = self.begin_op(ctx, Operation::Lock, dir_path)?;
        }
        self.acquire_lock(ctx, dir_path, contents, false).await
    }

    async fn lock_with_ttl(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
        _ttl: std::time::Duration,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        // TTLs are not supported in the memory backend; behaves like `lock`.
        {
            let _guard = self.begin_op(ctx, Operation::Lock, dir_path)?;
        }
        self.acquire_lock(ctx, dir_path, contents, false).await
    }

    async fn lock_name(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        self.acquire_lock(ctx, dir_path, contents, true).await
    }

    async fn try_lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        {
            let mut state = self.begin_op(ctx, Operation::TryLock, dir_path)?;
            self.check_lock_free(&mut state, dir_path)?;
        }
        self.acquire_lock(ctx, dir_path, contents, false).await
    }

    fn close(&self) -> Result<(), TopoError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

static REGISTER: Once = Once::new();

/// Register the memory backend in the process-wide factory registry under
/// the name `memory`. Safe to call more than once.
pub fn register() {
    REGISTER.call_once(|| {
        register_factory(IMPLEMENTATION_NAME, Arc::new(MemoryFactory::new()));
    });
}

/// Build a store backed by a fresh memory factory, with one cell record
/// pre-created per name in `cells`, and return the factory alongside for
/// fault injection.
pub async fn new_server_and_factory(
    ctx: &Context,
    cells: &[&str],
) -> (TopoStore, Arc<MemoryFactory>) {
    let factory = Arc::new(MemoryFactory::new());
    let ts = TopoStore::with_factory(factory.clone(), "/", &["memory".to_owned()])
        .expect("failed to open memory topology store");
    for cell in cells {
        let record = Cell {
            name: (*cell).to_owned(),
            server_addresses: vec!["memory".to_owned()],
            root: "/".to_owned(),
        };
        ts.create_cell(ctx, cell, &record)
            .await
            .unwrap_or_else(|e| panic!("failed to create cell {}: {}", cell, e));
    }
    (ts, factory)
}

/// Like [`new_server_and_factory`], for callers that don't need the factory.
pub async fn new_server(ctx: &Context, cells: &[&str]) -> TopoStore {
    new_server_and_factory(ctx, cells).await.0
}
