//! Advisory locks of the memory backend.
//!
//! A node's lock state is the holder's contents plus a release signal.
//! Acquisition spins: while some holder is registered, the caller subscribes
//! to the release signal, drops the factory mutex, and waits for the signal
//! or its context; on wake it retries from scratch. Releasing clears the
//! state and fires the signal, waking every waiter at once.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch as watchch;

use multipg_topo_common::{Context, LockDescriptor, TopoError};

use crate::{
    get_or_create_path, node_by_path, node_by_path_mut, FactoryState, MemoryConn, NodeLock,
    Operation,
};

struct MemoryLockDescriptor {
    state: Arc<Mutex<FactoryState>>,
    cell: String,
    dir_path: String,
}

#[async_trait]
impl LockDescriptor for MemoryLockDescriptor {
    async fn check(&self, _ctx: &Context) -> Result<(), TopoError> {
        // A lock can never be lost in this implementation.
        Ok(())
    }

    async fn unlock(&self, _ctx: &Context) -> Result<(), TopoError> {
        let mut state = self.state.lock().expect("memory topo state poisoned");
        if let Some(err) = state.take_operation_error(Operation::Unlock, &self.dir_path) {
            return Err(err);
        }
        let node = node_by_path_mut(&mut state, &self.cell, &self.dir_path)
            .ok_or_else(|| TopoError::no_node(&self.dir_path))?;
        let lock = node
            .lock
            .take()
            .ok_or_else(|| TopoError::internal(format!("node {} is not locked", self.dir_path)))?;
        // Wake every waiter; dropping the sender would do the same, sending
        // makes it explicit.
        let _ = lock.released.send(true);
        Ok(())
    }
}

impl MemoryConn {
    /// `NodeExists` when a lock is currently held on the path, `NoNode` when
    /// the path doesn't exist.
    pub(crate) fn check_lock_free(
        &self,
        state: &mut FactoryState,
        dir_path: &str,
    ) -> Result<(), TopoError> {
        let node =
            node_by_path(state, &self.cell, dir_path).ok_or_else(|| TopoError::no_node(dir_path))?;
        if let Some(lock) = &node.lock {
            return Err(TopoError::node_exists(format!(
                "lock already held on {} by {:?}",
                dir_path, lock.contents
            )));
        }
        Ok(())
    }

    pub(crate) async fn acquire_lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
        named: bool,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TopoError::internal("use of closed topology connection"));
            }
            if ctx.is_done() {
                return Err(ctx.error(dir_path));
            }

            let mut released = {
                let mut state = self.state.lock().expect("memory topo state poisoned");
                if let Some(kind) = &state.err {
                    return Err(kind.clone().into());
                }

                let node = if named {
                    get_or_create_path(&mut state, &self.cell, dir_path)
                } else {
                    node_by_path_mut(&mut state, &self.cell, dir_path)
                };
                let node = match node {
                    Some(node) => node,
                    None => return Err(TopoError::no_node(dir_path)),
                };

                match &node.lock {
                    // Someone else holds the lock: subscribe to its release
                    // signal before letting go of the mutex, then wait.
                    Some(lock) => lock.released.subscribe(),
                    None => {
                        let (tx, _rx) = watchch::channel(false);
                        node.lock = Some(NodeLock {
                            contents: contents.to_owned(),
                            released: tx,
                        });
                        return Ok(Box::new(MemoryLockDescriptor {
                            state: self.state.clone(),
                            cell: self.cell.clone(),
                            dir_path: dir_path.to_owned(),
                        }));
                    }
                }
            };

            tokio::select! {
                // Released (or the holder vanished): retry the acquisition.
                _ = released.changed() => continue,
                _ = ctx.done() => return Err(ctx.error(dir_path)),
            }
        }
    }
}
