//! Change notifications of the memory backend.
//!
//! Every mutation pushes an event to the changed node's subscribers and to
//! recursive subscribers on its ancestors (see `file.rs`). This module only
//! handles subscribing: it registers the channel on the node and spawns the
//! task that delivers the terminal `Interrupted` event when the caller's
//! context ends.

use tokio::sync::mpsc;

use multipg_topo_common::{
    KvEntry, RecursiveWatchStream, TopoError, Version, WatchData, WatchDataRecursive, WatchStream,
};

use crate::{
    get_or_create_path, node_by_path_mut, split_path, Context, MemoryConn, Node, Operation,
    Watcher,
};

impl MemoryConn {
    pub(crate) fn watch_file(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<(WatchData, WatchStream), TopoError> {
        let mut state = self.begin_op(ctx, Operation::Watch, path)?;
        state.next_watch_id += 1;
        let watch_id = state.next_watch_id;

        let node = node_by_path_mut(&mut state, &self.cell, path)
            .filter(|n| !n.is_directory())
            .ok_or_else(|| TopoError::no_node(path))?;
        let current = WatchData {
            contents: node.contents.clone().unwrap_or_default(),
            version: Version::from(node.version),
            err: None,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        node.watches.insert(watch_id, Watcher::File(tx));
        drop(state);

        // When the subscriber's context ends, deregister and deliver the
        // terminal event; dropping the sender then closes the stream.
        let state = self.state.clone();
        let cell = self.cell.clone();
        let path = path.to_owned();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            ctx.done().await;
            let mut state = state.lock().expect("memory topo state poisoned");
            if let Some(node) = node_by_path_mut(&mut state, &cell, &path) {
                if let Some(Watcher::File(sender)) = node.watches.remove(&watch_id) {
                    let _ = sender.send(WatchData {
                        contents: Vec::new(),
                        version: Version::from(0),
                        err: Some(ctx.error(&path)),
                    });
                }
            }
        });

        Ok((current, rx))
    }

    pub(crate) fn watch_subtree(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<(Vec<WatchDataRecursive>, RecursiveWatchStream), TopoError> {
        let mut state = self.begin_op(ctx, Operation::WatchRecursive, path)?;
        state.next_watch_id += 1;
        let watch_id = state.next_watch_id;

        let node = get_or_create_path(&mut state, &self.cell, path)
            .ok_or_else(|| TopoError::no_node(path))?;

        let mut files = Vec::new();
        collect_current(node, format!("/{}", split_path(path).join("/")), &mut files);
        let initial = files
            .into_iter()
            .map(|entry| WatchDataRecursive {
                path: entry.key,
                data: WatchData {
                    contents: entry.value,
                    version: entry.version,
                    err: None,
                },
            })
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        node.watches.insert(watch_id, Watcher::Recursive(tx));
        drop(state);

        let state = self.state.clone();
        let cell = self.cell.clone();
        let path = path.to_owned();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            ctx.done().await;
            let mut state = state.lock().expect("memory topo state poisoned");
            if let Some(node) = node_by_path_mut(&mut state, &cell, &path) {
                if let Some(Watcher::Recursive(sender)) = node.watches.remove(&watch_id) {
                    let _ = sender.send(WatchDataRecursive {
                        path: path.clone(),
                        data: WatchData {
                            contents: Vec::new(),
                            version: Version::from(0),
                            err: Some(ctx.error(&path)),
                        },
                    });
                }
            }
        });

        Ok((initial, rx))
    }
}

fn collect_current(node: &Node, key: String, out: &mut Vec<KvEntry>) {
    if let Some(contents) = &node.contents {
        out.push(KvEntry {
            key,
            value: contents.clone(),
            version: Version::from(node.version),
        });
        return;
    }
    if let Some(children) = &node.children {
        for (name, child) in children {
            collect_current(child, format!("{}/{}", key, name), out);
        }
    }
}
