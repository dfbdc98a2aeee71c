//! File operations of the memory backend: versioned create / get / update /
//! delete plus the deep recursive listing.

use tokio::sync::mpsc;

use multipg_topo_common::{KvEntry, TopoError, Version, WatchData, WatchDataRecursive};

use crate::{
    node_by_path, node_by_path_mut, split_path, Context, FactoryState, MemoryConn, Node, Operation,
    Watcher,
};

/// Insert a new file node at `path`, creating intermediate directories.
/// Returns the version assigned to the file.
fn create_file_at(
    state: &mut FactoryState,
    cell: &str,
    path: &str,
    contents: &[u8],
) -> Result<u64, TopoError> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Err(TopoError::internal(format!(
            "cannot create file at {:?}",
            path
        )));
    }
    let version = state.next_version();

    let mut node = state
        .cells
        .entry(cell.to_owned())
        .or_insert_with(Node::new_directory);
    for segment in &segments[..segments.len() - 1] {
        node = node
            .children
            .as_mut()
            .ok_or_else(|| TopoError::no_node(path))?
            .entry((*segment).to_owned())
            .or_insert_with(Node::new_directory);
    }
    let children = node
        .children
        .as_mut()
        .ok_or_else(|| TopoError::no_node(path))?;
    let leaf = *segments.last().expect("segments checked non-empty");
    if children.contains_key(leaf) {
        return Err(TopoError::node_exists(path));
    }
    children.insert(leaf.to_owned(), Node::new_file(contents.to_vec(), version));
    Ok(version)
}

/// Senders of every recursive watcher on the path's ancestor chain,
/// including the namespace root and the node itself when present.
fn recursive_watchers_on_path(
    state: &FactoryState,
    cell: &str,
    path: &str,
) -> Vec<mpsc::UnboundedSender<WatchDataRecursive>> {
    let mut senders = Vec::new();
    let Some(mut node) = state.cells.get(cell) else {
        return senders;
    };
    senders.extend(node.recursive_watchers());
    for segment in split_path(path) {
        match node.children.as_ref().and_then(|c| c.get(segment)) {
            Some(child) => {
                senders.extend(child.recursive_watchers());
                node = child;
            }
            None => break,
        }
    }
    senders
}

fn absolute_path(path: &str) -> String {
    format!("/{}", split_path(path).join("/"))
}

/// Push one change notification to the file's subscribers and to every
/// recursive subscriber watching an ancestor.
fn notify_change(state: &FactoryState, cell: &str, path: &str, contents: &[u8], version: u64) {
    if let Some(node) = node_by_path(state, cell, path) {
        for watcher in node.watches.values() {
            if let Watcher::File(sender) = watcher {
                let _ = sender.send(WatchData {
                    contents: contents.to_vec(),
                    version: Version::from(version),
                    err: None,
                });
            }
        }
    }
    let abs = absolute_path(path);
    for sender in recursive_watchers_on_path(state, cell, path) {
        let _ = sender.send(WatchDataRecursive {
            path: abs.clone(),
            data: WatchData {
                contents: contents.to_vec(),
                version: Version::from(version),
                err: None,
            },
        });
    }
}

/// Remove the file at `segments` under `parent`, pruning directories that
/// become empty on the way out. Returns the removed node.
fn delete_recursive(
    parent: &mut Node,
    path: &str,
    segments: &[&str],
    version: Option<&Version>,
) -> Result<Node, TopoError> {
    let children = parent
        .children
        .as_mut()
        .ok_or_else(|| TopoError::no_node(path))?;
    let name = segments[0];
    if segments.len() == 1 {
        let child = children.get(name).ok_or_else(|| TopoError::no_node(path))?;
        if child.is_directory() {
            return Err(TopoError::no_node(path));
        }
        if let Some(v) = version {
            if v.as_u64() != child.version {
                return Err(TopoError::bad_version(path));
            }
        }
        return Ok(children.remove(name).expect("child looked up above"));
    }

    let child = children
        .get_mut(name)
        .ok_or_else(|| TopoError::no_node(path))?;
    let removed = delete_recursive(child, path, &segments[1..], version)?;
    let prunable = child.is_directory()
        && child.children.as_ref().is_some_and(|c| c.is_empty())
        && child.watches.is_empty()
        && child.lock.is_none();
    if prunable {
        children.remove(name);
    }
    Ok(removed)
}

impl MemoryConn {
    pub(crate) fn file_create(
        &self,
        ctx: &Context,
        path: &str,
        contents: &[u8],
    ) -> Result<Version, TopoError> {
        let mut state = self.begin_op(ctx, Operation::Create, path)?;
        let version = create_file_at(&mut state, &self.cell, path, contents)?;
        notify_change(&state, &self.cell, path, contents, version);
        Ok(Version::from(version))
    }

    pub(crate) fn file_get(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<(Vec<u8>, Version), TopoError> {
        let state = self.begin_op(ctx, Operation::Get, path)?;
        let node = node_by_path(&state, &self.cell, path)
            .filter(|n| !n.is_directory())
            .ok_or_else(|| TopoError::no_node(path))?;
        Ok((
            node.contents.clone().unwrap_or_default(),
            Version::from(node.version),
        ))
    }

    pub(crate) fn file_update(
        &self,
        ctx: &Context,
        path: &str,
        contents: &[u8],
        version: Option<&Version>,
    ) -> Result<Version, TopoError> {
        let mut state = self.begin_op(ctx, Operation::Update, path)?;

        let exists = match node_by_path(&state, &self.cell, path) {
            Some(node) if node.is_directory() => return Err(TopoError::no_node(path)),
            Some(node) => {
                if let Some(v) = version {
                    if v.as_u64() != node.version {
                        return Err(TopoError::bad_version(path));
                    }
                }
                true
            }
            None => {
                if version.is_some() {
                    return Err(TopoError::no_node(path));
                }
                false
            }
        };

        let new_version = if exists {
            let v = state.next_version();
            let node = node_by_path_mut(&mut state, &self.cell, path).expect("node checked above");
            node.contents = Some(contents.to_vec());
            node.version = v;
            v
        } else {
            // Unconditional update of a missing file is a create.
            create_file_at(&mut state, &self.cell, path, contents)?
        };
        notify_change(&state, &self.cell, path, contents, new_version);
        Ok(Version::from(new_version))
    }

    pub(crate) fn file_delete(
        &self,
        ctx: &Context,
        path: &str,
        version: Option<&Version>,
    ) -> Result<(), TopoError> {
        let mut state = self.begin_op(ctx, Operation::Delete, path)?;
        let segments = split_path(path);
        if segments.is_empty() {
            return Err(TopoError::internal(format!(
                "cannot delete file at {:?}",
                path
            )));
        }

        // Ancestors are collected before the walk prunes any of them.
        let recursive = recursive_watchers_on_path(&state, &self.cell, path);

        let root = state
            .cells
            .get_mut(&self.cell)
            .ok_or_else(|| TopoError::no_node(path))?;
        let removed = delete_recursive(root, path, &segments, version)?;

        // The deleted file's subscribers get a terminal NoNode; dropping the
        // senders afterwards closes their streams.
        for watcher in removed.watches.into_values() {
            if let Watcher::File(sender) = watcher {
                let _ = sender.send(WatchData {
                    contents: Vec::new(),
                    version: Version::from(0),
                    err: Some(TopoError::no_node(path)),
                });
            }
        }
        let abs = absolute_path(path);
        for sender in recursive {
            let _ = sender.send(WatchDataRecursive {
                path: abs.clone(),
                data: WatchData {
                    contents: Vec::new(),
                    version: Version::from(0),
                    err: Some(TopoError::no_node(path)),
                },
            });
        }
        Ok(())
    }

    pub(crate) fn deep_list(
        &self,
        ctx: &Context,
        path_prefix: &str,
    ) -> Result<Vec<KvEntry>, TopoError> {
        let state = self.begin_op(ctx, Operation::List, path_prefix)?;
        let root = state
            .cells
            .get(&self.cell)
            .ok_or_else(|| TopoError::no_node(path_prefix))?;

        let mut entries = Vec::new();
        collect_files(root, String::new(), &mut entries);
        // Matching is by substring of the absolute key, not by path prefix.
        entries.retain(|e| e.key.contains(path_prefix));
        if entries.is_empty() {
            return Err(TopoError::no_node(path_prefix));
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

fn collect_files(node: &Node, key: String, out: &mut Vec<KvEntry>) {
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
            collect_files(child, format!("{}/{}", key, name), out);
        }
    }
}
