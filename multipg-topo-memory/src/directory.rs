//! Directory listing of the memory backend.

use multipg_topo_common::{DirEntry, DirEntryKind, TopoError};

use crate::{node_by_path, Context, MemoryConn, Operation};

impl MemoryConn {
    pub(crate) fn dir_list(
        &self,
        ctx: &Context,
        dir_path: &str,
        full: bool,
    ) -> Result<Vec<DirEntry>, TopoError> {
        let state = self.begin_op(ctx, Operation::ListDir, dir_path)?;

        let node = node_by_path(&state, &self.cell, dir_path)
            .ok_or_else(|| TopoError::no_node(dir_path))?;
        let children = node.children.as_ref().ok_or_else(|| {
            TopoError::internal(format!(
                "node {} in cell {} is not a directory",
                dir_path, self.cell
            ))
        })?;

        // BTreeMap iteration gives the by-name ordering the contract asks
        // for.
        let mut result = Vec::with_capacity(children.len());
        for (name, child) in children {
            let mut entry = DirEntry {
                name: name.clone(),
                ..DirEntry::default()
            };
            if full {
                entry.kind = if child.is_directory() {
                    DirEntryKind::Directory
                } else {
                    DirEntryKind::File
                };
            }
            result.push(entry);
        }
        Ok(result)
    }
}
