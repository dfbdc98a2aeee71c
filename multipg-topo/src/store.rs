//! The topology store façade: one connection to the global namespace plus
//! lazily-created, cached connections to each cell's namespace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use multipg_topo_common::{get_factory, Conn, Context, Factory, TopoError};

use crate::records::Cell;
use crate::GLOBAL_CELL;

/// Default bound on concurrent reads during fan-outs, so a large cell cannot
/// overwhelm the topology server.
pub const DEFAULT_READ_CONCURRENCY: usize = 32;

/// The outcome of a fan-out read: every record that could be read, plus the
/// `PartialResult` error when some reads failed with anything other than
/// `NoNode` (a concurrently-deleted record is silently skipped).
#[derive(Debug, Default)]
pub struct FanoutResult<T> {
    pub records: T,
    pub partial_err: Option<TopoError>,
}

struct CellConn {
    cell: Cell,
    conn: Arc<dyn Conn>,
}

/// The full topology API over global and cell namespaces.
///
/// Connections to cells are created on demand by reading the cell's location
/// from the global namespace, and cached until the cell's configuration
/// changes or the store is closed.
pub struct TopoStore {
    global: Arc<dyn Conn>,
    factory: Arc<dyn Factory>,
    cell_conns: Mutex<HashMap<String, CellConn>>,
}

impl TopoStore {
    /// Create a store from a backend factory, opening the global connection.
    pub fn with_factory(
        factory: Arc<dyn Factory>,
        root: &str,
        server_addresses: &[String],
    ) -> Result<Self, TopoError> {
        let global = factory.create(GLOBAL_CELL, root, server_addresses)?;
        Ok(Self {
            global,
            factory,
            cell_conns: Mutex::new(HashMap::new()),
        })
    }

    /// Open a store using a registered backend implementation, the root path
    /// and the addresses of the global topology servers. An unknown
    /// implementation name fails with `NoImplementation`.
    pub fn open(
        implementation: &str,
        root: &str,
        server_addresses: &[String],
    ) -> Result<Self, TopoError> {
        let factory = get_factory(implementation)?;
        Self::with_factory(factory, root, server_addresses)
    }

    pub fn global_conn(&self) -> &Arc<dyn Conn> {
        &self.global
    }

    /// Return a connection to the topology namespace of the given cell,
    /// reusing a cached one when the cell's configuration hasn't changed.
    pub async fn conn_for_cell(&self, ctx: &Context, cell: &str) -> Result<Arc<dyn Conn>, TopoError> {
        ctx.check()?;

        // Global cell is the easy case.
        if cell == GLOBAL_CELL {
            return Ok(self.global.clone());
        }

        // Fetch the cell's addresses from the global namespace.
        let ci = self
            .get_cell(ctx, cell)
            .await
            .map_err(|e| e.wrap(format!("cannot find cell {} in topology", cell)))?;

        let mut conns = self.cell_conns.lock().expect("cell conn cache poisoned");
        if let Some(cached) = conns.get(cell) {
            // The cell name can be reused with different server addresses
            // and/or root, in which case the cached connection is stale.
            if cached.cell.server_addresses == ci.server_addresses && cached.cell.root == ci.root {
                return Ok(cached.conn.clone());
            }
            let stale = conns.remove(cell).expect("cached conn vanished");
            if let Err(e) = stale.conn.close() {
                warn!("failed to close stale cell connection"; "cell" => cell, "error" => %e);
            }
        }

        // Connect while holding the cache lock, so only one connection is
        // established per cell per configuration change.
        let conn = self
            .factory
            .create(cell, &ci.root, &ci.server_addresses)
            .map_err(|e| {
                e.wrap(format!(
                    "failed to create topo connection to {}, {}",
                    ci.server_addresses.join(","),
                    ci.root
                ))
            })?;
        conns.insert(
            cell.to_owned(),
            CellConn {
                cell: ci,
                conn: conn.clone(),
            },
        );
        Ok(conn)
    }

    /// Close the global connection and every cached cell connection,
    /// combining any failures into one error.
    pub fn close(&self) -> Result<(), TopoError> {
        let mut errs: Vec<String> = Vec::new();

        if let Err(e) = self.global.close() {
            errs.push(format!("failed to close global topo: {}", e));
        }

        let mut conns = self.cell_conns.lock().expect("cell conn cache poisoned");
        for (cell, cc) in conns.drain() {
            if let Err(e) = cc.conn.close() {
                errs.push(format!("failed to close cell connection {}: {}", cell, e));
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(TopoError::internal(format!(
                "errors occurred while closing connections: {}",
                errs.join("; ")
            )))
        }
    }
}
