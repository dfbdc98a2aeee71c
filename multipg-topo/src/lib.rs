//! Read and write topology data for a multipg cluster.
//!
//! Data is split across two kinds of namespaces, each reached through its
//! own [`Conn`](multipg_topo_common::Conn):
//!
//! 1. The global topology: cluster-level static metadata — the databases
//!    and the location of every cell.
//! 2. Cell topologies: per-cell catalogs of dynamic component state
//!    (gateways, poolers). Each cell is logically distinct and accessed
//!    through a separate, cached connection.
//!
//! ```text
//!      +----------------------+
//!      |    Global topology   |
//!      |----------------------|
//!      | - Databases          |
//!      | - Cell locations     |
//!      +----------+-----------+
//!                 |
//!      +----------+-----------+
//!      |                      |
//! +----v--------+      +------v------+
//! | Cell topo A |      | Cell topo B |
//! |-------------|      |-------------|
//! | - Gateways  |      | - Gateways  |
//! | - Poolers   |      | - Poolers   |
//! +-------------+      +-------------+
//! ```
//!
//! [`TopoStore`] is the public façade over both. Typed helpers marshal the
//! records in [`records`], choose the right connection, and layer
//! optimistic-retry update loops and parallel fan-out reads on top of the
//! backend primitives.

#[macro_use]
extern crate slog_scope;

pub mod cell;
pub mod database;
pub mod gateway;
pub mod pooler;
pub mod records;
pub mod store;
pub mod utils;

pub use gateway::{new_multi_gateway, MultiGatewayInfo};
pub use pooler::{
    new_multi_pooler, DatabaseShard, GetMultiPoolersByCellOptions, MultiPoolerInfo,
};
pub use store::{FanoutResult, TopoStore, DEFAULT_READ_CONCURRENCY};

/// Name of the global topology namespace. It holds the minimum pieces of
/// information needed to connect to a multipg cluster: database records and
/// cell locations.
pub const GLOBAL_CELL: &str = "global";

/// Filenames for all object types.
pub const CELL_FILE: &str = "Cell";
pub const DATABASE_FILE: &str = "Database";
pub const GATEWAY_FILE: &str = "Gateway";
pub const POOLER_FILE: &str = "Pooler";

/// Directory paths for all object types in the topology hierarchy.
pub const CELLS_PATH: &str = "cells";
pub const DATABASES_PATH: &str = "databases";
pub const GATEWAYS_PATH: &str = "gateways";
pub const POOLERS_PATH: &str = "poolers";
