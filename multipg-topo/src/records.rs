//! The wire schema of every record stored in the topology.
//!
//! Records are encoded as protobuf messages so the schema stays stable
//! across versions; fields are append-only and identified by tag. The
//! version tag a backend hands back with each read lives outside the record
//! (see the `*Info` containers), so records themselves never change shape
//! on a write.

use std::collections::BTreeMap;

use prost::{Enumeration, Message};

/// The kind of a cluster component registered in a cell topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ComponentKind {
    Unknown = 0,
    Multigateway = 1,
    Multipooler = 2,
    Multiorch = 3,
    Pgctld = 4,
}

/// Identity of one component instance: `(kind, cell, name)`.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct ComponentId {
    #[prost(enumeration = "ComponentKind", tag = "1")]
    pub component: i32,
    #[prost(string, tag = "2")]
    pub cell: String,
    #[prost(string, tag = "3")]
    pub name: String,
}

/// A deployment region/zone with its own topology namespace.
///
/// Cell records are not meant to change while the system is running: one can
/// be added at any time and read on demand, but it can only be removed once
/// no database references it in its `cells` list.
#[derive(Clone, PartialEq, Message)]
pub struct Cell {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Addresses of the topology servers backing this cell's namespace.
    #[prost(string, repeated, tag = "2")]
    pub server_addresses: Vec<String>,
    /// Root path prefix for this cell inside the backend.
    #[prost(string, tag = "3")]
    pub root: String,
}

/// A logical database, possibly spanning several cells.
#[derive(Clone, PartialEq, Message)]
pub struct Database {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub backup_location: String,
    /// Free-form durability policy, e.g. `async`, `semi_sync`, `sync`.
    #[prost(string, tag = "3")]
    pub durability_policy: String,
    /// Names of the cells this database is deployed to.
    #[prost(string, repeated, tag = "4")]
    pub cells: Vec<String>,
}

/// A client-facing proxy instance registered in a cell.
#[derive(Clone, PartialEq, Message)]
pub struct MultiGateway {
    #[prost(message, optional, tag = "1")]
    pub id: Option<ComponentId>,
    #[prost(string, tag = "2")]
    pub hostname: String,
    /// Named ports this instance listens on; a `grpc` entry is expected by
    /// convention.
    #[prost(btree_map = "string, int32", tag = "3")]
    pub port_map: BTreeMap<String, i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum PoolerType {
    Unknown = 0,
    Primary = 1,
    Replica = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ServingStatus {
    Unknown = 0,
    Serving = 1,
    NotServing = 2,
}

/// A connection-pooler instance registered in a cell, serving one shard of
/// one database.
#[derive(Clone, PartialEq, Message)]
pub struct MultiPooler {
    #[prost(message, optional, tag = "1")]
    pub id: Option<ComponentId>,
    #[prost(string, tag = "2")]
    pub hostname: String,
    #[prost(btree_map = "string, int32", tag = "3")]
    pub port_map: BTreeMap<String, i32>,
    /// Name of the database this pooler serves.
    #[prost(string, tag = "4")]
    pub database: String,
    /// Name of the shard this pooler serves.
    #[prost(string, tag = "5")]
    pub shard: String,
    #[prost(enumeration = "PoolerType", tag = "6")]
    pub pooler_type: i32,
    #[prost(enumeration = "ServingStatus", tag = "7")]
    pub serving_status: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn records_roundtrip_through_the_wire_schema() {
        let pooler = MultiPooler {
            id: Some(ComponentId {
                component: ComponentKind::Multipooler as i32,
                cell: "zone-1".to_owned(),
                name: "pooler1".to_owned(),
            }),
            hostname: "host1".to_owned(),
            port_map: BTreeMap::from([("grpc".to_owned(), 8080)]),
            database: "db1".to_owned(),
            shard: "0".to_owned(),
            pooler_type: PoolerType::Primary as i32,
            serving_status: ServingStatus::Serving as i32,
        };
        let bytes = pooler.encode_to_vec();
        let decoded = MultiPooler::decode(bytes.as_slice()).unwrap();
        assert_eq!(pooler, decoded);
        assert_eq!(decoded.pooler_type(), PoolerType::Primary);
    }

    #[test]
    fn unknown_enum_values_decay_to_unknown() {
        let mut pooler = MultiPooler::default();
        pooler.pooler_type = 42;
        assert_eq!(pooler.pooler_type(), PoolerType::Unknown);
    }
}
