//! Save / retrieve pooler records in a cell's topology namespace.

use std::collections::HashMap;
use std::fmt;

use futures::stream::{self, StreamExt};
use prost::Message;

use multipg_topo_common::{Context, TopoError, TopoErrorIntrospect, Version};

use crate::records::{ComponentId, ComponentKind, MultiPooler};
use crate::store::{FanoutResult, TopoStore, DEFAULT_READ_CONCURRENCY};
use crate::utils::{component_id_string, parse_component_id, random_name};
use crate::{POOLERS_PATH, POOLER_FILE};

/// Build a new pooler record for the given cell and host. An empty name is
/// replaced with a random one.
pub fn new_multi_pooler(name: &str, cell: &str, host: &str) -> MultiPooler {
    let name = if name.is_empty() {
        random_name(8)
    } else {
        name.to_owned()
    };
    MultiPooler {
        id: Some(ComponentId {
            component: ComponentKind::Multipooler as i32,
            cell: cell.to_owned(),
            name,
        }),
        hostname: host.to_owned(),
        ..MultiPooler::default()
    }
}

/// A pooler record read from the topology server, together with the version
/// that protects subsequent writes from stomping concurrent ones.
#[derive(Clone, Debug)]
pub struct MultiPoolerInfo {
    version: Version,
    pub pooler: MultiPooler,
}

impl MultiPoolerInfo {
    /// Should only be used by backend implementations and tests.
    pub fn new(pooler: MultiPooler, version: Version) -> Self {
        Self { version, pooler }
    }

    pub fn id_string(&self) -> String {
        match &self.pooler.id {
            Some(id) => component_id_string(id),
            None => "<missing id>".to_owned(),
        }
    }

    /// `hostname:grpc-port`, or the bare hostname when no grpc port is
    /// registered.
    pub fn addr(&self) -> String {
        match self.pooler.port_map.get("grpc") {
            Some(port) => format!("{}:{}", self.pooler.hostname, port),
            None => self.pooler.hostname.clone(),
        }
    }

    /// The version from the last time this pooler was read or updated.
    pub fn version(&self) -> &Version {
        &self.version
    }
}

impl fmt::Display for MultiPoolerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiPooler{{{}}}", self.id_string())
    }
}

/// A database/shard pair used to filter pooler reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseShard {
    pub database: String,
    /// An empty shard matches every shard of the database.
    pub shard: String,
}

impl DatabaseShard {
    fn matches(&self, pooler: &MultiPooler) -> bool {
        if self.database.is_empty() {
            return true;
        }
        if self.database != pooler.database {
            return false;
        }
        self.shard.is_empty() || self.shard == pooler.shard
    }
}

/// Options for [`TopoStore::get_multi_poolers_by_cell`].
#[derive(Clone, Debug, Default)]
pub struct GetMultiPoolersByCellOptions {
    /// Optional database/shard the poolers must serve.
    pub database_shard: Option<DatabaseShard>,
}

fn path_for_pooler(id: &ComponentId) -> String {
    format!(
        "{}/{}/{}",
        POOLERS_PATH,
        component_id_string(id),
        POOLER_FILE
    )
}

fn require_id(pooler: &MultiPooler) -> Result<&ComponentId, TopoError> {
    pooler
        .id
        .as_ref()
        .ok_or_else(|| TopoError::internal("multipooler record has no id"))
}

impl TopoStore {
    /// Read one pooler's record and version.
    pub async fn get_multi_pooler(
        &self,
        ctx: &Context,
        id: &ComponentId,
    ) -> Result<MultiPoolerInfo, TopoError> {
        let conn = self
            .conn_for_cell(ctx, &id.cell)
            .await
            .map_err(|e| e.wrap(format!("unable to get connection for cell {:?}", id.cell)))?;

        let (data, version) = conn
            .get(ctx, &path_for_pooler(id))
            .await
            .map_err(|e| e.wrap(format!("unable to get multipooler {}", component_id_string(id))))?;
        let pooler = MultiPooler::decode(data.as_slice())
            .map_err(|e| TopoError::internal(format!("failed to unmarshal multipooler data: {}", e)))?;

        Ok(MultiPoolerInfo { version, pooler })
    }

    /// IDs of all poolers registered in a cell, from the namespace listing.
    /// A cell without the namespace yields an empty vector; an unknown cell
    /// fails with `NoNode`.
    pub async fn get_multi_pooler_ids_by_cell(
        &self,
        ctx: &Context,
        cell: &str,
    ) -> Result<Vec<ComponentId>, TopoError> {
        let conn = self.conn_for_cell(ctx, cell).await?;

        let entries = match conn.list_dir(ctx, POOLERS_PATH, false).await {
            Ok(entries) => entries,
            Err(e) if e.is_no_node() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_component_id(&entry.name, cell) {
                Some(id) => ids.push(id),
                None => {
                    return Err(TopoError::internal(format!(
                        "unparseable pooler entry {} in cell {}",
                        entry.name, cell
                    )))
                }
            }
        }
        Ok(ids)
    }

    /// All poolers in a cell, optionally filtered by database/shard.
    ///
    /// Prefers one deep `List` of the namespace; when the backend cannot
    /// serve it (`NoImplementation`, `ResourceExhausted`), falls back to the
    /// namespace listing plus [`TopoStore::get_multi_pooler_map`]. In the
    /// fallback, records that fail to read degrade the result to a partial
    /// one instead of failing the whole call.
    pub async fn get_multi_poolers_by_cell(
        &self,
        ctx: &Context,
        cell: &str,
        opt: &GetMultiPoolersByCellOptions,
    ) -> Result<FanoutResult<Vec<MultiPoolerInfo>>, TopoError> {
        let conn = self.conn_for_cell(ctx, cell).await?;

        match conn.list(ctx, POOLERS_PATH).await {
            Ok(entries) => {
                let mut poolers = Vec::with_capacity(entries.len());
                for entry in entries {
                    let pooler = MultiPooler::decode(entry.value.as_slice()).map_err(|e| {
                        TopoError::internal(format!("failed to unmarshal multipooler data: {}", e))
                    })?;
                    if let Some(ds) = &opt.database_shard {
                        if !ds.matches(&pooler) {
                            continue;
                        }
                    }
                    poolers.push(MultiPoolerInfo {
                        version: entry.version,
                        pooler,
                    });
                }
                Ok(FanoutResult {
                    records: poolers,
                    partial_err: None,
                })
            }
            Err(e) if e.is_no_node() => Ok(FanoutResult::default()),
            Err(e) if e.is_no_implementation() || e.is_resource_exhausted() => {
                let ids = self.get_multi_pooler_ids_by_cell(ctx, cell).await?;
                let mapped = self
                    .get_multi_pooler_map(ctx, ids, opt.database_shard.as_ref())
                    .await;
                Ok(FanoutResult {
                    records: mapped.records.into_values().collect(),
                    partial_err: mapped.partial_err,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Bounded parallel read of a set of pooler records, keyed by their ID
    /// string. A `NoNode` read marks a concurrent deletion and is skipped
    /// silently; any other failure surfaces as a `PartialResult` error while
    /// the successfully-read records stay usable.
    pub async fn get_multi_pooler_map(
        &self,
        ctx: &Context,
        ids: Vec<ComponentId>,
        filter: Option<&DatabaseShard>,
    ) -> FanoutResult<HashMap<String, MultiPoolerInfo>> {
        let mut reads = stream::iter(ids.into_iter().map(|id| async move {
            let read = self.get_multi_pooler(ctx, &id).await;
            (id, read)
        }))
        .buffer_unordered(DEFAULT_READ_CONCURRENCY);

        let mut result = FanoutResult::<HashMap<String, MultiPoolerInfo>>::default();
        while let Some((id, read)) = reads.next().await {
            match read {
                Ok(info) => {
                    if let Some(ds) = filter {
                        if !ds.matches(&info.pooler) {
                            continue;
                        }
                    }
                    result.records.insert(component_id_string(&id), info);
                }
                Err(e) if e.is_no_node() => {}
                Err(e) => {
                    result.partial_err = Some(TopoError::partial_result(format!(
                        "failed to read multipooler {}: {}",
                        component_id_string(&id),
                        e
                    )));
                }
            }
        }
        result
    }

    /// Create a new pooler record and all paths leading to it.
    pub async fn create_multi_pooler(
        &self,
        ctx: &Context,
        pooler: &MultiPooler,
    ) -> Result<(), TopoError> {
        let id = require_id(pooler)?;
        let conn = self.conn_for_cell(ctx, &id.cell).await?;

        let data = pooler.encode_to_vec();
        conn.create(ctx, &path_for_pooler(id), &data).await?;
        Ok(())
    }

    /// Write a pooler record back under its read version; refreshes the
    /// version inside `info` on success.
    pub async fn update_multi_pooler(
        &self,
        ctx: &Context,
        info: &mut MultiPoolerInfo,
    ) -> Result<(), TopoError> {
        let id = require_id(&info.pooler)?;
        let conn = self.conn_for_cell(ctx, &id.cell).await?;

        let data = info.pooler.encode_to_vec();
        let new_version = conn
            .update(ctx, &path_for_pooler(id), &data, Some(&info.version))
            .await?;
        info.version = new_version;
        Ok(())
    }

    /// Read-modify-write a pooler record; retries transparently on version
    /// conflicts. Returns the written record, or `None` when the closure
    /// reported `NoUpdateNeeded`.
    pub async fn update_multi_pooler_fields<F>(
        &self,
        ctx: &Context,
        id: &ComponentId,
        mut update: F,
    ) -> Result<Option<MultiPooler>, TopoError>
    where
        F: FnMut(&mut MultiPooler) -> Result<(), TopoError>,
    {
        loop {
            let mut info = self.get_multi_pooler(ctx, id).await?;
            if let Err(e) = update(&mut info.pooler) {
                if e.is_no_update_needed() {
                    return Ok(None);
                }
                return Err(e);
            }
            match self.update_multi_pooler(ctx, &mut info).await {
                Err(e) if e.is_bad_version() => continue,
                Err(e) => return Err(e),
                Ok(()) => return Ok(Some(info.pooler)),
            }
        }
    }

    /// Delete one pooler record.
    pub async fn delete_multi_pooler(
        &self,
        ctx: &Context,
        id: &ComponentId,
    ) -> Result<(), TopoError> {
        let conn = self.conn_for_cell(ctx, &id.cell).await?;
        conn.delete(ctx, &path_for_pooler(id), None).await?;
        Ok(())
    }

    /// Create a pooler record, or — when it already exists and
    /// `allow_update` is set — overwrite the existing one in place.
    ///
    /// An existing record belonging to a different `(database, shard)` is
    /// never overwritten: changing a pooler's identity requires an explicit
    /// delete and re-add. `allow_primary_override` is reserved for the
    /// primary-handoff flow.
    pub async fn init_multi_pooler(
        &self,
        ctx: &Context,
        pooler: &MultiPooler,
        _allow_primary_override: bool,
        allow_update: bool,
    ) -> Result<(), TopoError> {
        let id = require_id(pooler)?;
        match self.create_multi_pooler(ctx, pooler).await {
            Err(e) if e.is_node_exists() && allow_update => {
                let mut old = self.get_multi_pooler(ctx, id).await.map_err(|e| {
                    e.wrap(format!(
                        "failed reading existing multipooler {}",
                        component_id_string(id)
                    ))
                })?;

                if old.pooler.database != pooler.database || old.pooler.shard != pooler.shard {
                    return Err(TopoError::internal(format!(
                        "old multipooler has shard {}/{}. Cannot override with shard {}/{}. \
                         Delete and re-add the multipooler to change its database/shard",
                        old.pooler.database, old.pooler.shard, pooler.database, pooler.shard
                    )));
                }

                old.pooler = pooler.clone();
                self.update_multi_pooler(ctx, &mut old).await.map_err(|e| {
                    e.wrap(format!(
                        "failed updating multipooler {}",
                        component_id_string(id)
                    ))
                })
            }
            other => other,
        }
    }
}

