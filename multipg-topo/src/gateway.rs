//! Save / retrieve gateway records in a cell's topology namespace.

use std::fmt;

use futures::stream::{self, StreamExt};
use prost::Message;

use multipg_topo_common::{Context, TopoError, TopoErrorIntrospect, Version};

use crate::records::{ComponentId, ComponentKind, MultiGateway};
use crate::store::{FanoutResult, TopoStore, DEFAULT_READ_CONCURRENCY};
use crate::utils::{component_id_string, parse_component_id, random_name};
use crate::{GATEWAYS_PATH, GATEWAY_FILE};

/// Build a new gateway record for the given cell and host. An empty name is
/// replaced with a random one.
pub fn new_multi_gateway(name: &str, cell: &str, host: &str) -> MultiGateway {
    let name = if name.is_empty() {
        random_name(8)
    } else {
        name.to_owned()
    };
    MultiGateway {
        id: Some(ComponentId {
            component: ComponentKind::Multigateway as i32,
            cell: cell.to_owned(),
            name,
        }),
        hostname: host.to_owned(),
        port_map: Default::default(),
    }
}

/// A gateway record read from the topology server, together with the version
/// that protects subsequent writes from stomping concurrent ones.
#[derive(Clone, Debug)]
pub struct MultiGatewayInfo {
    version: Version,
    pub gateway: MultiGateway,
}

impl MultiGatewayInfo {
    /// Should only be used by backend implementations and tests.
    pub fn new(gateway: MultiGateway, version: Version) -> Self {
        Self { version, gateway }
    }

    pub fn id_string(&self) -> String {
        match &self.gateway.id {
            Some(id) => component_id_string(id),
            None => "<missing id>".to_owned(),
        }
    }

    /// `hostname:grpc-port`, or the bare hostname when no grpc port is
    /// registered.
    pub fn addr(&self) -> String {
        match self.gateway.port_map.get("grpc") {
            Some(port) => format!("{}:{}", self.gateway.hostname, port),
            None => self.gateway.hostname.clone(),
        }
    }

    /// The version from the last time this gateway was read or updated.
    pub fn version(&self) -> &Version {
        &self.version
    }
}

impl fmt::Display for MultiGatewayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiGateway{{{}}}", self.id_string())
    }
}

fn path_for_gateway(id: &ComponentId) -> String {
    format!(
        "{}/{}/{}",
        GATEWAYS_PATH,
        component_id_string(id),
        GATEWAY_FILE
    )
}

fn require_id(gateway: &MultiGateway) -> Result<&ComponentId, TopoError> {
    gateway
        .id
        .as_ref()
        .ok_or_else(|| TopoError::internal("multigateway record has no id"))
}

impl TopoStore {
    /// Read one gateway's record and version.
    pub async fn get_multi_gateway(
        &self,
        ctx: &Context,
        id: &ComponentId,
    ) -> Result<MultiGatewayInfo, TopoError> {
        let conn = self
            .conn_for_cell(ctx, &id.cell)
            .await
            .map_err(|e| e.wrap(format!("unable to get connection for cell {:?}", id.cell)))?;

        let (data, version) = conn
            .get(ctx, &path_for_gateway(id))
            .await
            .map_err(|e| e.wrap(format!("unable to get multigateway {}", component_id_string(id))))?;
        let gateway = MultiGateway::decode(data.as_slice())
            .map_err(|e| TopoError::internal(format!("failed to unmarshal multigateway data: {}", e)))?;

        Ok(MultiGatewayInfo { version, gateway })
    }

    /// IDs of all gateways registered in a cell, from the namespace listing.
    /// A cell without the namespace yields an empty vector; an unknown cell
    /// fails with `NoNode`.
    pub async fn get_multi_gateway_ids_by_cell(
        &self,
        ctx: &Context,
        cell: &str,
    ) -> Result<Vec<ComponentId>, TopoError> {
        let conn = self.conn_for_cell(ctx, cell).await?;

        let entries = match conn.list_dir(ctx, GATEWAYS_PATH, false).await {
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
                        "unparseable gateway entry {} in cell {}",
                        entry.name, cell
                    )))
                }
            }
        }
        Ok(ids)
    }

    /// All gateways in a cell.
    ///
    /// Prefers one deep `List` of the namespace; when the backend cannot
    /// serve it (`NoImplementation`, `ResourceExhausted`), falls back to the
    /// namespace listing plus a bounded parallel read of each record. In the
    /// fallback, records that fail to read degrade the result to a partial
    /// one instead of failing the whole call.
    pub async fn get_multi_gateways_by_cell(
        &self,
        ctx: &Context,
        cell: &str,
    ) -> Result<FanoutResult<Vec<MultiGatewayInfo>>, TopoError> {
        let conn = self.conn_for_cell(ctx, cell).await?;

        match conn.list(ctx, GATEWAYS_PATH).await {
            Ok(entries) => {
                let mut gateways = Vec::with_capacity(entries.len());
                for entry in entries {
                    let gateway = MultiGateway::decode(entry.value.as_slice()).map_err(|e| {
                        TopoError::internal(format!("failed to unmarshal multigateway data: {}", e))
                    })?;
                    gateways.push(MultiGatewayInfo {
                        version: entry.version,
                        gateway,
                    });
                }
                Ok(FanoutResult {
                    records: gateways,
                    partial_err: None,
                })
            }
            Err(e) if e.is_no_node() => Ok(FanoutResult::default()),
            Err(e) if e.is_no_implementation() || e.is_resource_exhausted() => {
                let ids = self.get_multi_gateway_ids_by_cell(ctx, cell).await?;
                Ok(self.gateway_fanout(ctx, ids).await)
            }
            Err(e) => Err(e),
        }
    }

    /// Bounded parallel read of a set of gateway records. `NoNode` marks a
    /// concurrent deletion and is skipped silently.
    async fn gateway_fanout(
        &self,
        ctx: &Context,
        ids: Vec<ComponentId>,
    ) -> FanoutResult<Vec<MultiGatewayInfo>> {
        let mut reads = stream::iter(ids.into_iter().map(|id| async move {
            let read = self.get_multi_gateway(ctx, &id).await;
            (id, read)
        }))
        .buffer_unordered(DEFAULT_READ_CONCURRENCY);

        let mut result = FanoutResult::<Vec<MultiGatewayInfo>>::default();
        while let Some((id, read)) = reads.next().await {
            match read {
                Ok(info) => result.records.push(info),
                Err(e) if e.is_no_node() => {}
                Err(e) => {
                    result.partial_err = Some(TopoError::partial_result(format!(
                        "failed to read multigateway {}: {}",
                        component_id_string(&id),
                        e
                    )));
                }
            }
        }
        result
    }

    /// Create a new gateway record and all paths leading to it.
    pub async fn create_multi_gateway(
        &self,
        ctx: &Context,
        gateway: &MultiGateway,
    ) -> Result<(), TopoError> {
        let id = require_id(gateway)?;
        let conn = self.conn_for_cell(ctx, &id.cell).await?;

        let data = gateway.encode_to_vec();
        conn.create(ctx, &path_for_gateway(id), &data).await?;
        Ok(())
    }

    /// Write a gateway record back under its read version; refreshes the
    /// version inside `info` on success.
    pub async fn update_multi_gateway(
        &self,
        ctx: &Context,
        info: &mut MultiGatewayInfo,
    ) -> Result<(), TopoError> {
        let id = require_id(&info.gateway)?;
        let conn = self.conn_for_cell(ctx, &id.cell).await?;

        let data = info.gateway.encode_to_vec();
        let new_version = conn
            .update(ctx, &path_for_gateway(id), &data, Some(&info.version))
            .await?;
        info.version = new_version;
        Ok(())
    }

    /// Read-modify-write a gateway record; retries transparently on version
    /// conflicts. Returns the written record, or `None` when the closure
    /// reported `NoUpdateNeeded`.
    pub async fn update_multi_gateway_fields<F>(
        &self,
        ctx: &Context,
        id: &ComponentId,
        mut update: F,
    ) -> Result<Option<MultiGateway>, TopoError>
    where
        F: FnMut(&mut MultiGateway) -> Result<(), TopoError>,
    {
        loop {
            let mut info = self.get_multi_gateway(ctx, id).await?;
            if let Err(e) = update(&mut info.gateway) {
                if e.is_no_update_needed() {
                    return Ok(None);
                }
                return Err(e);
            }
            match self.update_multi_gateway(ctx, &mut info).await {
                Err(e) if e.is_bad_version() => continue,
                Err(e) => return Err(e),
                Ok(()) => return Ok(Some(info.gateway)),
            }
        }
    }

    /// Delete one gateway record.
    pub async fn delete_multi_gateway(
        &self,
        ctx: &Context,
        id: &ComponentId,
    ) -> Result<(), TopoError> {
        let conn = self.conn_for_cell(ctx, &id.cell).await?;
        conn.delete(ctx, &path_for_gateway(id), None).await?;
        Ok(())
    }

    /// Create a gateway record, or — when it already exists and
    /// `allow_update` is set — overwrite the existing one in place.
    pub async fn init_multi_gateway(
        &self,
        ctx: &Context,
        gateway: &MultiGateway,
        allow_update: bool,
    ) -> Result<(), TopoError> {
        let id = require_id(gateway)?;
        match self.create_multi_gateway(ctx, gateway).await {
            Err(e) if e.is_node_exists() && allow_update => {
                let mut old = self.get_multi_gateway(ctx, id).await.map_err(|e| {
                    e.wrap(format!(
                        "failed reading existing multigateway {}",
                        component_id_string(id)
                    ))
                })?;
                old.gateway = gateway.clone();
                self.update_multi_gateway(ctx, &mut old).await.map_err(|e| {
                    e.wrap(format!(
                        "failed updating multigateway {}",
                        component_id_string(id)
                    ))
                })
            }
            other => other,
        }
    }
}

