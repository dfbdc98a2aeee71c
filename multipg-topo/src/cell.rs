//! Save / retrieve [`Cell`] records in the global topology namespace.
//!
//! Cell records are mutated only by explicit admin operations; every other
//! component just reads them to find its cell's topology servers. A cell can
//! only be removed once no database references it in its `cells` list.

use prost::Message;

use multipg_topo_common::{Context, TopoError, TopoErrorIntrospect};

use crate::records::Cell;
use crate::store::TopoStore;
use crate::utils::dir_entries_to_names;
use crate::{CELLS_PATH, CELL_FILE};

fn path_for_cell(cell: &str) -> String {
    format!("{}/{}/{}", CELLS_PATH, cell, CELL_FILE)
}

impl TopoStore {
    /// Names of all existing cells, sorted alphabetically.
    pub async fn get_cell_names(&self, ctx: &Context) -> Result<Vec<String>, TopoError> {
        ctx.check()?;
        match self.global_conn().list_dir(ctx, CELLS_PATH, false).await {
            Ok(entries) => Ok(dir_entries_to_names(entries)),
            Err(e) if e.is_no_node() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Read one cell's record.
    pub async fn get_cell(&self, ctx: &Context, cell: &str) -> Result<Cell, TopoError> {
        ctx.check()?;
        let (contents, _version) = self.global_conn().get(ctx, &path_for_cell(cell)).await?;
        Cell::decode(contents.as_slice())
            .map_err(|e| TopoError::internal(format!("failed to unmarshal cell {}: {}", cell, e)))
    }

    /// Create a new cell record. Fails with `NodeExists` when the cell is
    /// already registered.
    pub async fn create_cell(&self, ctx: &Context, cell: &str, ci: &Cell) -> Result<(), TopoError> {
        ctx.check()?;
        let contents = ci.encode_to_vec();
        self.global_conn()
            .create(ctx, &path_for_cell(cell), &contents)
            .await?;
        Ok(())
    }

    /// Read-modify-write a cell record. The update closure may be invoked
    /// several times: a write losing its version race is transparently
    /// re-read and retried. Returning `NoUpdateNeeded` from the closure
    /// skips the write and returns `Ok`.
    pub async fn update_cell_fields<F>(
        &self,
        ctx: &Context,
        cell: &str,
        mut update: F,
    ) -> Result<(), TopoError>
    where
        F: FnMut(&mut Cell) -> Result<(), TopoError>,
    {
        let file_path = path_for_cell(cell);
        loop {
            ctx.check()?;

            // Read the record; a missing one starts out empty.
            let mut ci = Cell::default();
            let mut version = None;
            match self.global_conn().get(ctx, &file_path).await {
                Ok((contents, v)) => {
                    ci = Cell::decode(contents.as_slice()).map_err(|e| {
                        TopoError::internal(format!("failed to unmarshal cell {}: {}", cell, e))
                    })?;
                    version = Some(v);
                }
                Err(e) if e.is_no_node() => {}
                Err(e) => return Err(e),
            }

            if let Err(e) = update(&mut ci) {
                if e.is_no_update_needed() {
                    return Ok(());
                }
                return Err(e);
            }

            let contents = ci.encode_to_vec();
            match self
                .global_conn()
                .update(ctx, &file_path, &contents, version.as_ref())
                .await
            {
                Err(e) if e.is_bad_version() => continue,
                Err(e) => return Err(e),
                Ok(_) => return Ok(()),
            }
        }
    }

    /// Delete a cell record. Unless `force` is set, the deletion is refused
    /// with `NodeNotEmpty` while any database still references the cell.
    pub async fn delete_cell(&self, ctx: &Context, cell: &str, force: bool) -> Result<(), TopoError> {
        ctx.check()?;

        if !force {
            let database_names = self.get_database_names(ctx).await?;
            for db_name in database_names {
                let db = self
                    .get_database(ctx, &db_name)
                    .await
                    .map_err(|e| e.wrap(format!("failed to get database {}", db_name)))?;
                if db.cells.iter().any(|c| c == cell) {
                    return Err(TopoError::node_not_empty(format!(
                        "cell {} is referenced by database {}. This could create serving \
                         issues in the cluster. Either remove the cell from the database or \
                         use force=true to delete the cell anyway.",
                        cell, db_name
                    )));
                }
            }
        }

        self.global_conn()
            .delete(ctx, &path_for_cell(cell), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Database;
    use multipg_topo_memory::{new_server_and_factory, Operation};
    use multipg_topo_common::TopoErrorKind;

    fn cell_record(addrs: &[&str], root: &str) -> Cell {
        Cell {
            name: String::new(),
            server_addresses: addrs.iter().map(|s| s.to_string()).collect(),
            root: root.to_owned(),
        }
    }

    #[tokio::test]
    async fn create_and_get_cell() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;

        let cl = cell_record(&["s1:2181"], "/topo");
        ts.create_cell(&ctx, "zone-1", &cl).await.unwrap();

        let retrieved = ts.get_cell(&ctx, "zone-1").await.unwrap();
        assert_eq!(retrieved.server_addresses, cl.server_addresses);
        assert_eq!(retrieved.root, cl.root);

        assert_eq!(ts.get_cell_names(&ctx).await.unwrap(), vec!["zone-1"]);
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn get_nonexistent_cell() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
        let err = ts.get_cell(&ctx, "nonexistent").await.unwrap_err();
        assert!(err.is_no_node());
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn create_cell_twice_is_node_exists() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
        let cl = cell_record(&["s1:2181"], "/topo");
        ts.create_cell(&ctx, "zone-1", &cl).await.unwrap();
        let err = ts.create_cell(&ctx, "zone-1", &cl).await.unwrap_err();
        assert!(err.is_node_exists());
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn cell_names_are_sorted() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;
        ts.create_cell(&ctx, "test-cell-2", &cell_record(&["s2:2181"], "/t2"))
            .await
            .unwrap();
        ts.create_cell(&ctx, "test-cell-1", &cell_record(&["s1:2181"], "/t1"))
            .await
            .unwrap();

        assert_eq!(
            ts.get_cell_names(&ctx).await.unwrap(),
            vec!["test-cell-1", "test-cell-2", "zone-1"]
        );
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn update_cell_fields_applies_the_change() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
        ts.create_cell(&ctx, "zone-1", &cell_record(&["s1:2181"], "/topo"))
            .await
            .unwrap();

        ts.update_cell_fields(&ctx, "zone-1", |c| {
            c.server_addresses.push("s2:2181".to_owned());
            c.root = "/new_topo".to_owned();
            Ok(())
        })
        .await
        .unwrap();

        let retrieved = ts.get_cell(&ctx, "zone-1").await.unwrap();
        assert!(retrieved.server_addresses.contains(&"s2:2181".to_owned()));
        assert_eq!(retrieved.root, "/new_topo");
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn update_cell_fields_with_failing_closure_leaves_record_alone() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
        ts.create_cell(&ctx, "zone-1", &cell_record(&["s1:2181"], "/topo"))
            .await
            .unwrap();

        let err = ts
            .update_cell_fields(&ctx, "zone-1", |_c| {
                Err(TopoError::internal("update failed"))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("update failed"));

        let retrieved = ts.get_cell(&ctx, "zone-1").await.unwrap();
        assert_eq!(retrieved.server_addresses, vec!["s1:2181"]);
        assert_eq!(retrieved.root, "/topo");
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn update_cell_fields_no_update_needed_skips_the_write() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
        ts.create_cell(&ctx, "zone-1", &cell_record(&["s1:2181"], "/topo"))
            .await
            .unwrap();

        ts.update_cell_fields(&ctx, "zone-1", |c| {
            c.root = "/ignored".to_owned();
            Err(TopoError::no_update_needed())
        })
        .await
        .unwrap();

        let retrieved = ts.get_cell(&ctx, "zone-1").await.unwrap();
        assert_eq!(retrieved.root, "/topo");
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn update_cell_fields_retries_on_bad_version() {
        let ctx = Context::background();
        let (ts, factory) = new_server_and_factory(&ctx, &[]).await;
        ts.create_cell(&ctx, "zone-1", &cell_record(&["s1:2181"], "/topo"))
            .await
            .unwrap();

        factory.add_one_time_operation_error(
            Operation::Update,
            "cells/zone-1/Cell",
            TopoErrorKind::BadVersion("cells/zone-1/Cell".to_owned()),
        );

        let mut update_calls = 0;
        ts.update_cell_fields(&ctx, "zone-1", |c| {
            update_calls += 1;
            c.server_addresses.push("s2:2181".to_owned());
            c.root = "/new_topo".to_owned();
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(update_calls, 2);
        let retrieved = ts.get_cell(&ctx, "zone-1").await.unwrap();
        assert!(retrieved.server_addresses.contains(&"s2:2181".to_owned()));
        assert_eq!(retrieved.root, "/new_topo");
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn delete_cell_refuses_while_a_database_references_it() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
        ts.create_cell(&ctx, "zc", &cell_record(&["s1:2181"], "/topo"))
            .await
            .unwrap();

        let db = Database {
            name: "db".to_owned(),
            cells: vec!["zc".to_owned(), "other".to_owned()],
            ..Database::default()
        };
        ts.create_database(&ctx, "db", &db).await.unwrap();

        let err = ts.delete_cell(&ctx, "zc", false).await.unwrap_err();
        assert!(err.is_node_not_empty());
        let msg = err.to_string();
        assert!(msg.contains("zc"), "{}", msg);
        assert!(msg.contains("db"), "{}", msg);

        // Still there.
        ts.get_cell(&ctx, "zc").await.unwrap();

        // force=true wins.
        ts.delete_cell(&ctx, "zc", true).await.unwrap();
        let err = ts.get_cell(&ctx, "zc").await.unwrap_err();
        assert!(err.is_no_node());
        ts.close().unwrap();
    }

    #[tokio::test]
    async fn delete_cell_with_no_references_succeeds() {
        let ctx = Context::background();
        let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
        ts.create_cell(&ctx, "zone-1", &cell_record(&["s1:2181"], "/topo"))
            .await
            .unwrap();

        let db = Database {
            name: "test-db".to_owned(),
            cells: vec!["other-cell".to_owned()],
            ..Database::default()
        };
        ts.create_database(&ctx, "test-db", &db).await.unwrap();

        ts.delete_cell(&ctx, "zone-1", false).await.unwrap();
        assert!(ts.get_cell(&ctx, "zone-1").await.unwrap_err().is_no_node());
        ts.close().unwrap();
    }
}
