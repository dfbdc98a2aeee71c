//! Save / retrieve [`Database`] records in the global topology namespace.

use prost::Message;

use multipg_topo_common::{Context, TopoError, TopoErrorIntrospect};

use crate::records::Database;
use crate::store::TopoStore;
use crate::utils::dir_entries_to_names;
use crate::{DATABASES_PATH, DATABASE_FILE};

fn path_for_database(database: &str) -> String {
    format!("{}/{}/{}", DATABASES_PATH, database, DATABASE_FILE)
}

impl TopoStore {
    /// Names of all existing databases, sorted alphabetically.
    pub async fn get_database_names(&self, ctx: &Context) -> Result<Vec<String>, TopoError> {
        ctx.check()?;
        match self.global_conn().list_dir(ctx, DATABASES_PATH, false).await {
            Ok(entries) => Ok(dir_entries_to_names(entries)),
            Err(e) if e.is_no_node() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Read one database's record.
    pub async fn get_database(&self, ctx: &Context, database: &str) -> Result<Database, TopoError> {
        ctx.check()?;
        let (contents, _version) = self
            .global_conn()
            .get(ctx, &path_for_database(database))
            .await?;
        Database::decode(contents.as_slice()).map_err(|e| {
            TopoError::internal(format!("failed to unmarshal database {}: {}", database, e))
        })
    }

    /// Create a new database record.
    pub async fn create_database(
        &self,
        ctx: &Context,
        database: &str,
        db: &Database,
    ) -> Result<(), TopoError> {
        ctx.check()?;
        let contents = db.encode_to_vec();
        self.global_conn()
            .create(ctx, &path_for_database(database), &contents)
            .await?;
        Ok(())
    }

    /// Read-modify-write a database record; retries transparently on version
    /// conflicts, and `NoUpdateNeeded` from the closure skips the write.
    pub async fn update_database_fields<F>(
        &self,
        ctx: &Context,
        database: &str,
        mut update: F,
    ) -> Result<(), TopoError>
    where
        F: FnMut(&mut Database) -> Result<(), TopoError>,
    {
        let file_path = path_for_database(database);
        loop {
            ctx.check()?;

            let mut db = Database::default();
            let mut version = None;
            match self.global_conn().get(ctx, &file_path).await {
                Ok((contents, v)) => {
                    db = Database::decode(contents.as_slice()).map_err(|e| {
                        TopoError::internal(format!(
                            "failed to unmarshal database {}: {}",
                            database, e
                        ))
                    })?;
                    version = Some(v);
                }
                Err(e) if e.is_no_node() => {}
                Err(e) => return Err(e),
            }

            if let Err(e) = update(&mut db) {
                if e.is_no_update_needed() {
                    return Ok(());
                }
                return Err(e);
            }

            let contents = db.encode_to_vec();
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

    /// Delete a database record.
    ///
    /// Poolers referencing the database are not checked; `force` is accepted
    /// for symmetry with [`TopoStore::delete_cell`].
    pub async fn delete_database(
        &self,
        ctx: &Context,
        database: &str,
        _force: bool,
    ) -> Result<(), TopoError> {
        ctx.check()?;
        self.global_conn()
            .delete(ctx, &path_for_database(database), None)
            .await
    }
}

