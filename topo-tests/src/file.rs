//! File API scenarios: versioned create / get / update / delete, and the
//! deep listing.

use std::sync::Arc;

use multipg_topo::{TopoStore, GLOBAL_CELL};
use multipg_topo_common::{Conn, Context, TopoErrorIntrospect};

use crate::directory::check_list_dir;
use crate::LOCAL_CELL_NAME;

pub(crate) async fn check_file(ts: &TopoStore) {
    let ctx = Context::background();

    let conn = ts
        .conn_for_cell(&ctx, GLOBAL_CELL)
        .await
        .expect("conn_for_cell(global) failed");
    check_file_in_cell(&conn, true).await;

    let conn = ts
        .conn_for_cell(&ctx, LOCAL_CELL_NAME)
        .await
        .expect("conn_for_cell(test) failed");
    check_file_in_cell(&conn, false).await;
}

async fn check_file_in_cell(conn: &Arc<dyn Conn>, has_cells: bool) {
    let ctx = Context::background();

    // ListDir root: nothing but the cells directory on the global side.
    let mut expected: Vec<(&str, bool)> = Vec::new();
    if has_cells {
        expected.push(("cells", true));
    }
    check_list_dir(conn, "/", &expected).await;

    // Get with no file.
    let err = conn.get(&ctx, "/myfile").await.unwrap_err();
    assert!(err.is_no_node(), "Get(non-existent): {}", err);

    // Create a file and see it in the listing.
    let version = conn
        .create(&ctx, "/myfile", b"a")
        .await
        .expect("Create('/myfile') failed");
    expected.push(("myfile", false));
    check_list_dir(conn, "/", &expected).await;

    // Get returns the right contents and version.
    let (contents, get_version) = conn.get(&ctx, "/myfile").await.expect("Get('/myfile')");
    assert_eq!(contents, b"a");
    assert_eq!(get_version, version);

    // Update changes the version.
    let new_version = conn
        .update(&ctx, "/myfile", b"b", Some(&version))
        .await
        .expect("Update('/myfile') failed");
    assert_ne!(new_version, version, "version didn't change");

    let (contents, get_version) = conn.get(&ctx, "/myfile").await.expect("Get('/myfile')");
    assert_eq!(contents, b"b");
    assert_eq!(get_version, new_version);

    // Updating with a stale version fails.
    let err = conn
        .update(&ctx, "/myfile", b"b", Some(&version))
        .await
        .unwrap_err();
    assert!(err.is_bad_version(), "Update(bad version): {}", err);

    // Updating with no version works.
    let new_version = conn
        .update(&ctx, "/myfile", b"c", None)
        .await
        .expect("Update(no version) should have worked");
    let (contents, get_version) = conn.get(&ctx, "/myfile").await.expect("Get('/myfile')");
    assert_eq!(contents, b"c");
    assert_eq!(get_version, new_version);

    // Updating to empty contents works.
    let new_version = conn
        .update(&ctx, "/myfile", b"", Some(&new_version))
        .await
        .expect("Update(empty contents) should have worked");
    let (contents, get_version) = conn.get(&ctx, "/myfile").await.expect("Get('/myfile')");
    assert!(contents.is_empty());
    assert_eq!(get_version, new_version);

    // Deleting with a stale version fails.
    let err = conn.delete(&ctx, "/myfile", Some(&version)).await.unwrap_err();
    assert!(err.is_bad_version(), "Delete(bad version): {}", err);

    // Deleting with the right version works and empties the listing.
    conn.delete(&ctx, "/myfile", Some(&new_version))
        .await
        .expect("Delete('/myfile') failed");
    expected.pop();
    check_list_dir(conn, "/", &expected).await;

    // Deleting what's gone fails.
    let err = conn.delete(&ctx, "/myfile", Some(&new_version)).await.unwrap_err();
    assert!(err.is_no_node(), "Delete(already gone): {}", err);

    // Re-create through an unconditional update.
    let version = conn
        .update(&ctx, "/myfile", b"d", None)
        .await
        .expect("Update('/myfile', none) failed");
    let (contents, get_version) = conn.get(&ctx, "/myfile").await.expect("Get('/myfile')");
    assert_eq!(contents, b"d");
    assert_eq!(get_version, version);
    expected.push(("myfile", false));
    check_list_dir(conn, "/", &expected).await;

    // Unconditional delete.
    conn.delete(&ctx, "/myfile", None)
        .await
        .expect("Delete('/myfile', none) failed");
    expected.pop();
    check_list_dir(conn, "/", &expected).await;
}

pub(crate) async fn check_list(ts: &TopoStore) {
    let ctx = Context::background();
    let conn = ts
        .conn_for_cell(&ctx, GLOBAL_CELL)
        .await
        .expect("conn_for_cell(global) failed");

    conn.create(&ctx, "/some/arbitrary/file", b"a")
        .await
        .expect("Create('/some/arbitrary/file') failed");

    match conn.list(&ctx, "/").await {
        Err(e) if e.is_no_implementation() => {
            // Backend doesn't support deep listing; nothing to check.
            return;
        }
        other => {
            other.expect("List('/') failed");
        }
    }

    conn.create(&ctx, "/toplevel/nested/myfile", b"a")
        .await
        .expect("Create('/toplevel/nested/myfile') failed");

    for path in [
        "/top",
        "/toplevel",
        "/toplevel/",
        "/toplevel/nes",
        "/toplevel/nested/myfile",
    ] {
        let entries = conn
            .list(&ctx, path)
            .await
            .unwrap_or_else(|e| panic!("List({:?}) failed: {}", path, e));
        assert_eq!(entries.len(), 1, "List({:?}) returned {:?}", path, entries);
        assert!(
            entries[0].key.ends_with("/toplevel/nested/myfile"),
            "List({:?}) returned key {:?}",
            path,
            entries[0].key
        );
        assert_eq!(entries[0].value, b"a", "List({:?}) returned wrong value", path);
    }
}
