//! Directory API scenarios: listings at every level as files come and go.

use std::sync::Arc;

use multipg_topo::{TopoStore, GLOBAL_CELL};
use multipg_topo_common::{Conn, Context, DirEntryKind, TopoErrorIntrospect};

use crate::LOCAL_CELL_NAME;

/// Assert the listing of `dir_path` matches `expected` `(name, is_dir)`
/// pairs, both with and without the full flag. A `NoNode` is accepted in
/// place of an empty listing.
pub(crate) async fn check_list_dir(conn: &Arc<dyn Conn>, dir_path: &str, expected: &[(&str, bool)]) {
    let ctx = Context::background();

    // full=false returns bare names.
    match conn.list_dir(&ctx, dir_path, false).await {
        Ok(entries) => {
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            let mut expected_names: Vec<&str> = expected.iter().map(|(n, _)| *n).collect();
            expected_names.sort_unstable();
            assert_eq!(names, expected_names, "ListDir({:?}, false)", dir_path);
        }
        Err(e) if e.is_no_node() => {
            assert!(
                expected.is_empty(),
                "ListDir({:?}, false) returned NoNode but expected {:?}",
                dir_path,
                expected
            );
        }
        Err(e) => panic!("ListDir({:?}, false) failed: {}", dir_path, e),
    }

    // full=true also carries the entry type.
    match conn.list_dir(&ctx, dir_path, true).await {
        Ok(entries) => {
            let got: Vec<(&str, bool)> = entries
                .iter()
                .map(|e| (e.name.as_str(), e.kind == DirEntryKind::Directory))
                .collect();
            let mut want: Vec<(&str, bool)> = expected.to_vec();
            want.sort_unstable();
            assert_eq!(got, want, "ListDir({:?}, true)", dir_path);
        }
        Err(e) if e.is_no_node() => {
            assert!(
                expected.is_empty(),
                "ListDir({:?}, true) returned NoNode but expected {:?}",
                dir_path,
                expected
            );
        }
        Err(e) => panic!("ListDir({:?}, true) failed: {}", dir_path, e),
    }
}

pub(crate) async fn check_directory(ts: &TopoStore) {
    let ctx = Context::background();

    let conn = ts
        .conn_for_cell(&ctx, GLOBAL_CELL)
        .await
        .expect("conn_for_cell(global) failed");
    check_directory_in_cell(&conn, true).await;

    let conn = ts
        .conn_for_cell(&ctx, LOCAL_CELL_NAME)
        .await
        .expect("conn_for_cell(test) failed");
    check_directory_in_cell(&conn, false).await;
}

async fn check_directory_in_cell(conn: &Arc<dyn Conn>, has_cells: bool) {
    let ctx = Context::background();

    let mut base: Vec<(&str, bool)> = Vec::new();
    if has_cells {
        base.push(("cells", true));
    }
    check_list_dir(conn, "/", &base).await;

    // A top-level file appears and disappears.
    let version = conn
        .create(&ctx, "/MyFile", b"a")
        .await
        .expect("cannot create toplevel file");
    let mut expected = base.clone();
    expected.push(("MyFile", false));
    check_list_dir(conn, "/", &expected).await;

    conn.delete(&ctx, "/MyFile", Some(&version))
        .await
        .expect("cannot delete toplevel file");
    check_list_dir(conn, "/", &base).await;

    // A file three layers down shows up in every intermediate listing.
    let version = conn
        .create(&ctx, "/types/name/MyFile", b"a")
        .await
        .expect("cannot create deep file");
    let mut expected = base.clone();
    expected.push(("types", true));
    check_list_dir(conn, "/", &expected).await;
    check_list_dir(conn, "/types/", &[("name", true)]).await;
    check_list_dir(conn, "/types/name/", &[("MyFile", false)]).await;

    // A second file under a sibling directory.
    let version2 = conn
        .create(&ctx, "/types/othername/MyFile", b"a")
        .await
        .expect("cannot create second deep file");
    check_list_dir(conn, "/", &expected).await;
    check_list_dir(conn, "/types/", &[("name", true), ("othername", true)]).await;
    check_list_dir(conn, "/types/name/", &[("MyFile", false)]).await;
    check_list_dir(conn, "/types/othername/", &[("MyFile", false)]).await;

    // Deleting the first file prunes its directory.
    conn.delete(&ctx, "/types/name/MyFile", Some(&version))
        .await
        .expect("cannot delete deep file");
    check_list_dir(conn, "/", &expected).await;
    check_list_dir(conn, "/types/", &[("othername", true)]).await;
    check_list_dir(conn, "/types/name/", &[]).await;
    check_list_dir(conn, "/types/othername/", &[("MyFile", false)]).await;

    // Deleting the second empties everything.
    conn.delete(&ctx, "/types/othername/MyFile", Some(&version2))
        .await
        .expect("cannot delete second deep file");
    for dir in ["/types/", "/types/name/", "/types/othername/"] {
        check_list_dir(conn, dir, &[]).await;
    }
    check_list_dir(conn, "/", &base).await;
}
