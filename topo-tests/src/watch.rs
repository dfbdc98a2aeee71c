//! Watch API scenarios: initial value, ordered delivery with duplicates
//! tolerated, terminal events on deletion and cancellation.

use std::sync::Arc;
use std::time::Duration;

use prost::Message;

use multipg_topo::records::Database;
use multipg_topo::{TopoStore, GLOBAL_CELL};
use multipg_topo_common::{
    Conn, Context, RecursiveWatchStream, TopoErrorIntrospect, WatchData, WatchStream,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

async fn next_event(changes: &mut WatchStream) -> WatchData {
    tokio::time::timeout(EVENT_TIMEOUT, changes.recv())
        .await
        .expect("timed out waiting for a watch event")
        .expect("watch channel unexpectedly closed")
}

async fn expect_closed(changes: &mut WatchStream) {
    let next = tokio::time::timeout(EVENT_TIMEOUT, changes.recv())
        .await
        .expect("timed out waiting for the watch channel to close");
    assert!(next.is_none(), "got unexpected event after terminal one");
}

fn decode_database(data: &WatchData) -> Database {
    Database::decode(data.contents.as_slice()).expect("cannot unmarshal watch data")
}

/// Start a watch on the test database's record and check the initial value.
async fn wait_for_initial_value(
    conn: &Arc<dyn Conn>,
    watch_ctx: &Context,
    database: &Database,
) -> WatchStream {
    let (current, changes) = conn
        .watch(watch_ctx, "databases/test_database/Database")
        .await
        .expect("watch failed");
    assert_eq!(&decode_database(&current), database, "got bad initial data");
    changes
}

pub(crate) async fn check_watch(ts: &TopoStore) {
    let ctx = Context::background();
    let conn = ts
        .conn_for_cell(&ctx, GLOBAL_CELL)
        .await
        .expect("conn_for_cell(global) failed");

    // Watching something that doesn't exist fails right away.
    let err = conn
        .watch(&ctx, "databases/test_database/Database")
        .await
        .err()
        .expect("watch on missing node should fail");
    assert!(err.is_no_node(), "watch on missing node: {}", err);

    // Create some data.
    let mut database = Database {
        name: "test_database".to_owned(),
        ..Database::default()
    };
    ts.update_database_fields(&ctx, "test_database", |db| {
        db.name = "test_database".to_owned();
        Ok(())
    })
    .await
    .expect("update_database_fields(1) failed");

    // Now watching works and sees the initial value.
    let (watch_ctx, _cancel) = ctx.with_cancel();
    let mut changes = wait_for_initial_value(&conn, &watch_ctx, &database).await;

    // Change the data; the new value must arrive, possibly after duplicate
    // notifications of the old one.
    database.name = "test_database_new".to_owned();
    ts.update_database_fields(&ctx, "test_database", |db| {
        db.name = "test_database_new".to_owned();
        Ok(())
    })
    .await
    .expect("update_database_fields(2) failed");

    loop {
        let wd = next_event(&mut changes).await;
        assert!(wd.err.is_none(), "watch interrupted: {:?}", wd.err);
        let got = decode_database(&wd);
        match got.name.as_str() {
            "test_database" => continue, // duplicate of the first value
            "test_database_new" => break,
            other => panic!("got unknown database: {}", other),
        }
    }

    // Remove the database; the terminal NoNode must arrive, then the channel
    // closes.
    ts.delete_database(&ctx, "test_database", false)
        .await
        .expect("delete_database failed");

    loop {
        let wd = next_event(&mut changes).await;
        match wd.err {
            Some(e) if e.is_no_node() => break,
            Some(e) => panic!("unexpected error waiting for deletion: {}", e),
            None => {
                let got = decode_database(&wd);
                assert_eq!(got.name, "test_database_new", "unknown database: {:?}", got);
            }
        }
    }
    expect_closed(&mut changes).await;
}

pub(crate) async fn check_watch_interrupt(ts: &TopoStore) {
    let ctx = Context::background();
    let conn = ts
        .conn_for_cell(&ctx, GLOBAL_CELL)
        .await
        .expect("conn_for_cell(global) failed");

    let database = Database {
        name: "test_database".to_owned(),
        ..Database::default()
    };
    ts.update_database_fields(&ctx, "test_database", |db| {
        db.name = "test_database".to_owned();
        Ok(())
    })
    .await
    .expect("update_database_fields(1) failed");

    let (watch_ctx, cancel) = ctx.with_cancel();
    let mut changes = wait_for_initial_value(&conn, &watch_ctx, &database).await;

    // Cancel the watch; the terminal Interrupted must arrive, then the
    // channel closes.
    cancel.cancel();

    loop {
        let wd = next_event(&mut changes).await;
        match wd.err {
            Some(e) if e.is_interrupted() => break,
            Some(e) => panic!("unexpected error waiting for cancellation: {}", e),
            None => {
                let got = decode_database(&wd);
                assert_eq!(got.name, "test_database", "unknown database: {:?}", got);
            }
        }
    }
    expect_closed(&mut changes).await;

    // Cancelling again is harmless.
    cancel.cancel();
}

async fn next_recursive_event(
    changes: &mut RecursiveWatchStream,
) -> multipg_topo_common::WatchDataRecursive {
    tokio::time::timeout(EVENT_TIMEOUT, changes.recv())
        .await
        .expect("timed out waiting for a recursive watch event")
        .expect("recursive watch channel unexpectedly closed")
}

pub(crate) async fn check_watch_recursive(ts: &TopoStore) {
    let ctx = Context::background();
    let conn = ts
        .conn_for_cell(&ctx, GLOBAL_CELL)
        .await
        .expect("conn_for_cell(global) failed");

    let mut database = Database {
        name: "test_database".to_owned(),
        ..Database::default()
    };
    ts.update_database_fields(&ctx, "test_database", |db| {
        db.name = "test_database".to_owned();
        Ok(())
    })
    .await
    .expect("update_database_fields(1) failed");

    let (watch_ctx, cancel) = ctx.with_cancel();
    let (current, mut changes) = match conn
        .watch_recursive(&watch_ctx, "databases/test_database")
        .await
    {
        Ok(watch) => watch,
        Err(e) if e.is_no_implementation() => {
            // Backend doesn't support recursive watches; nothing to check.
            return;
        }
        Err(e) => panic!("watch_recursive failed: {}", e),
    };
    assert_eq!(current.len(), 1, "expected one initial value");
    assert_eq!(&decode_database(&current[0].data), &database);

    // Change the data.
    database.name = "test_database_new".to_owned();
    ts.update_database_fields(&ctx, "test_database", |db| {
        db.name = "test_database_new".to_owned();
        Ok(())
    })
    .await
    .expect("update_database_fields(2) failed");

    loop {
        let wd = next_recursive_event(&mut changes).await;
        assert!(wd.data.err.is_none(), "watch interrupted: {:?}", wd.data.err);
        let got = decode_database(&wd.data);
        match got.name.as_str() {
            "test_database" => continue,
            "test_database_new" => break,
            other => panic!("got unknown database: {}", other),
        }
    }

    // Deleting the record delivers a per-key NoNode which is not terminal
    // for the subtree stream.
    ts.delete_database(&ctx, "test_database", false)
        .await
        .expect("delete_database failed");

    loop {
        let wd = next_recursive_event(&mut changes).await;
        match wd.data.err {
            Some(e) if e.is_no_node() => break,
            Some(e) => panic!("unexpected error waiting for deletion: {}", e),
            None => {
                let got = decode_database(&wd.data);
                assert_eq!(got.name, "test_database_new", "unknown database: {:?}", got);
            }
        }
    }

    // Stopping has to be explicit for recursive watches.
    cancel.cancel();
    loop {
        let wd = next_recursive_event(&mut changes).await;
        match wd.data.err {
            Some(e) if e.is_interrupted() => break,
            Some(e) => panic!("unexpected error waiting for cancellation: {}", e),
            None => continue,
        }
    }

    let next = tokio::time::timeout(EVENT_TIMEOUT, changes.recv())
        .await
        .expect("timed out waiting for the recursive watch channel to close");
    assert!(next.is_none(), "got unexpected event after terminal one");

    cancel.cancel();
}
