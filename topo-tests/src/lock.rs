//! Lock API scenarios: exclusion, blocking with deadlines and cancellation,
//! waiter wake-up, non-blocking acquisition, and named locks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use multipg_topo::records::Database;
use multipg_topo::{TopoStore, DATABASES_PATH, GLOBAL_CELL};
use multipg_topo_common::{Conn, Context, TopoErrorIntrospect};

/// Long enough to guarantee a competing task is parked on the lock.
const TIME_UNTIL_LOCK_IS_TAKEN: Duration = Duration::from_millis(10);

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

async fn global_conn_with_database(ts: &TopoStore) -> Arc<dyn Conn> {
    let ctx = Context::background();
    ts.create_database(&ctx, "test_database", &Database::default())
        .await
        .expect("create_database failed");
    ts.conn_for_cell(&ctx, GLOBAL_CELL)
        .await
        .expect("conn_for_cell(global) failed")
}

pub(crate) async fn check_lock(ts: &TopoStore) {
    let conn = global_conn_with_database(ts).await;
    check_lock_timeout(&conn).await;
    check_lock_unblocks(&conn).await;
}

async fn check_lock_timeout(conn: &Arc<dyn Conn>) {
    let ctx = Context::background();
    let database_path = format!("{}/test_database", DATABASES_PATH);

    let descriptor = conn
        .lock(&ctx, &database_path, "")
        .await
        .expect("lock failed");

    // Holding the lock doesn't restrict reads.
    let entries = conn
        .list_dir(&ctx, &database_path, true)
        .await
        .expect("list_dir under lock failed");
    for entry in entries {
        assert!(
            entry.name == "Database" || entry.ephemeral,
            "unexpected non-ephemeral entry under lock: {:?}",
            entry
        );
    }

    // A second acquisition under a short deadline times out.
    let fast_ctx = ctx.with_timeout(TIME_UNTIL_LOCK_IS_TAKEN);
    let err = conn
        .lock(&fast_ctx, &database_path, "again")
        .await
        .err()
        .expect("lock(again) should fail");
    assert!(err.is_timeout(), "lock(again): {}", err);

    // A cancelled acquisition is interrupted.
    let (interrupt_ctx, cancel) = ctx.with_cancel();
    tokio::spawn(async move {
        tokio::time::sleep(TIME_UNTIL_LOCK_IS_TAKEN).await;
        cancel.cancel();
    });
    let err = conn
        .lock(&interrupt_ctx, &database_path, "interrupted")
        .await
        .err()
        .expect("lock(interrupted) should fail");
    assert!(err.is_interrupted(), "lock(interrupted): {}", err);

    descriptor.check(&ctx).await.expect("check failed");
    descriptor.unlock(&ctx).await.expect("unlock failed");

    // A second unlock through the same descriptor fails.
    assert!(
        descriptor.unlock(&ctx).await.is_err(),
        "unlock(again) should fail"
    );
}

/// A task parked on `lock` must wake when the holder unlocks.
async fn check_lock_unblocks(conn: &Arc<dyn Conn>) {
    let ctx = Context::background();
    let database_path = format!("{}/test_database", DATABASES_PATH);

    let (unblock_tx, unblock_rx) = oneshot::channel::<()>();
    let (finished_tx, finished_rx) = oneshot::channel::<()>();

    // As soon as it's unblocked, the task tries to take the lock.
    let conn2 = conn.clone();
    let task_path = database_path.clone();
    tokio::spawn(async move {
        let ctx = Context::background();
        unblock_rx.await.expect("unblock channel dropped");
        let descriptor = conn2
            .lock(&ctx, &task_path, "unblocks")
            .await
            .expect("lock(test_database) failed in waiter");
        descriptor
            .unlock(&ctx)
            .await
            .expect("unlock(test_database) failed in waiter");
        let _ = finished_tx.send(());
    });

    let descriptor = conn
        .lock(&ctx, &database_path, "")
        .await
        .expect("lock(test_database) failed");

    // Unblock the task, give it time to park on the lock, then release.
    unblock_tx.send(()).expect("unblock receiver dropped");
    tokio::time::sleep(TIME_UNTIL_LOCK_IS_TAKEN).await;
    descriptor.unlock(&ctx).await.expect("unlock failed");

    tokio::time::timeout(WAIT_TIMEOUT, finished_rx)
        .await
        .expect("waiter never acquired the lock")
        .expect("waiter panicked");
}

pub(crate) async fn check_try_lock(ts: &TopoStore) {
    let conn = global_conn_with_database(ts).await;
    check_try_lock_fails_fast(&conn).await;
    check_try_lock_unblocks(&conn).await;
}

async fn check_try_lock_fails_fast(conn: &Arc<dyn Conn>) {
    let ctx = Context::background();
    let database_path = format!("{}/test_database", DATABASES_PATH);

    let descriptor = conn
        .try_lock(&ctx, &database_path, "")
        .await
        .expect("try_lock failed");

    // No waiting: a held lock fails immediately with NodeExists, even under
    // a generous deadline.
    let fast_ctx = ctx.with_timeout(WAIT_TIMEOUT);
    let err = conn
        .try_lock(&fast_ctx, &database_path, "again")
        .await
        .err()
        .expect("try_lock(again) should fail");
    assert!(err.is_node_exists(), "try_lock(again): {}", err);

    descriptor.check(&ctx).await.expect("check failed");
    descriptor.unlock(&ctx).await.expect("unlock failed");
    assert!(
        descriptor.unlock(&ctx).await.is_err(),
        "unlock(again) should fail"
    );
}

/// A try-lock caller polls rather than blocks: it keeps getting NodeExists
/// until the holder releases, then wins a retry.
async fn check_try_lock_unblocks(conn: &Arc<dyn Conn>) {
    let ctx = Context::background();
    let database_path = format!("{}/test_database", DATABASES_PATH);

    let (unblock_tx, unblock_rx) = oneshot::channel::<()>();
    let (finished_tx, finished_rx) = oneshot::channel::<()>();

    let conn2 = conn.clone();
    let task_path = database_path.clone();
    tokio::spawn(async move {
        let ctx = Context::background();
        unblock_rx.await.expect("unblock channel dropped");
        loop {
            match conn2.try_lock(&ctx, &task_path, "unblocks").await {
                Ok(descriptor) => {
                    descriptor
                        .unlock(&ctx)
                        .await
                        .expect("unlock(test_database) failed in waiter");
                    let _ = finished_tx.send(());
                    return;
                }
                Err(e) => {
                    assert!(e.is_node_exists(), "expected NodeExists while polling: {}", e);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        }
    });

    let descriptor = conn
        .try_lock(&ctx, &database_path, "")
        .await
        .expect("try_lock failed");
    unblock_tx.send(()).expect("unblock receiver dropped");
    tokio::time::sleep(TIME_UNTIL_LOCK_IS_TAKEN).await;
    descriptor.unlock(&ctx).await.expect("unlock failed");

    tokio::time::timeout(WAIT_TIMEOUT, finished_rx)
        .await
        .expect("poller never acquired the lock")
        .expect("poller panicked");
}

pub(crate) async fn check_lock_name(ts: &TopoStore) {
    let ctx = Context::background();
    let conn = ts
        .conn_for_cell(&ctx, GLOBAL_CELL)
        .await
        .expect("conn_for_cell(global) failed");

    // The path doesn't have to exist for a named lock.
    let lock_path = "test_lock_name_path";
    let descriptor = conn
        .lock_name(&ctx, lock_path, "")
        .await
        .expect("lock_name failed");

    let fast_ctx = ctx.with_timeout(TIME_UNTIL_LOCK_IS_TAKEN);
    let err = conn
        .lock_name(&fast_ctx, lock_path, "again")
        .await
        .err()
        .expect("lock_name(again) should fail");
    assert!(err.is_timeout(), "lock_name(again): {}", err);

    let (interrupt_ctx, cancel) = ctx.with_cancel();
    tokio::spawn(async move {
        tokio::time::sleep(TIME_UNTIL_LOCK_IS_TAKEN).await;
        cancel.cancel();
    });
    let err = conn
        .lock_name(&interrupt_ctx, lock_path, "interrupted")
        .await
        .err()
        .expect("lock_name(interrupted) should fail");
    assert!(err.is_interrupted(), "lock_name(interrupted): {}", err);

    descriptor.check(&ctx).await.expect("check failed");
    descriptor.unlock(&ctx).await.expect("unlock failed");
    assert!(
        descriptor.unlock(&ctx).await.is_err(),
        "unlock(again) should fail"
    );
}
