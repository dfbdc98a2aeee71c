use std::time::Duration;

use multipg_topo_common::{Context, TopoErrorIntrospect, TopoErrorKind};
use multipg_topo::TopoStore;

use crate::{new_server_and_factory, register, Operation};

#[tokio::test]
async fn open_through_the_registry() {
    register();
    // A second call must be a no-op rather than a duplicate registration.
    register();

    let ts = TopoStore::open("memory", "/", &["memory".to_owned()]).unwrap();
    ts.close().unwrap();

    let err = TopoStore::open("nonexistent", "/", &[])
        .err()
        .expect("unknown implementation should fail");
    assert!(err.is_no_implementation());
}

#[tokio::test]
async fn persistent_and_one_time_operation_errors() {
    let ctx = Context::background();
    let (ts, factory) = new_server_and_factory(&ctx, &[]).await;
    let conn = ts.conn_for_cell(&ctx, "global").await.unwrap();

    conn.create(&ctx, "/some/file", b"x").await.unwrap();

    factory.add_one_time_operation_error(
        Operation::Get,
        "/some/file",
        TopoErrorKind::Timeout("/some/file".to_owned()),
    );
    assert!(conn.get(&ctx, "/some/file").await.unwrap_err().is_timeout());
    conn.get(&ctx, "/some/file").await.unwrap();

    factory.add_operation_error(
        Operation::Get,
        "/some/.*",
        TopoErrorKind::ResourceExhausted("throttled".to_owned()),
    );
    for _ in 0..3 {
        assert!(conn
            .get(&ctx, "/some/file")
            .await
            .unwrap_err()
            .is_resource_exhausted());
    }
    ts.close().unwrap();
}

#[tokio::test]
async fn set_error_poisons_every_call() {
    let ctx = Context::background();
    let (ts, factory) = new_server_and_factory(&ctx, &[]).await;
    let conn = ts.conn_for_cell(&ctx, "global").await.unwrap();

    factory.set_error(TopoErrorKind::Internal("backend gone".to_owned()));
    let err = conn.create(&ctx, "/f", b"x").await.unwrap_err();
    assert!(err.to_string().contains("backend gone"));
    let err = conn.list_dir(&ctx, "/", false).await.unwrap_err();
    assert!(err.to_string().contains("backend gone"));
}

#[tokio::test]
async fn closed_connection_rejects_operations() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
    let conn = ts.conn_for_cell(&ctx, "global").await.unwrap();

    conn.close().unwrap();
    let err = conn.get(&ctx, "/anything").await.unwrap_err();
    assert!(err.to_string().contains("closed"));
}

#[tokio::test]
async fn namespaces_are_isolated_per_cell() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1", "zone-2"]).await;

    let one = ts.conn_for_cell(&ctx, "zone-1").await.unwrap();
    let two = ts.conn_for_cell(&ctx, "zone-2").await.unwrap();

    one.create(&ctx, "/only-in-one", b"x").await.unwrap();
    one.get(&ctx, "/only-in-one").await.unwrap();
    assert!(two.get(&ctx, "/only-in-one").await.unwrap_err().is_no_node());
    ts.close().unwrap();
}

#[tokio::test]
async fn deep_list_matches_by_substring() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
    let conn = ts.conn_for_cell(&ctx, "global").await.unwrap();

    conn.create(&ctx, "/toplevel/nested/myfile", b"a").await.unwrap();

    // "level/nes" is not a path prefix of anything, but it is a substring of
    // the absolute key.
    let entries = conn.list(&ctx, "level/nes").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "/toplevel/nested/myfile");

    assert!(conn.list(&ctx, "/no-match").await.unwrap_err().is_no_node());
    ts.close().unwrap();
}

#[tokio::test]
async fn lock_with_ttl_never_expires_here() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
    let conn = ts.conn_for_cell(&ctx, "global").await.unwrap();

    conn.create(&ctx, "/locks/leader/Lock", b"x").await.unwrap();
    let descriptor = conn
        .lock_with_ttl(&ctx, "/locks/leader", "me", Duration::from_millis(5))
        .await
        .expect("lock_with_ttl failed");

    tokio::time::sleep(Duration::from_millis(20)).await;
    descriptor.check(&ctx).await.unwrap();
    let err = conn
        .try_lock(&ctx, "/locks/leader", "other")
        .await
        .err()
        .expect("lock should still be held past the ttl");
    assert!(err.is_node_exists());

    descriptor.unlock(&ctx).await.unwrap();
    ts.close().unwrap();
}

#[tokio::test]
async fn context_deadline_and_cancel_map_to_kinds() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &[]).await;
    let conn = ts.conn_for_cell(&ctx, "global").await.unwrap();

    let expired = ctx.with_timeout(Duration::from_millis(1));
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(conn.get(&expired, "/f").await.unwrap_err().is_timeout());

    let (cancelled, token) = ctx.with_cancel();
    token.cancel();
    assert!(conn.get(&cancelled, "/f").await.unwrap_err().is_interrupted());
    ts.close().unwrap();
}
