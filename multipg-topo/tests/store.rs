use std::sync::Arc;

use multipg_topo::GLOBAL_CELL;
use multipg_topo_common::{Context, TopoErrorIntrospect};
use multipg_topo_memory::new_server_and_factory;

#[tokio::test]
async fn conn_for_cell_returns_global_and_cached_cells() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let global = ts.conn_for_cell(&ctx, GLOBAL_CELL).await.unwrap();
    assert!(Arc::ptr_eq(&global, ts.global_conn()));

    let first = ts.conn_for_cell(&ctx, "zone-1").await.unwrap();
    let second = ts.conn_for_cell(&ctx, "zone-1").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    ts.close().unwrap();
}

#[tokio::test]
async fn conn_for_cell_unknown_cell_is_no_node() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;
    let err = ts
        .conn_for_cell(&ctx, "nonexistent")
        .await
        .err()
        .expect("unknown cell should fail");
    assert!(err.is_no_node());
    ts.close().unwrap();
}

#[tokio::test]
async fn conn_for_cell_reconnects_when_cell_config_changes() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let first = ts.conn_for_cell(&ctx, "zone-1").await.unwrap();
    ts.update_cell_fields(&ctx, "zone-1", |c| {
        c.server_addresses.push("replacement:2181".to_owned());
        Ok(())
    })
    .await
    .unwrap();
    let second = ts.conn_for_cell(&ctx, "zone-1").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));

    ts.close().unwrap();
}

#[tokio::test]
async fn done_context_fails_fast() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;
    let (cancelled, token) = ctx.with_cancel();
    token.cancel();
    let err = ts
        .conn_for_cell(&cancelled, "zone-1")
        .await
        .err()
        .expect("done context should fail");
    assert!(err.is_interrupted());
    ts.close().unwrap();
}
