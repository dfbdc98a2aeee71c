use multipg_topo::records::{ComponentKind, MultiPooler, PoolerType, ServingStatus};
use multipg_topo::{new_multi_pooler, DatabaseShard, GetMultiPoolersByCellOptions};
use multipg_topo_common::{Conn, Context, TopoErrorIntrospect, TopoErrorKind};
use multipg_topo_memory::{new_server_and_factory, Operation};

fn pooler(cell: &str, name: &str, database: &str, shard: &str) -> MultiPooler {
    let mut mp = new_multi_pooler(name, cell, "host1");
    mp.port_map.insert("grpc".to_owned(), 8080);
    mp.database = database.to_owned();
    mp.shard = shard.to_owned();
    mp.pooler_type = PoolerType::Primary as i32;
    mp.serving_status = ServingStatus::Serving as i32;
    mp
}

#[tokio::test]
async fn new_multi_pooler_generates_a_name_when_empty() {
    let mp = new_multi_pooler("", "zone-1", "host1");
    let id = mp.id.unwrap();
    assert_eq!(id.name.len(), 8);
    assert_eq!(id.component(), ComponentKind::Multipooler);
}

#[tokio::test]
async fn pooler_crud_roundtrip() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let mp = pooler("zone-1", "pooler1", "db1", "0");
    let id = mp.id.clone().unwrap();
    ts.create_multi_pooler(&ctx, &mp).await.unwrap();

    let info = ts.get_multi_pooler(&ctx, &id).await.unwrap();
    assert_eq!(info.pooler, mp);
    assert_eq!(info.addr(), "host1:8080");
    assert_eq!(info.id_string(), "multipooler-zone-1-pooler1");
    assert_eq!(info.pooler.pooler_type(), PoolerType::Primary);

    let err = ts.create_multi_pooler(&ctx, &mp).await.unwrap_err();
    assert!(err.is_node_exists());

    ts.delete_multi_pooler(&ctx, &id).await.unwrap();
    assert!(ts.get_multi_pooler(&ctx, &id).await.unwrap_err().is_no_node());
    ts.close().unwrap();
}

#[tokio::test]
async fn update_multi_pooler_fields_retries_on_bad_version() {
    let ctx = Context::background();
    let (ts, factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let mp = pooler("zone-1", "pooler1", "db1", "0");
    let id = mp.id.clone().unwrap();
    ts.create_multi_pooler(&ctx, &mp).await.unwrap();

    factory.add_one_time_operation_error(
        Operation::Update,
        "poolers/multipooler-zone-1-pooler1/Pooler",
        TopoErrorKind::BadVersion("poolers/multipooler-zone-1-pooler1/Pooler".to_owned()),
    );

    let mut calls = 0;
    let updated = ts
        .update_multi_pooler_fields(&ctx, &id, |mp| {
            calls += 1;
            mp.port_map.insert("http".to_owned(), 8081);
            Ok(())
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(updated.port_map.get("http"), Some(&8081));
    ts.close().unwrap();
}

#[tokio::test]
async fn poolers_by_cell_filters_by_database_shard() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    ts.create_multi_pooler(&ctx, &pooler("zone-1", "p1", "db1", "0"))
        .await
        .unwrap();
    ts.create_multi_pooler(&ctx, &pooler("zone-1", "p2", "db1", "1"))
        .await
        .unwrap();
    ts.create_multi_pooler(&ctx, &pooler("zone-1", "p3", "db2", "0"))
        .await
        .unwrap();

    let all = ts
        .get_multi_poolers_by_cell(&ctx, "zone-1", &GetMultiPoolersByCellOptions::default())
        .await
        .unwrap();
    assert_eq!(all.records.len(), 3);

    let db1 = ts
        .get_multi_poolers_by_cell(
            &ctx,
            "zone-1",
            &GetMultiPoolersByCellOptions {
                database_shard: Some(DatabaseShard {
                    database: "db1".to_owned(),
                    shard: String::new(),
                }),
            },
        )
        .await
        .unwrap();
    assert_eq!(db1.records.len(), 2);

    let db1_shard1 = ts
        .get_multi_poolers_by_cell(
            &ctx,
            "zone-1",
            &GetMultiPoolersByCellOptions {
                database_shard: Some(DatabaseShard {
                    database: "db1".to_owned(),
                    shard: "1".to_owned(),
                }),
            },
        )
        .await
        .unwrap();
    assert_eq!(db1_shard1.records.len(), 1);
    assert_eq!(db1_shard1.records[0].pooler.shard, "1");
    ts.close().unwrap();
}

#[tokio::test]
async fn poolers_by_cell_falls_back_when_list_is_unavailable() {
    let ctx = Context::background();
    let (ts, factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    ts.create_multi_pooler(&ctx, &pooler("zone-1", "p1", "db1", "0"))
        .await
        .unwrap();
    ts.create_multi_pooler(&ctx, &pooler("zone-1", "p2", "db1", "1"))
        .await
        .unwrap();

    factory.add_operation_error(
        Operation::List,
        "poolers",
        TopoErrorKind::NoImplementation("memory".to_owned()),
    );

    let result = ts
        .get_multi_poolers_by_cell(&ctx, "zone-1", &GetMultiPoolersByCellOptions::default())
        .await
        .unwrap();
    assert!(result.partial_err.is_none());
    assert_eq!(result.records.len(), 2);
    ts.close().unwrap();
}

#[tokio::test]
async fn pooler_map_drops_deleted_and_reports_partial_reads() {
    let ctx = Context::background();
    let (ts, factory) = new_server_and_factory(&ctx, &["z1"]).await;

    let mut ids = Vec::new();
    for name in ["p1", "p2", "p3"] {
        let mp = pooler("z1", name, "db1", "0");
        ids.push(mp.id.clone().unwrap());
        ts.create_multi_pooler(&ctx, &mp).await.unwrap();
    }

    // Remove p2's file behind the store's back: a concurrent deletion.
    let conn = ts.conn_for_cell(&ctx, "z1").await.unwrap();
    conn.delete(&ctx, "poolers/multipooler-z1-p2/Pooler", None)
        .await
        .unwrap();

    let result = ts.get_multi_pooler_map(&ctx, ids.clone(), None).await;
    assert!(result.partial_err.is_none());
    assert_eq!(result.records.len(), 2);
    assert!(result.records.contains_key("multipooler-z1-p1"));
    assert!(result.records.contains_key("multipooler-z1-p3"));

    factory.add_operation_error(
        Operation::Get,
        "poolers/multipooler-z1-p3/Pooler",
        TopoErrorKind::Internal("injected read failure".to_owned()),
    );

    let result = ts.get_multi_pooler_map(&ctx, ids, None).await;
    assert_eq!(result.records.len(), 1);
    assert!(result.records.contains_key("multipooler-z1-p1"));
    let err = result.partial_err.unwrap();
    assert!(err.is_partial_result());
    ts.close().unwrap();
}

#[tokio::test]
async fn init_multi_pooler_refuses_identity_changes() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let mp = pooler("zone-1", "pooler1", "db1", "0");
    let id = mp.id.clone().unwrap();
    ts.init_multi_pooler(&ctx, &mp, false, false).await.unwrap();

    // Same identity, new hostname: updated in place.
    let mut updated = mp.clone();
    updated.hostname = "host2".to_owned();
    ts.init_multi_pooler(&ctx, &updated, false, true)
        .await
        .unwrap();
    let reread = ts.get_multi_pooler(&ctx, &id).await.unwrap();
    assert_eq!(reread.pooler.hostname, "host2");

    // Different database/shard: refused even with allow_update.
    let mut moved = mp.clone();
    moved.database = "db2".to_owned();
    let err = ts
        .init_multi_pooler(&ctx, &moved, false, true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Delete and re-add"));
    ts.close().unwrap();
}
