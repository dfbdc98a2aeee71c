use multipg_topo::records::ComponentKind;
use multipg_topo::{new_multi_gateway, MultiGatewayInfo};
use multipg_topo_common::{Context, TopoError, TopoErrorIntrospect, TopoErrorKind};
use multipg_topo_memory::{new_server_and_factory, Operation};

fn gateway(cell: &str, name: &str, host: &str, grpc: i32) -> multipg_topo::records::MultiGateway {
    let mut gw = new_multi_gateway(name, cell, host);
    gw.port_map.insert("grpc".to_owned(), grpc);
    gw
}

#[tokio::test]
async fn new_multi_gateway_generates_a_name_when_empty() {
    let gw = new_multi_gateway("", "zone-1", "host1");
    let id = gw.id.unwrap();
    assert_eq!(id.name.len(), 8);
    assert_eq!(id.cell, "zone-1");
    assert_eq!(id.component(), ComponentKind::Multigateway);
}

#[tokio::test]
async fn gateway_crud_roundtrip() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let gw = gateway("zone-1", "gw1", "host1", 8080);
    let id = gw.id.clone().unwrap();
    ts.create_multi_gateway(&ctx, &gw).await.unwrap();

    let info = ts.get_multi_gateway(&ctx, &id).await.unwrap();
    assert_eq!(info.gateway, gw);
    assert_eq!(info.addr(), "host1:8080");
    assert_eq!(info.id_string(), "multigateway-zone-1-gw1");

    let err = ts.create_multi_gateway(&ctx, &gw).await.unwrap_err();
    assert!(err.is_node_exists());

    ts.delete_multi_gateway(&ctx, &id).await.unwrap();
    let err = ts.get_multi_gateway(&ctx, &id).await.unwrap_err();
    assert!(err.is_no_node());
    ts.close().unwrap();
}

#[tokio::test]
async fn update_multi_gateway_refreshes_the_version() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let gw = gateway("zone-1", "gw1", "host1", 8080);
    let id = gw.id.clone().unwrap();
    ts.create_multi_gateway(&ctx, &gw).await.unwrap();

    let mut info: MultiGatewayInfo = ts.get_multi_gateway(&ctx, &id).await.unwrap();
    let before = info.version().clone();
    info.gateway.port_map.insert("http".to_owned(), 8081);
    ts.update_multi_gateway(&ctx, &mut info).await.unwrap();
    assert_ne!(info.version(), &before);

    let reread = ts.get_multi_gateway(&ctx, &id).await.unwrap();
    assert_eq!(reread.gateway.port_map.get("http"), Some(&8081));
    ts.close().unwrap();
}

#[tokio::test]
async fn update_multi_gateway_fields_applies_and_returns_the_record() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let gw = gateway("zone-1", "gw1", "host1", 8080);
    let id = gw.id.clone().unwrap();
    ts.create_multi_gateway(&ctx, &gw).await.unwrap();

    let updated = ts
        .update_multi_gateway_fields(&ctx, &id, |gw| {
            gw.port_map.insert("http".to_owned(), 8081);
            Ok(())
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.port_map.get("http"), Some(&8081));

    let skipped = ts
        .update_multi_gateway_fields(&ctx, &id, |_| Err(TopoError::no_update_needed()))
        .await
        .unwrap();
    assert!(skipped.is_none());
    ts.close().unwrap();
}

#[tokio::test]
async fn gateway_ids_by_cell() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    assert!(ts
        .get_multi_gateway_ids_by_cell(&ctx, "zone-1")
        .await
        .unwrap()
        .is_empty());

    for name in ["gw2", "gw1"] {
        ts.create_multi_gateway(&ctx, &gateway("zone-1", name, "host", 8080))
            .await
            .unwrap();
    }

    let ids = ts.get_multi_gateway_ids_by_cell(&ctx, "zone-1").await.unwrap();
    let names: Vec<_> = ids.iter().map(|id| id.name.as_str()).collect();
    assert_eq!(names, vec!["gw1", "gw2"]);

    let err = ts
        .get_multi_gateway_ids_by_cell(&ctx, "nonexistent")
        .await
        .unwrap_err();
    assert!(err.is_no_node());
    ts.close().unwrap();
}

#[tokio::test]
async fn gateways_by_cell_via_list() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let gw1 = gateway("zone-1", "gw1", "host1", 8080);
    let gw2 = gateway("zone-1", "gw2", "host2", 8081);
    ts.create_multi_gateway(&ctx, &gw1).await.unwrap();
    ts.create_multi_gateway(&ctx, &gw2).await.unwrap();

    let result = ts.get_multi_gateways_by_cell(&ctx, "zone-1").await.unwrap();
    assert!(result.partial_err.is_none());
    let mut hosts: Vec<_> = result
        .records
        .iter()
        .map(|i| i.gateway.hostname.clone())
        .collect();
    hosts.sort();
    assert_eq!(hosts, vec!["host1", "host2"]);
    ts.close().unwrap();
}

#[tokio::test]
async fn gateways_by_cell_falls_back_when_list_is_unavailable() {
    let ctx = Context::background();
    let (ts, factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    ts.create_multi_gateway(&ctx, &gateway("zone-1", "gw1", "host1", 8080))
        .await
        .unwrap();
    ts.create_multi_gateway(&ctx, &gateway("zone-1", "gw2", "host2", 8081))
        .await
        .unwrap();

    factory.add_operation_error(
        Operation::List,
        "gateways",
        TopoErrorKind::NoImplementation("memory".to_owned()),
    );

    let result = ts.get_multi_gateways_by_cell(&ctx, "zone-1").await.unwrap();
    assert!(result.partial_err.is_none());
    assert_eq!(result.records.len(), 2);
    let mut names: Vec<_> = result
        .records
        .iter()
        .map(|i| i.gateway.id.as_ref().unwrap().name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["gw1", "gw2"]);
    ts.close().unwrap();
}

#[tokio::test]
async fn init_multi_gateway_updates_in_place() {
    let ctx = Context::background();
    let (ts, _factory) = new_server_and_factory(&ctx, &["zone-1"]).await;

    let mut gw = gateway("zone-1", "gw1", "host1", 8080);
    let id = gw.id.clone().unwrap();
    ts.init_multi_gateway(&ctx, &gw, false).await.unwrap();

    // Same record again without allow_update collides.
    let err = ts.init_multi_gateway(&ctx, &gw, false).await.unwrap_err();
    assert!(err.is_node_exists());

    gw.hostname = "host2".to_owned();
    ts.init_multi_gateway(&ctx, &gw, true).await.unwrap();
    let reread = ts.get_multi_gateway(&ctx, &id).await.unwrap();
    assert_eq!(reread.gateway.hostname, "host2");
    ts.close().unwrap();
}
