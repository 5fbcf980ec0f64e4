//! Resolver and end-to-end routing tests.

use std::time::Duration;

use client::{Client, Resolver};
use protocol::{frame, ApiRequest, ApiResponse, ServerInfo};
use testsupport::TestCluster;
use tokio::net::TcpListener;

/// A stub node that only answers GetServers with a fixed list.
async fn fake_server(servers: Vec<ServerInfo>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                break;
            };
            let servers = servers.clone();
            tokio::spawn(async move {
                loop {
                    let request: ApiRequest = match frame::read_message_async(&mut conn).await {
                        Ok(request) => request,
                        Err(_) => break,
                    };
                    let response = match request {
                        ApiRequest::GetServers => ApiResponse::Servers {
                            servers: servers.clone(),
                        },
                        _ => break,
                    };
                    if frame::write_message_async(&mut conn, &response).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

#[tokio::test]
async fn resolver_returns_annotated_servers() {
    let expected = vec![
        ServerInfo {
            id: "leader".to_string(),
            rpc_addr: "localhost:9001".to_string(),
            is_leader: true,
        },
        ServerInfo {
            id: "follower".to_string(),
            rpc_addr: "localhost:9002".to_string(),
            is_leader: false,
        },
    ];

    let addr = fake_server(expected.clone()).await;
    let resolver = Resolver::new([addr]);

    let servers = resolver.resolve().await.unwrap();
    assert_eq!(servers, expected);

    // Resolving again yields the same state.
    let again = resolver.resolve().await.unwrap();
    assert_eq!(again, expected);
}

#[tokio::test]
async fn resolver_skips_dead_seeds() {
    let expected = vec![ServerInfo {
        id: "1".to_string(),
        rpc_addr: "localhost:9001".to_string(),
        is_leader: true,
    }];

    let live = fake_server(expected.clone()).await;
    let resolver = Resolver::new(["127.0.0.1:1".to_string(), live]);

    let servers = resolver.resolve().await.unwrap();
    assert_eq!(servers, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn produce_and_consume_round_trip() {
    let cluster = TestCluster::start(3).await.unwrap();
    let mut client = Client::connect([cluster.leader().addr.clone()]).await.unwrap();

    assert_eq!(client.servers().len(), 3);

    let offset = client.produce(b"hello world".to_vec()).await.unwrap();
    assert_eq!(offset, 0);

    // Consume lands on a follower, which may lag the write briefly.
    let mut record = None;
    for _ in 0..200 {
        match client.consume(offset).await {
            Ok(r) => {
                record = Some(r);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    }
    let record = record.expect("followers never caught up");
    assert_eq!(record.value, b"hello world");
    assert_eq!(record.offset, 0);

    client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn produce_through_a_follower_seed_reaches_the_leader() {
    let cluster = TestCluster::start(3).await.unwrap();

    // Seed with a follower: the resolved list still tags the leader.
    let follower_addr = cluster.nodes[2].addr.clone();
    let mut client = Client::connect([follower_addr]).await.unwrap();

    let offset = client.produce(b"routed".to_vec()).await.unwrap();
    assert_eq!(offset, 0);

    client.close().await;
}
