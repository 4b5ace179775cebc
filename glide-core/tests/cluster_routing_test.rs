//! Cluster routing: slot resolution, redirections, fan-out and admission

mod common;

#[cfg(test)]
mod tests {
    use super::common::{MockCluster, key_on, node, test_config};
    use glide_core::{
        ClusterValue, GlideClusterClient, GlideError, NodeRole, ReadFrom, RoutingDirective, Value,
        hash_slot,
    };
    use std::time::Duration;

    async fn connect(cluster: &MockCluster) -> GlideClusterClient {
        GlideClusterClient::with_connector(test_config(vec![node(7000)]), cluster.connector())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get_across_shards() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;

        for i in 0..20 {
            client
                .kv()
                .set(format!("key:{}", i), format!("value:{}", i))
                .await
                .unwrap();
        }
        for i in 0..20 {
            let value = client.kv().get(format!("key:{}", i)).await.unwrap();
            assert_eq!(value, Some(format!("value:{}", i)));
        }

        // every command landed on the owner, no redirections needed
        for primary in cluster.primaries() {
            assert!(cluster.calls_to(&primary, "SET") > 0);
        }
        assert_eq!(client.topology_version(), 1);
    }

    #[tokio::test]
    async fn test_cross_slot_rejected_before_io() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;
        let before: usize = cluster
            .primaries()
            .iter()
            .map(|p| cluster.commands(p).len())
            .sum();

        let a = key_on(&cluster, &node(7000), "a");
        let b = key_on(&cluster, &node(7001), "b");
        let err = client.kv().mget(vec![a.as_str(), b.as_str()]).await.unwrap_err();
        assert!(matches!(err, GlideError::CrossSlot { ref command } if command == "MGET"));

        let err = client.kv().del(vec![a.as_str(), b.as_str()]).await.unwrap_err();
        assert!(matches!(err, GlideError::CrossSlot { .. }));

        let err = client
            .kv()
            .mset(&[(a.as_str(), "1"), (b.as_str(), "2")])
            .await
            .unwrap_err();
        assert!(matches!(err, GlideError::CrossSlot { ref command } if command == "MSET"));

        let after: usize = cluster
            .primaries()
            .iter()
            .map(|p| cluster.commands(p).len())
            .sum();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_hash_tags_share_a_slot() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;

        client
            .kv()
            .mset(&[("{user:1}:name", "ada"), ("{user:1}:lang", "rust")])
            .await
            .unwrap();
        let values = client
            .kv()
            .mget(["{user:1}:name", "{user:1}:lang", "{user:1}:missing"])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Some("ada".to_string()), Some("rust".to_string()), None]
        );
        assert_eq!(
            client
                .kv()
                .exists(["{user:1}:name", "{user:1}:lang"])
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_moved_updates_slot_owner() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;

        let key = key_on(&cluster, &node(7000), "moved");
        let slot = hash_slot(key.as_bytes());
        cluster.insert(&key, "here");
        cluster.move_slot(slot, &node(7002));

        assert_eq!(client.kv().get(&key).await.unwrap(), Some("here".to_string()));
        assert_eq!(cluster.calls_to(&node(7000), "GET"), 1);
        assert_eq!(cluster.calls_to(&node(7002), "GET"), 1);

        // the redirection was applied to the map: next request goes direct
        assert_eq!(client.kv().get(&key).await.unwrap(), Some("here".to_string()));
        assert_eq!(cluster.calls_to(&node(7000), "GET"), 1);
        assert_eq!(cluster.calls_to(&node(7002), "GET"), 2);
    }

    #[tokio::test]
    async fn test_ask_does_not_change_topology() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;
        let version = client.topology_version();

        let key = key_on(&cluster, &node(7001), "ask");
        let slot = hash_slot(key.as_bytes());
        cluster.insert(&key, "importing");
        cluster.start_migration(slot, &node(7002));

        for _ in 0..2 {
            assert_eq!(
                client.kv().get(&key).await.unwrap(),
                Some("importing".to_string())
            );
        }

        // both requests went to the stable owner first
        assert_eq!(cluster.calls_to(&node(7001), "GET"), 2);
        assert_eq!(cluster.calls_to(&node(7002), "ASKING"), 2);
        assert_eq!(cluster.calls_to(&node(7002), "GET"), 2);
        assert_eq!(client.topology_version(), version);

        let commands = cluster.commands(&node(7002));
        let asking = commands.iter().position(|c| c[0] == "ASKING").unwrap();
        assert_eq!(commands[asking + 1][0], "GET");
    }

    #[tokio::test]
    async fn test_redirection_loop_is_bounded() {
        let cluster = MockCluster::new(2, 0);
        let client = connect(&cluster).await;
        cluster.force_moved(&node(7000), &node(7001));
        cluster.force_moved(&node(7001), &node(7000));

        let key = key_on(&cluster, &node(7000), "loop");
        let err = client.kv().get(&key).await.unwrap_err();
        assert!(matches!(err, GlideError::TooManyRedirections { ref command, .. } if command == "GET"));
    }

    #[tokio::test]
    async fn test_server_error_passed_through() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;

        client.hash().hset("profile", &[("name", "ada")]).await.unwrap();
        let err = client.kv().get("profile").await.unwrap_err();
        match err {
            GlideError::Server { message, .. } => assert!(message.starts_with("WRONGTYPE")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fan_out_keeps_per_node_results() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;
        for i in 0..30 {
            client.kv().set(format!("k{}", i), "v").await.unwrap();
        }

        let sizes = client.dbsize(None).await.unwrap().into_multi().unwrap();
        assert_eq!(sizes.len(), 3);
        let total: i64 = sizes.values().map(|r| *r.as_ref().unwrap()).sum();
        assert_eq!(total, 30);

        cluster.set_down(&node(7001), true);
        let sizes = client.dbsize(None).await.unwrap().into_multi().unwrap();
        assert_eq!(sizes.len(), 3);
        assert!(sizes[&node(7000)].is_ok());
        assert!(sizes[&node(7002)].is_ok());
        assert!(sizes[&node(7001)].is_err());
    }

    #[tokio::test]
    async fn test_routing_directives() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;

        let pong = client.ping(None).await.unwrap();
        assert_eq!(pong.into_single().unwrap(), "PONG");

        let pings = cluster.calls_to(&node(7002), "PING");
        let reply = client
            .custom_command(&["PING"], Some(RoutingDirective::ByAddress(node(7002))))
            .await
            .unwrap();
        assert!(matches!(reply, ClusterValue::Single(Value::Status(ref s)) if s == "PONG"));
        assert_eq!(cluster.calls_to(&node(7002), "PING"), pings + 1);

        let key = key_on(&cluster, &node(7001), "route");
        client
            .custom_command(&["ECHO", "hi"], Some(RoutingDirective::BySlotKey(key)))
            .await
            .unwrap();
        assert_eq!(cluster.calls_to(&node(7001), "ECHO"), 1);

        let infos = client
            .info(Some("server"), Some(RoutingDirective::AllNodes))
            .await
            .unwrap()
            .into_multi()
            .unwrap();
        assert_eq!(infos.len(), 3);
    }

    #[tokio::test]
    async fn test_reads_go_to_replicas() {
        let cluster = MockCluster::new(1, 1);
        let config = test_config(vec![node(7000)]).with_read_from(ReadFrom::PreferReplica);
        let client = GlideClusterClient::with_connector(config, cluster.connector())
            .await
            .unwrap();

        client.kv().set("shared", "1").await.unwrap();
        assert_eq!(client.kv().get("shared").await.unwrap(), Some("1".to_string()));

        assert_eq!(cluster.calls_to(&node(7000), "SET"), 1);
        assert_eq!(cluster.calls_to(&node(8000), "GET"), 1);
        assert_eq!(cluster.calls_to(&node(8000), "READONLY"), 1);
    }

    #[tokio::test]
    async fn test_lazy_client_connects_on_first_command() {
        let cluster = MockCluster::new(3, 0);
        let config = test_config(vec![node(7000)]).with_lazy_connect(true);
        let client = GlideClusterClient::with_connector(config, cluster.connector())
            .await
            .unwrap();
        assert_eq!(cluster.total_connects(), 0);
        assert_eq!(client.topology_version(), 0);

        client.kv().set("lazy", "yes").await.unwrap();
        assert!(cluster.total_connects() > 0);
        assert_eq!(client.topology_version(), 1);
    }

    #[tokio::test]
    async fn test_inflight_limit() {
        let cluster = MockCluster::new(3, 0);
        let config = test_config(vec![node(7000)]).with_inflight_requests_limit(1);
        let client = GlideClusterClient::with_connector(config, cluster.connector())
            .await
            .unwrap();

        let blocked = {
            let client = client.clone();
            tokio::spawn(async move { client.custom_command(&["DEBUG", "SLEEP", "0"], None).await })
        };
        while cluster.calls("DEBUG") == 0 {
            tokio::task::yield_now().await;
        }

        let err = client.kv().get("x").await.unwrap_err();
        assert!(matches!(err, GlideError::InflightLimitReached(1)));

        cluster.release();
        blocked.await.unwrap().unwrap();
        assert_eq!(client.kv().get("x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_rejects_new_requests() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;
        client.kv().set("a", "1").await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), client.close())
            .await
            .unwrap();
        assert!(matches!(
            client.kv().get("a").await,
            Err(GlideError::ClientClosed)
        ));
        // closing twice is harmless
        client.close().await;
    }

    #[tokio::test]
    async fn test_nodes_report_roles() {
        let cluster = MockCluster::new(2, 1);
        let client = connect(&cluster).await;

        let nodes = client.nodes();
        assert_eq!(nodes.len(), 4);
        let primaries: Vec<_> = nodes
            .iter()
            .filter(|n| matches!(n.role, NodeRole::Primary))
            .map(|n| n.address.clone())
            .collect();
        assert_eq!(primaries, vec![node(7000), node(7001)]);
    }

    #[tokio::test]
    async fn test_slot_key_directive_follows_read_policy() {
        let cluster = MockCluster::new(1, 1);
        let config = test_config(vec![node(7000)]).with_read_from(ReadFrom::PreferReplica);
        let client = GlideClusterClient::with_connector(config, cluster.connector())
            .await
            .unwrap();
        let route = || Some(RoutingDirective::BySlotKey("shared".to_string()));

        client
            .custom_command(&["SET", "shared", "1"], route())
            .await
            .unwrap();
        let value = client
            .custom_command(&["GET", "shared"], route())
            .await
            .unwrap()
            .into_single()
            .unwrap();
        assert_eq!(value, Value::BulkString(b"1".to_vec()));
        assert_eq!(cluster.calls_to(&node(7000), "SET"), 1);
        assert_eq!(cluster.calls_to(&node(8000), "GET"), 1);
    }

    #[tokio::test]
    async fn test_departed_node_connection_is_released() {
        let cluster = MockCluster::new(2, 1);
        let client =
            GlideClusterClient::with_connector(test_config(vec![node(7001)]), cluster.connector())
                .await
                .unwrap();
        let key = key_on(&cluster, &node(7000), "user");
        client.kv().set(&key, "1").await.unwrap();
        assert_eq!(cluster.open_connections(&node(7000)), 1);

        // demote 7000, then take it out of the cluster
        let promoted = cluster.failover(&node(7000));
        cluster.remove_node(&node(7000));
        client.refresh_topology().await.unwrap();

        assert_eq!(cluster.open_connections(&node(7000)), 0);
        assert!(client.nodes().iter().all(|n| n.address != node(7000)));
        assert_eq!(client.kv().get(&key).await.unwrap(), Some("1".to_string()));
        assert_eq!(cluster.calls_to(&promoted, "GET"), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_does_not_satisfy_waiting_callers() {
        let cluster = MockCluster::new(3, 0);
        let client = connect(&cluster).await;
        assert_eq!(client.topology_version(), 1);
        cluster.move_slot(0, &node(7001));
        cluster.fail_slot_queries(3, true);

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.refresh_topology().await })
        };
        while cluster.calls("CLUSTER") < 2 {
            tokio::task::yield_now().await;
        }
        // the second caller queues behind the in-progress refresh
        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.refresh_topology().await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        cluster.release();

        let first = first.await.unwrap();
        assert!(matches!(first, Err(GlideError::TopologyUnavailable(_))), "{:?}", first);
        second.await.unwrap().unwrap();
        assert_eq!(client.topology_version(), 2);
        assert_eq!(cluster.calls("CLUSTER"), 5);
    }
}
