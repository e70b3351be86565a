//! Gateway Module Tests
//!
//! ## Test Scopes
//! - **Slot Selection**: Hashing keys onto the live slave set.
//! - **Assignment Messages**: The `#<index> <count>` greeting.
//! - **Fan-out**: A live gateway with real slaves, and a scripted slave for failure cases.

#[cfg(test)]
mod tests {
    use crate::commands::handlers::CommandDispatcher;
    use crate::gateway::service::{Gateway, GatewayHandle};
    use crate::gateway::slave::run_slave;
    use crate::gateway::types::{format_assignment, parse_assignment, slave_index};
    use crate::membership::types::JOIN_TAG;
    use crate::storage::keyspace::Keyspace;
    use crate::transport::codec::EnvelopeCodec;
    use crate::transport::types::Message;

    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::codec::Framed;

    async fn start_gateway() -> GatewayHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Gateway::start(listener, 2, 1).unwrap()
    }

    async fn wait_for_slaves(handle: &GatewayHandle, count: usize) {
        for _ in 0..200 {
            if handle.gateway.live_slaves().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("expected {} slaves", count);
    }

    async fn request(addr: SocketAddr, lines: &[&str]) -> Vec<String> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut replies = Vec::new();
        for line in lines {
            writer
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .unwrap();
            let mut reply = String::new();
            tokio::time::timeout(Duration::from_secs(10), reader.read_line(&mut reply))
                .await
                .expect("reply timed out")
                .unwrap();
            replies.push(reply);
        }
        replies
    }

    // ============================================================
    // SLOT SELECTION TESTS
    // ============================================================

    #[test]
    fn test_no_slaves_no_slot() {
        assert_eq!(slave_index("key", 7, 0), None);
    }

    #[test]
    fn test_slot_is_stable_and_in_range() {
        for live in 1..=32 {
            for i in 0..100 {
                let key = format!("key-{}", i);
                let idx = slave_index(&key, 1234, live).unwrap();
                assert!(idx < live);
                assert_eq!(slave_index(&key, 1234, live), Some(idx));
            }
        }
    }

    #[test]
    fn test_slot_ignores_surrounding_whitespace() {
        assert_eq!(slave_index(" key\n", 99, 5), slave_index("key", 99, 5));
    }

    // ============================================================
    // ASSIGNMENT MESSAGE TESTS
    // ============================================================

    #[test]
    fn test_assignment_format() {
        assert_eq!(format_assignment(2, 3), "#2 3");
        assert_eq!(parse_assignment(b"#2 3"), Some((2, 3)));
        assert_eq!(parse_assignment(b"#0 1\n"), Some((0, 1)));
    }

    #[test]
    fn test_bad_assignments() {
        assert_eq!(parse_assignment(b"#3 3"), None);
        assert_eq!(parse_assignment(b"2 3"), None);
        assert_eq!(parse_assignment(b"#x 3"), None);
        assert_eq!(parse_assignment(b"#1"), None);
        assert_eq!(parse_assignment(&[b'#', 0xff, b' ', b'1']), None);
    }

    // ============================================================
    // FAN-OUT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_without_slaves_routing_is_unavailable() {
        let gateway = start_gateway().await;
        let replies = request(gateway.addr, &["SET a 1", "COUNT", "NOPE"]).await;
        assert_eq!(replies[0], "ROUTING UNAVAILABLE\n");
        assert_eq!(replies[1], "ERR the gateway only accepts keyed commands\n");
        assert_eq!(replies[2], "COMMAND NOT FOUND\n");
        assert_eq!(gateway.gateway.waiting(), 0);
    }

    #[tokio::test]
    async fn test_keys_spread_over_slaves() {
        let gateway = start_gateway().await;
        let keyspaces: Vec<Arc<Keyspace>> = (0..2).map(|_| Arc::new(Keyspace::default())).collect();
        for keyspace in &keyspaces {
            let dispatcher = CommandDispatcher::new(keyspace.clone());
            tokio::spawn(run_slave(gateway.addr, dispatcher));
        }
        wait_for_slaves(&gateway, 2).await;

        let sets: Vec<String> = (0..50).map(|i| format!("SET key{} v{}", i, i)).collect();
        let sets: Vec<&str> = sets.iter().map(String::as_str).collect();
        let replies = request(gateway.addr, &sets).await;
        assert!(replies.iter().all(|r| r == "OK\n"));

        let replies = request(gateway.addr, &["GET key7", "INC key7", "GET missing"]).await;
        assert_eq!(replies[0], "v7\n");
        assert_eq!(replies[1], "TYPE MISMATCH, NOT an integer\n");
        assert_eq!(replies[2], "NOT FOUND\n");

        // Each key lives on exactly one slave.
        assert_eq!(keyspaces[0].len() + keyspaces[1].len(), 50);
        assert!(keyspaces.iter().all(|k| !k.is_empty()));
    }

    #[tokio::test]
    async fn test_many_clients_share_few_workers() {
        let gateway = start_gateway().await;
        let keyspace = Arc::new(Keyspace::default());
        tokio::spawn(run_slave(gateway.addr, CommandDispatcher::new(keyspace.clone())));
        wait_for_slaves(&gateway, 1).await;

        let addr = gateway.addr;
        let clients: Vec<_> = (0..8)
            .map(|c| {
                tokio::spawn(async move {
                    let lines: Vec<String> = (0..10).map(|i| format!("SET c{}-{} v", c, i)).collect();
                    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
                    request(addr, &lines).await
                })
            })
            .collect();
        for client in clients {
            assert!(client.await.unwrap().iter().all(|r| r == "OK\n"));
        }

        assert_eq!(keyspace.len(), 80);
        assert_eq!(gateway.gateway.waiting(), 0);
    }

    /// Scripted slave: joins and checks the greeting.
    async fn fake_slave(addr: SocketAddr) -> Framed<TcpStream, EnvelopeCodec> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[JOIN_TAG]).await.unwrap();
        let mut framed = Framed::new(stream, EnvelopeCodec::new());
        let greeting = framed.next().await.unwrap().unwrap();
        assert_eq!(greeting.origin, 0);
        assert_eq!(parse_assignment(&greeting.payload), Some((0, 1)));
        framed
    }

    #[tokio::test]
    async fn test_reply_is_relayed_by_tag() {
        let gateway = start_gateway().await;
        let mut slave = fake_slave(gateway.addr).await;
        wait_for_slaves(&gateway, 1).await;

        let addr = gateway.addr;
        let client = tokio::spawn(async move { request(addr, &["GET user:1"]).await });

        let job = slave.next().await.unwrap().unwrap();
        assert_ne!(job.origin, 0);
        assert_eq!(&job.payload[..], b"GET user:1");
        slave.send(Message::new(job.origin, "alice\n")).await.unwrap();

        assert_eq!(client.await.unwrap(), vec!["alice\n".to_string()]);
    }

    #[tokio::test]
    async fn test_lost_slave_fails_its_requests() {
        let gateway = start_gateway().await;
        let mut slave = fake_slave(gateway.addr).await;
        wait_for_slaves(&gateway, 1).await;

        let addr = gateway.addr;
        let client = tokio::spawn(async move { request(addr, &["SET k v", "SET k v"]).await });

        let _ = slave.next().await.unwrap().unwrap();
        drop(slave);

        let replies = client.await.unwrap();
        assert_eq!(replies[0], "NODE UNREACHABLE\n");
        assert_eq!(replies[1], "ROUTING UNAVAILABLE\n");
        assert_eq!(gateway.gateway.live_slaves().await, 0);
    }
}
