mod common;

use common::{FlakyCounter, Harness, fast_config, harness_with, key};
use core::time::Duration;
use seqd_core::{
    Allocation,
    protocol::{AllocationRequest, decode_reply},
};
use seqd_server::server::{config::EngineConfig, connection::listener::Listener};
use std::{collections::HashSet, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{sleep, timeout},
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

async fn start(config: EngineConfig, counter: FlakyCounter) -> (SocketAddr, Harness) {
    let h = harness_with(config, counter);
    let listener = Listener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.serve(Arc::clone(&h.engine)));
    (addr, h)
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Next reply line, `None` once the server closed the connection.
    async fn next_line(&mut self) -> Option<String> {
        timeout(READ_TIMEOUT, self.lines.next_line())
            .await
            .expect("server did not answer in time")
            .ok()
            .flatten()
    }

    async fn request(&mut self, app: &str, bucket: &str, step: u64) -> Allocation {
        let line = AllocationRequest::new(app, bucket, step).encode().unwrap();
        self.send_line(&line).await;
        let reply = self.next_line().await.expect("connection closed");
        decode_reply(&reply).unwrap()
    }

    async fn request_issued(&mut self, app: &str, bucket: &str) -> u64 {
        loop {
            if let Some(id) = self.request(app, bucket, 0).await.id() {
                return id;
            }
            sleep(Duration::from_millis(2)).await;
        }
    }
}

#[tokio::test]
async fn serves_many_requests_on_one_connection() {
    let (addr, _h) = start(fast_config(), FlakyCounter::default()).await;
    let mut client = Client::connect(addr).await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(client.request_issued("app1", "b1").await);
    }
    assert_eq!(ids, [1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn zero_and_exhaustion_differ_on_the_wire() {
    let (addr, h) = start(fast_config(), FlakyCounter::failing()).await;
    h.buffer.seed(&key("app1", "b1"), [0]);
    let mut client = Client::connect(addr).await;

    let request = AllocationRequest::new("app1", "b1", 10).encode().unwrap();
    client.send_line(&request).await;
    assert_eq!(client.next_line().await.as_deref(), Some("0"));
    client.send_line(&request).await;
    assert_eq!(client.next_line().await.as_deref(), Some("nil"));
}

#[tokio::test]
async fn accepts_crlf_terminated_requests() {
    let (addr, h) = start(fast_config(), FlakyCounter::failing()).await;
    h.buffer.seed(&key("app1", "b1"), [7]);
    let mut client = Client::connect(addr).await;

    client
        .send_line(r#"{"AppName":"app1","IdQueue":"b1","Step":10}"#)
        .await;
    assert_eq!(client.next_line().await.as_deref(), Some("7"));

    client
        .writer
        .write_all(b"{\"AppName\":\"app1\",\"IdQueue\":\"b1\"}\r\n")
        .await
        .unwrap();
    assert_eq!(client.next_line().await.as_deref(), Some("nil"));
}

#[tokio::test]
async fn malformed_request_closes_connection() {
    let (addr, _h) = start(fast_config(), FlakyCounter::default()).await;
    let mut client = Client::connect(addr).await;

    client.send_line("not json").await;
    assert_eq!(client.next_line().await, None);
}

#[tokio::test]
async fn separator_in_name_closes_connection() {
    let (addr, h) = start(fast_config(), FlakyCounter::default()).await;
    let mut client = Client::connect(addr).await;

    client
        .send_line(r#"{"AppName":"app:1","IdQueue":"b1","Step":10}"#)
        .await;
    assert_eq!(client.next_line().await, None);
    assert!(h.engine.registry().snapshot().is_empty());
}

#[tokio::test]
async fn oversized_step_closes_connection() {
    let config = EngineConfig {
        max_step: 1_000,
        ..fast_config()
    };
    let (addr, _h) = start(config, FlakyCounter::default()).await;
    let mut client = Client::connect(addr).await;

    client
        .send_line(r#"{"AppName":"app1","IdQueue":"b1","Step":1001}"#)
        .await;
    assert_eq!(client.next_line().await, None);
}

#[tokio::test]
async fn overlong_line_closes_connection() {
    let config = EngineConfig {
        max_line_bytes: 64,
        ..fast_config()
    };
    let (addr, _h) = start(config, FlakyCounter::default()).await;
    let mut client = Client::connect(addr).await;

    client.send_line(&"x".repeat(256)).await;
    assert_eq!(client.next_line().await, None);
}

#[tokio::test]
async fn idle_connection_is_closed() {
    let config = EngineConfig {
        session_idle_timeout: Duration::from_millis(100),
        ..fast_config()
    };
    let (addr, _h) = start(config, FlakyCounter::default()).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.next_line().await, None);
}

#[tokio::test]
async fn idle_timeout_restarts_after_each_request() {
    let config = EngineConfig {
        session_idle_timeout: Duration::from_millis(300),
        ..fast_config()
    };
    let (addr, _h) = start(config, FlakyCounter::default()).await;
    let mut client = Client::connect(addr).await;

    for _ in 0..4 {
        sleep(Duration::from_millis(150)).await;
        client.request("app1", "b1", 0).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_clients_split_a_small_buffer() {
    let (addr, h) = start(fast_config(), FlakyCounter::failing()).await;
    h.buffer.seed(&key("app1", "b1"), [1, 2]);

    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;
    let (a, b) = tokio::join!(
        first.request("app1", "b1", 10),
        second.request("app1", "b1", 10)
    );

    let issued: HashSet<_> = [a, b].into_iter().filter_map(Allocation::id).collect();
    assert_eq!(issued, HashSet::from([1, 2]));
    assert_eq!(
        first.request("app1", "b1", 10).await,
        Allocation::Exhausted
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ids_are_unique_across_clients() {
    let (addr, _h) = start(fast_config(), FlakyCounter::default()).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            let mut ids = Vec::new();
            for _ in 0..100 {
                ids.push(client.request_issued("app1", "shared").await);
            }
            ids
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "{id} was issued twice");
        }
    }
    assert_eq!(seen.len(), 400);
}

#[tokio::test]
async fn binding_a_taken_address_fails() {
    let (addr, _h) = start(fast_config(), FlakyCounter::default()).await;
    assert!(Listener::bind(addr).await.is_err());
}
