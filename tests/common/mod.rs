//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use reactive_dispatch::config::{ListenerConfig, ServerConfig};
use reactive_dispatch::{create_server, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Loopback config on an ephemeral port with a short request timeout.
pub fn local_config() -> ServerConfig {
    let mut config = ServerConfig {
        listener: ListenerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections: 256,
        },
        ..ServerConfig::default()
    };
    config.timeouts.request_secs = 5;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

pub async fn start_server() -> Server {
    create_server(local_config()).await.unwrap()
}

/// Non-pooled client, so every request gets a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

pub fn url(server: &Server, path: &str) -> String {
    format!("http://{}{}", server.local_addr(), path)
}

/// Open a raw connection and write the first part of a request.
pub async fn raw_connect(addr: SocketAddr, head: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(head.as_bytes()).await.unwrap();
    stream
}

/// Read everything until the server closes the connection.
pub async fn read_to_close(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
