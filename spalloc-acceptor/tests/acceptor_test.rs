use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use spalloc_acceptor::Acceptor;
use spalloc_config::CompatConfig;
use spalloc_facade::memory::{MachineSeed, MemoryFacade};
use spalloc_facade::AllocatorFacade;

fn facade() -> Arc<dyn AllocatorFacade> {
    Arc::new(MemoryFacade::new(vec![MachineSeed {
        name: "m1".to_string(),
        tags: HashSet::from(["default".to_string()]),
        width: 2,
        height: 2,
    }]))
}

async fn read_line(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 4096];
    let mut acc = Vec::new();
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0);
        acc.extend_from_slice(&buf[..n]);
        if acc.ends_with(b"\n") {
            break;
        }
    }
    String::from_utf8(acc).unwrap().trim_end().to_string()
}

#[tokio::test]
async fn accepts_a_connection_and_answers_version() {
    let config = CompatConfig {
        port: 29_876,
        host: Some("127.0.0.1".parse().unwrap()),
        ..CompatConfig::default()
    };
    let acceptor = Acceptor::bind(&config, facade()).await.unwrap();

    let mut stream = TcpStream::connect("127.0.0.1:29876").await.unwrap();
    stream
        .write_all(br#"{"command":"version","args":[],"kwargs":{}}"#)
        .await
        .unwrap();
    stream.write_all(b"\n").await.unwrap();
    let response = read_line(&mut stream).await;
    assert!(response.starts_with(r#"{"return":""#));

    drop(stream);
    acceptor.shutdown().await;
}

#[tokio::test]
async fn shutdown_completes_within_grace_period() {
    let config = CompatConfig {
        port: 29_877,
        host: Some("127.0.0.1".parse().unwrap()),
        shutdown_timeout: Duration::from_secs(3),
        ..CompatConfig::default()
    };
    let acceptor = Acceptor::bind(&config, facade()).await.unwrap();
    let mut stream = TcpStream::connect("127.0.0.1:29877").await.unwrap();
    stream
        .write_all(br#"{"command":"notify_job","args":[],"kwargs":{}}"#)
        .await
        .unwrap();
    stream.write_all(b"\n").await.unwrap();
    let _ = read_line(&mut stream).await;

    let started = tokio::time::Instant::now();
    acceptor.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(3));
}
