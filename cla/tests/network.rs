use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_bpv7::builder::Builder;
use drover_bpv7::{CrcType, EndpointId};
use drover_cla::manager::Manager;
use drover_cla::{tcp, Convergence, ConvergenceSender, ConvergenceStatus};

async fn run_client(addr: SocketAddr, client_no: usize, msgs: usize) {
    let endpoint: EndpointId = format!("dtn://client-{client_no}/").parse().unwrap();
    let session = tcp::dial(&addr.to_string(), endpoint.clone(), false);

    let (result, _) = Convergence::start(session.as_ref()).await;
    result.expect("client start failed");

    let received = Arc::new(AtomicU32::new(0));
    let appeared = Arc::new(AtomicU32::new(0));
    {
        let received = received.clone();
        let appeared = appeared.clone();
        let events = session.channel();
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                match event.status {
                    ConvergenceStatus::ReceivedBundle { .. } => {
                        received.fetch_add(1, Ordering::SeqCst);
                    }
                    ConvergenceStatus::PeerAppeared(_) => {
                        appeared.fetch_add(1, Ordering::SeqCst);
                    }
                    ConvergenceStatus::PeerDisappeared(_) => {}
                }
            }
        });
    }

    while !session.is_established() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for _ in 0..msgs {
        let bundle = Builder::new()
            .crc(CrcType::Crc32)
            .source(&endpoint)
            .destination("dtn://server/")
            .creation_timestamp_now()
            .lifetime("30m")
            .hop_count_block(64)
            .payload_block(b"hello world!".to_vec())
            .build()
            .expect("building bundle failed");
        ConvergenceSender::send(session.as_ref(), &bundle)
            .await
            .expect("client send failed");
    }

    // Wait for the server's reply bundle
    for _ in 0..400 {
        if received.load(Ordering::SeqCst) >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    Convergence::close(session.as_ref()).await;

    assert_eq!(
        received.load(Ordering::SeqCst),
        1,
        "client {client_no} received a wrong number of bundles"
    );
    assert_eq!(
        appeared.load(Ordering::SeqCst),
        1,
        "client {client_no} saw a wrong number of appeared peers"
    );
}

async fn run_network(clients: usize, msgs: usize) {
    let listener = tcp::Listener::new("127.0.0.1:0", "dtn://server/".parse().unwrap());
    let manager = Manager::new();
    let server_events = manager.channel();
    manager.register(listener.clone());

    let mut addr = None;
    for _ in 0..200 {
        if let Some(bound) = listener.local_addr() {
            addr = Some(bound);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let addr = addr.expect("listener did not bind");

    let received = Arc::new(AtomicU32::new(0));
    let appeared = Arc::new(AtomicU32::new(0));
    {
        let received = received.clone();
        let appeared = appeared.clone();
        tokio::spawn(async move {
            while let Ok(event) = server_events.recv_async().await {
                match event.status {
                    ConvergenceStatus::ReceivedBundle { .. } => {
                        received.fetch_add(1, Ordering::SeqCst);
                    }
                    ConvergenceStatus::PeerAppeared(peer) => {
                        appeared.fetch_add(1, Ordering::SeqCst);

                        // Greet every new peer with a reply bundle
                        let sender = event.sender.clone();
                        tokio::spawn(async move {
                            let bundle = Builder::new()
                                .crc(CrcType::Crc32)
                                .source("dtn://server/")
                                .destination(&peer)
                                .creation_timestamp_now()
                                .lifetime("30m")
                                .hop_count_block(64)
                                .payload_block(b"hello back!".to_vec())
                                .build()
                                .expect("building reply failed");
                            sender.send(&bundle).await.expect("sending reply failed");
                        });
                    }
                    ConvergenceStatus::PeerDisappeared(_) => {}
                }
            }
        });
    }

    let mut handles = Vec::new();
    for client_no in 0..clients {
        handles.push(tokio::spawn(run_client(addr, client_no, msgs)));
    }
    for handle in handles {
        handle.await.expect("client task failed");
    }

    // Let in-flight events drain before counting
    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.close().await;

    assert_eq!(
        received.load(Ordering::SeqCst),
        (clients * msgs) as u32,
        "listener received a wrong number of bundles"
    );
    assert_eq!(
        appeared.load(Ordering::SeqCst),
        clients as u32,
        "listener saw a wrong number of appeared peers"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_loopback() {
    run_network(1, 1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_client_many_bundles() {
    run_network(1, 25).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stress() {
    run_network(10, 25).await;
}
