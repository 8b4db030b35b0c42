//! End-to-end chat benchmark for Huddle.
//!
//! Every client joins the same room and sends chat lines as fast as the
//! server accepts them. Each line fans out to the whole room, so the
//! measured rate is delivered envelopes, not sent lines.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/chat";
const ROOM: &str = "bench";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Huddle End-to-End Chat Benchmark                     ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_chat_benchmark(num_clients).await;
}

async fn run_chat_benchmark(num_clients: usize) {
    println!("📊 Chat Benchmark: {} clients in room '{}'", num_clients, ROOM);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let envelope_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let count = Arc::clone(&envelope_count);
        let barrier = Arc::clone(&barrier);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to join
    barrier.wait().await;
    println!("✓ All {} clients joined", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    envelope_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = envelope_count.load(Ordering::SeqCst);

    let per_sec = total as f64 / elapsed.as_secs_f64();
    let per_sec_per_client = per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Envelopes Delivered:  {:>10}                           ║",
        total
    );
    println!(
        "║  Throughput:           {:>10.0} env/s                    ║",
        per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} env/s                    ║",
        per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    envelope_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let url = format!("{SERVER_URL}?name=client-{client_id}&room={ROOM}&format=msgpack");
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Connected frame
    receiver.next().await;

    let joined = codec::encode(&Frame::joined())?;
    sender.send(Message::Binary(joined.to_vec())).await?;

    // Greeting
    receiver.next().await;

    barrier.wait().await;

    let text = codec::encode(&Frame::text("x".repeat(64)))?;
    let text_msg = Message::Binary(text.to_vec());

    let recv_count = envelope_count.clone();
    let recv_task = tokio::spawn(async move {
        let mut recv_buf = BytesMut::with_capacity(65536);

        while let Some(result) = receiver.next().await {
            if let Ok(Message::Binary(data)) = result {
                recv_buf.extend_from_slice(&data);
                while let Ok(Some(frame)) = codec::decode_from(&mut recv_buf) {
                    if matches!(frame, Frame::Envelope { .. }) {
                        recv_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    loop {
        if sender.send(text_msg.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
