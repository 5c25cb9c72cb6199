use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use ulid::Ulid;

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(host: &str, port: u16, token: &str, hotel: &str) -> Self {
        let stream = TcpStream::connect((host, port)).await.expect("connect failed");
        let (read, writer) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(read).lines(),
            writer,
        };
        let hello = client
            .request(json!({ "token": token, "hotel": hotel, "staff": "bench" }))
            .await;
        assert!(hello.get("ok").is_some(), "handshake failed: {hello}");
        client
    }

    async fn request(&mut self, frame: Value) -> Value {
        let mut line = frame.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .unwrap()
                .expect("connection closed");
            let reply: Value = serde_json::from_str(&line).unwrap();
            // skip change frames from watches
            if reply.get("change").is_none() {
                return reply;
            }
        }
    }

    async fn expect_ok(&mut self, frame: Value) -> Value {
        let reply = self.request(frame).await;
        assert!(reply.get("ok").is_some(), "request failed: {reply}");
        reply["ok"].clone()
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn today() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    now / 86_400_000
}

fn booking_frame(room: &str) -> Value {
    json!({
        "op": "register_booking",
        "booking": {
            "room": room,
            "check_in": today(),
            "check_out": today() + 1,
            "paid_at": 1,
            "party": [
                { "role": "primary", "first_name": "Ada", "last_name": "Lovelace" }
            ]
        }
    })
}

/// One full cycle on a room: book, check in, check out, clean, ready.
async fn occupancy_cycle(client: &mut Client, room: &str) {
    client.expect_ok(booking_frame(room)).await;
    client.expect_ok(json!({ "op": "check_in", "room": room })).await;
    client.expect_ok(json!({ "op": "check_out", "room": room })).await;
    client
        .expect_ok(json!({ "op": "set_room_status", "number": room, "status": "cleaning" }))
        .await;
    client
        .expect_ok(json!({ "op": "set_room_status", "number": room, "status": "ready_for_guest" }))
        .await;
}

async fn phase1_sequential(host: &str, port: u16, token: &str) {
    let hotel = format!("bench_{}", Ulid::new());
    let mut client = Client::connect(host, port, token, &hotel).await;
    client.expect_ok(json!({ "op": "create_room", "number": "101" })).await;

    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for _ in 0..n {
        let t = Instant::now();
        occupancy_cycle(&mut client, "101").await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} cycles in {:.2}s = {ops:.0} cycles/sec", elapsed.as_secs_f64());
    print_latency("cycle latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16, token: &str) {
    let n_tasks = 10;
    let n_per_task = 100;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let token = token.to_string();
        handles.push(tokio::spawn(async move {
            // Each task gets its own hotel, so cycles never contend
            let hotel = format!("bench_{}", Ulid::new());
            let mut client = Client::connect(&host, port, &token, &hotel).await;
            client.expect_ok(json!({ "op": "create_room", "number": "101" })).await;
            for _ in 0..n_per_task {
                occupancy_cycle(&mut client, "101").await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} cycles = {total} total in {:.2}s = {ops:.0} cycles/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_room(host: &str, port: u16, token: &str) {
    // Everyone hammers the same room in the same hotel: the row lock
    // serializes them, and exactly one check-in wins per cycle.
    let hotel = format!("bench_{}", Ulid::new());
    let mut setup = Client::connect(host, port, token, &hotel).await;
    setup.expect_ok(json!({ "op": "create_room", "number": "999" })).await;
    setup.expect_ok(booking_frame("999")).await;

    let n_tasks = 10;
    let mut handles = Vec::new();
    let start = Instant::now();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let token = token.to_string();
        let hotel = hotel.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port, &token, &hotel).await;
            let reply = client.request(json!({ "op": "check_in", "room": "999" })).await;
            reply.get("ok").is_some()
        }));
    }

    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent check-in may win");
    println!(
        "  {n_tasks} contending check-ins, 1 winner, in {:.0}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

async fn phase4_read_under_load(host: &str, port: u16, token: &str) {
    let hotel = format!("bench_{}", Ulid::new());
    let mut setup = Client::connect(host, port, token, &hotel).await;
    for i in 0..20 {
        setup
            .expect_ok(json!({ "op": "create_room", "number": format!("r{i}") }))
            .await;
    }

    // Writer: continuous cycles on its own room
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let writer_stop = stop.clone();
    let writer_host = host.to_string();
    let writer_token = token.to_string();
    let writer_hotel = hotel.clone();
    let writer = tokio::spawn(async move {
        let mut client =
            Client::connect(&writer_host, port, &writer_token, &writer_hotel).await;
        while !writer_stop.load(std::sync::atomic::Ordering::Relaxed) {
            occupancy_cycle(&mut client, "r0").await;
        }
    });

    // Readers: room listings and per-room snapshots
    let n_readers = 5;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let token = token.to_string();
        let hotel = hotel.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port, &token, &hotel).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                if i % 2 == 0 {
                    client.expect_ok(json!({ "op": "rooms" })).await;
                } else {
                    client
                        .expect_ok(json!({ "op": "room", "number": format!("r{}", i % 20) }))
                        .await;
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = writer.await;

    print_latency("read latency", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16, token: &str) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let token = token.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let hotel = format!("bench_{}", Ulid::new());
            let mut client = Client::connect(&host, port, &token, &hotel).await;
            client.expect_ok(json!({ "op": "create_room", "number": "101" })).await;
            for _ in 0..ops_per_conn {
                client.expect_ok(json!({ "op": "rooms" })).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("FRONTDESK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("FRONTDESK_PORT")
        .unwrap_or_else(|_| "4180".into())
        .parse()
        .expect("invalid FRONTDESK_PORT");
    let token = std::env::var("FRONTDESK_TOKEN").unwrap_or_else(|_| "frontdesk".into());

    println!("=== frontdesk stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential cycle throughput");
    phase1_sequential(&host, port, &token).await;

    println!("\n[phase 2] concurrent cycles across hotels");
    phase2_concurrent(&host, port, &token).await;

    println!("\n[phase 3] contended room");
    phase3_contended_room(&host, port, &token).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&host, port, &token).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port, &token).await;

    println!("\n=== benchmark complete ===");
}
