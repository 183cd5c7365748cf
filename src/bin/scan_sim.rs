//! Scan simulator
//!
//! Sends card scans to a running gateway over the scan line protocol, for
//! exercising double tap handling without a reader.
//!
//! Usage:
//!   cargo run --bin scan-sim -- --identity 42 --device 3 --location 1
//!   cargo run --bin scan-sim -- --identity 42 --device 3 --location 1 --taps 3 --gap-ms 2000

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "scan-sim", about = "Send simulated card scans to the gateway")]
struct Args {
    /// Gateway scan listener address
    #[arg(long, default_value = "127.0.0.1:25900")]
    addr: String,

    #[arg(long)]
    identity: i64,

    #[arg(long)]
    device: i32,

    #[arg(long)]
    location: i32,

    /// Number of taps to send
    #[arg(long, default_value_t = 2)]
    taps: u32,

    /// Delay between taps
    #[arg(long, default_value_t = 1000)]
    gap_ms: u64,

    /// Report the scans as denied by the reader
    #[arg(long)]
    denied: bool,
}

fn scan_line(args: &Args) -> String {
    let outcome = if args.denied { "denied" } else { "granted" };
    let ts = Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.3f");
    format!("SCAN {} {} {} {} {}\n", args.identity, args.device, args.location, outcome, ts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    println!("Connected to {}", args.addr);

    for tap in 1..=args.taps {
        if tap > 1 {
            tokio::time::sleep(Duration::from_millis(args.gap_ms)).await;
        }
        let line = scan_line(&args);
        stream.write_all(line.as_bytes()).await.context("failed to send scan")?;
        print!("[{tap}/{}] {line}", args.taps);
    }

    stream.shutdown().await.ok();
    Ok(())
}
