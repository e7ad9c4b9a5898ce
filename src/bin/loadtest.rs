//! Load test tool. Enrols synthetic customers into a venue queue at a
//! configurable rate, then immediately cancels the entry so the next tick
//! can reuse the same (user, venue) slot — exercising `enrol`/`cancel`
//! churn the way the reference tool exercises repeated `ingest` calls.

use clap::Parser;
use rand::Rng;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "queue-coordinator-loadtest")]
#[command(about = "Load test tool for the queue coordinator")]
struct Args {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Enrolments per second
    #[arg(long, default_value_t = 20)]
    rate: u32,

    /// Duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Venue id to enrol into (must already exist on the server)
    #[arg(long, default_value = "v1")]
    venue_id: String,

    /// Number of distinct bearer tokens to cycle through, simulating that
    /// many concurrent customers
    #[arg(long, default_value_t = 10)]
    tokens: usize,

    /// Bearer token prefix; tokens sent are "{prefix}-{n}" for n in 0..tokens.
    /// The server must have these sessions pre-issued out of band.
    #[arg(long, default_value = "loadtest-token")]
    token_prefix: String,
}

struct Counters {
    sent: AtomicU64,
    enrolled: AtomicU64,
    rejected: AtomicU64,
    rate_limited: AtomicU64,
    network_error: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            enrolled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            network_error: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
        }
    }
}

#[derive(Deserialize)]
struct EnrolResponse {
    id: String,
}

fn main() {
    let args = Args::parse();

    println!("=== Queue Coordinator Load Test ===");
    println!("Target:   {}/queues", args.url);
    println!("Rate:     {} enrol/s", args.rate);
    println!("Duration: {}s", args.duration);
    println!("Venue:    {}", args.venue_id);
    println!("Tokens:   {}", args.tokens);
    println!();

    let health_url = format!("{}/health", args.url);
    match reqwest::blocking::get(&health_url) {
        Ok(r) if r.status().is_success() => println!("Server health: OK"),
        Ok(r) => {
            eprintln!("Server health check failed: {}", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cannot reach server: {e}");
            std::process::exit(1);
        }
    }

    let tokens: Vec<String> = (0..args.tokens).map(|n| format!("{}-{n}", args.token_prefix)).collect();

    let counters = Arc::new(Counters::new());
    let enrol_url = format!("{}/queues", args.url);

    let interval = Duration::from_micros(1_000_000 / args.rate as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    println!("\nSending...\n");
    let start = Instant::now();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let mut rng = rand::thread_rng();
    let mut tick = 0u64;

    while Instant::now() < deadline {
        let token = &tokens[(tick as usize) % tokens.len()];
        let body = serde_json::json!({
            "venue_id": args.venue_id,
            "service_ids": ["haircut"],
            "total_price": 20.0 + rng.gen_range(0.0..30.0),
            "applied_offer_ids": [],
        });

        let req_start = Instant::now();
        counters.sent.fetch_add(1, Ordering::Relaxed);

        match client.post(&enrol_url).bearer_auth(token).json(&body).send() {
            Ok(resp) => {
                let lat = req_start.elapsed().as_micros() as u64;
                counters.latency_sum_us.fetch_add(lat, Ordering::Relaxed);

                match resp.status().as_u16() {
                    200 => {
                        counters.enrolled.fetch_add(1, Ordering::Relaxed);
                        if let Ok(parsed) = resp.json::<EnrolResponse>() {
                            let cancel_url = format!("{}/queues/{}", args.url, parsed.id);
                            let _ = client.delete(&cancel_url).bearer_auth(token).send();
                        }
                    }
                    429 => {
                        counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                    }
                    other => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                        if tick < 5 {
                            eprintln!("Unexpected status: {other}");
                        }
                    }
                }
            }
            Err(_) => {
                counters.network_error.fetch_add(1, Ordering::Relaxed);
            }
        }

        tick += 1;

        if tick % 500 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = counters.sent.load(Ordering::Relaxed);
            println!(
                "  [{:.1}s] sent={} enrolled={} rejected={} rate_limited={} err={} ({:.0} req/s)",
                elapsed,
                sent,
                counters.enrolled.load(Ordering::Relaxed),
                counters.rejected.load(Ordering::Relaxed),
                counters.rate_limited.load(Ordering::Relaxed),
                counters.network_error.load(Ordering::Relaxed),
                sent as f64 / elapsed,
            );
        }

        let target = Duration::from_micros(tick * interval.as_micros() as u64);
        let actual = start.elapsed();
        if actual < target {
            std::thread::sleep(target - actual);
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    let enrolled = counters.enrolled.load(Ordering::Relaxed);
    let avg_lat = if sent > 0 { counters.latency_sum_us.load(Ordering::Relaxed) / sent } else { 0 };

    println!("\n=== Results ===");
    println!("Duration:     {:.2}s", elapsed.as_secs_f64());
    println!("Total sent:   {sent}");
    println!("Enrolled:     {} ({:.1}%)", enrolled, enrolled as f64 / sent.max(1) as f64 * 100.0);
    println!("Rejected:     {}", counters.rejected.load(Ordering::Relaxed));
    println!("Rate limited: {}", counters.rate_limited.load(Ordering::Relaxed));
    println!("Net errors:   {}", counters.network_error.load(Ordering::Relaxed));
    println!("Avg latency:  {avg_lat} us");
    println!("Throughput:   {:.1} req/s", sent as f64 / elapsed.as_secs_f64());
}
