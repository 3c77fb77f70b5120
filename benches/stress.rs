use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use appointly::model::{BookingRequest, Service, WindowInput};
use appointly::notify::NotifyHub;
use appointly::{observability, Engine, EngineError, EngineSettings, SchedulerConfig};

const DAYS: [&str; 7] = [
    "MONDAY",
    "TUESDAY",
    "WEDNESDAY",
    "THURSDAY",
    "FRIDAY",
    "SATURDAY",
    "SUNDAY",
];
/// 08:00–20:00 in 30-minute slots
const SLOTS_PER_DAY: u32 = 24;

fn bench_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::var("APPOINTLY_BENCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("appointly_bench"));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}.wal"));
    let _ = std::fs::remove_file(&path);
    Arc::new(Engine::new(path, EngineSettings::default(), Arc::new(NotifyHub::new())).unwrap())
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Provider open 08:00–20:00 every day with one 30-minute service.
async fn open_provider(engine: &Engine) -> (Ulid, Ulid) {
    let provider_id = Ulid::new();
    engine.register_provider(provider_id, None).await.unwrap();
    let service_id = Ulid::new();
    engine
        .register_service(Service {
            id: service_id,
            provider_id,
            title: "Consultation".into(),
            duration_minutes: 30,
            price_cents: 5_000,
        })
        .await
        .unwrap();
    for day in DAYS {
        engine
            .create_availability(provider_id, WindowInput::weekly(day, "08:00", "20:00").with_slot_minutes(30))
            .await
            .unwrap();
    }
    (provider_id, service_id)
}

/// Start of the `n`th slot counted from 2025-09-22 08:00Z.
fn nth_slot(n: u32) -> String {
    let base = NaiveDate::from_ymd_opt(2025, 9, 22).unwrap();
    let date = base + Days::new(u64::from(n / SLOTS_PER_DAY));
    let minutes = 8 * 60 + (n % SLOTS_PER_DAY) * 30;
    format!("{date}T{:02}:{:02}:00Z", minutes / 60, minutes % 60)
}

fn request(provider_id: Ulid, service_id: Ulid, start: String) -> BookingRequest {
    BookingRequest {
        patient_id: Ulid::new(),
        provider_id,
        service_id,
        start_time: start,
        notes: None,
    }
}

async fn phase1_sequential() {
    let engine = bench_engine("sequential");
    let (pid, sid) = open_provider(&engine).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        engine.create_booking(request(pid, sid, nth_slot(i))).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = f64::from(n) / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

async fn phase2_concurrent_providers() {
    let engine = bench_engine("concurrent");
    let n_tasks = 10;
    let n_per_task = 200;

    let mut setups = Vec::new();
    for _ in 0..n_tasks {
        setups.push(open_provider(&engine).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for (pid, sid) in setups {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine.create_booking(request(pid, sid, nth_slot(j))).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = f64::from(total) / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} providers x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Many patients racing for the same day: every slot must be won exactly once.
async fn phase3_contention() {
    let engine = bench_engine("contention");
    let (pid, sid) = open_provider(&engine).await;

    let n_tasks = 50;
    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(SLOTS_PER_DAY as usize);
            for slot in 0..SLOTS_PER_DAY {
                let t = Instant::now();
                match engine.create_booking(request(pid, sid, nth_slot(slot))).await {
                    Ok(_) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::SlotConflict(_)) => conflicts.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let wins = wins.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {SLOTS_PER_DAY} slots: {wins} won, {conflicts} conflicts in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(wins, SLOTS_PER_DAY as usize, "each slot must be booked exactly once");
    print_latency("contended booking", &mut all);
}

async fn phase4_reads_under_load() {
    let engine = bench_engine("reads");
    let (pid, sid) = open_provider(&engine).await;
    for i in 0..200 {
        engine.create_booking(request(pid, sid, nth_slot(i * 2))).await.unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let (wpid, wsid) = open_provider(&engine).await;
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.create_booking(request(wpid, wsid, nth_slot(i))).await;
                i += 1;
            }
        }));
    }

    let from = NaiveDate::from_ymd_opt(2025, 9, 22).unwrap();
    let mut readers = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(500);
            for _ in 0..500 {
                let t = Instant::now();
                engine.upcoming_slots(pid, from, 14).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("upcoming_slots (14 days)", &mut all);
}

#[tokio::main]
async fn main() {
    observability::init_tracing();
    observability::init(SchedulerConfig::from_env().metrics_port);
    println!("=== appointly stress benchmark ===\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent providers");
    phase2_concurrent_providers().await;

    println!("\n[phase 3] contention on one provider");
    phase3_contention().await;

    println!("\n[phase 4] read latency under write load");
    phase4_reads_under_load().await;

    println!("\ndone.");
}
