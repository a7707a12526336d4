use std::{
    fs::File,
    io::{BufWriter, Write},
    sync::Arc,
    time::Instant,
};

use anyhow::{Result, bail};
use ashmem_bin::init_logging_with_progress;
use ashmem_core::{
    AshmemConfig, BackingStore, MappingRequest, PinRequest, PressureMonitor, Protection,
    PurgeStatus, Reclaimer, Segment,
};
use ashmem_heap::HeapStore;
use ashmem_memfd::MemfdStore;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// CLI arguments for the `eval_reclaim` binary.
///
/// Drives a random pin/unpin workload over a set of segments and reports how
/// much memory the reclaimer recovered and how often clients lost data.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    /// Optional ashmem config file (JSON).
    #[clap(long = "config")]
    config: Option<String>,
    /// The backing store to use (`heap` or `memfd`).
    #[clap(long = "backend", default_value = "heap")]
    backend: String,
    /// Number of segments to open.
    #[clap(long = "segments", default_value = "8")]
    segments: usize,
    /// Size of each segment in pages.
    #[clap(long = "pages", default_value = "128")]
    pages: usize,
    /// Pin/unpin operations per round.
    #[clap(long = "ops", default_value = "10000")]
    ops: u64,
    /// Largest range touched by one operation, in pages.
    #[clap(long = "max-range", default_value = "16")]
    max_range: usize,
    /// Probability of a memory pressure event after each operation.
    #[clap(long = "pressure-rate", default_value = "0.01")]
    pressure_rate: f64,
    /// Additionally purge on real memory pressure (Linux PSI).
    #[clap(long = "psi")]
    psi: bool,
    /// Repeat the workload this many times.
    #[clap(long = "rounds", default_value = "1")]
    rounds: usize,
    /// Seed for the workload generator.
    #[clap(long = "seed")]
    seed: Option<u64>,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
}

#[derive(Debug, Default, Serialize, Clone)]
struct RoundResult {
    round: usize,
    seed: u64,
    duration_ms: u64,
    pins: u64,
    unpins: u64,
    failed_ops: u64,
    pins_purged: u64,
    pressure_events: u64,
    ranges_purged: usize,
    pages_purged: u64,
    release_failures: usize,
    peak_reclaimable_bytes: u64,
    final_reclaimable_bytes: u64,
}

impl RoundResult {
    fn purged_pin_rate(&self) -> f64 {
        if self.pins == 0 {
            0.0
        } else {
            self.pins_purged as f64 / self.pins as f64
        }
    }
}

#[derive(Debug, Serialize)]
struct EvaluationResults {
    date: String,
    args: CliArgs,
    config: AshmemConfig,
    rounds: Vec<RoundResult>,
}

impl EvaluationResults {
    fn save_to_file(&self, filename: &str) -> Result<()> {
        let file = File::create(filename)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Results saved to {}", filename);
        Ok(())
    }
}

fn open_segments<S: BackingStore>(
    reclaimer: &Arc<Reclaimer<S>>,
    args: &CliArgs,
    config: &AshmemConfig,
) -> Result<Vec<Segment<S>>> {
    let size = args.pages * reclaimer.page_size();
    let prot = Protection::READ | Protection::WRITE;
    (0..args.segments)
        .map(|i| -> Result<Segment<S>> {
            let segment = reclaimer.open_segment();
            segment.set_name(&format!("eval-{}", i))?;
            segment.set_size(size)?;
            segment.narrow_protection(prot, config.read_implies_exec)?;
            segment.ensure_backing_object(&MappingRequest::new(size, prot))?;
            Ok(segment)
        })
        .collect()
}

fn run_round<S: BackingStore + 'static>(
    reclaimer: &Arc<Reclaimer<S>>,
    args: &CliArgs,
    config: &AshmemConfig,
    round: usize,
    seed: u64,
    progress: &MultiProgress,
) -> Result<RoundResult> {
    let mut rng = StdRng::seed_from_u64(seed);
    let segments = open_segments(reclaimer, args, config)?;
    let page_size = reclaimer.page_size() as u64;
    let monitor = if args.psi {
        Some(PressureMonitor::from_config(Arc::clone(reclaimer), config)?)
    } else {
        None
    };

    let bar = progress.add(ProgressBar::new(args.ops));
    bar.set_style(ProgressStyle::with_template(
        "{msg} [{elapsed_precise}] {wide_bar} {pos}/{len}",
    )?);
    bar.set_message(format!("round {}", round));

    let mut result = RoundResult {
        round,
        seed,
        ..Default::default()
    };
    let start = Instant::now();
    for _ in 0..args.ops {
        let segment = &segments[rng.random_range(0..segments.len())];
        let len = rng.random_range(1..=args.max_range.min(args.pages));
        let first = rng.random_range(0..=args.pages - len);
        let request = PinRequest::new(first as u64 * page_size, len as u64 * page_size);

        if rng.random_bool(0.5) {
            result.unpins += 1;
            if let Err(e) = segment.unpin(request) {
                warn!("unpin {:?} failed: {}", request, e);
                result.failed_ops += 1;
            }
        } else {
            result.pins += 1;
            match segment.pin(request) {
                Ok(PurgeStatus::WasPurged) => result.pins_purged += 1,
                Ok(PurgeStatus::NotPurged) => {}
                Err(e) => {
                    warn!("pin {:?} failed: {}", request, e);
                    result.failed_ops += 1;
                }
            }
        }
        result.peak_reclaimable_bytes = result
            .peak_reclaimable_bytes
            .max(reclaimer.reclaimable_bytes());

        if rng.random_bool(args.pressure_rate) {
            let report = reclaimer.on_memory_pressure();
            result.pressure_events += 1;
            result.ranges_purged += report.ranges_purged;
            result.pages_purged += report.pages_purged;
            result.release_failures += report.failures.len();
        }
        bar.inc(1);
    }
    result.duration_ms = start.elapsed().as_millis() as u64;
    result.final_reclaimable_bytes = reclaimer.reclaimable_bytes();
    bar.finish_and_clear();

    if let Some(monitor) = monitor {
        match monitor.stop() {
            Ok(purges) => info!("PSI monitor purged {} times", purges),
            Err(_) => warn!("PSI monitor panicked"),
        }
    }
    drop(segments);
    debug_assert_eq!(reclaimer.reclaimable_ranges(), 0);
    Ok(result)
}

fn evaluate<S: BackingStore + 'static>(
    store: S,
    args: &CliArgs,
    config: &AshmemConfig,
    progress: &MultiProgress,
) -> Result<Vec<RoundResult>> {
    let reclaimer = Reclaimer::new(store);
    let base_seed = args.seed.unwrap_or_else(rand::random);
    let mut rounds = Vec::with_capacity(args.rounds);
    for round in 1..=args.rounds {
        let seed = base_seed.wrapping_add(round as u64);
        let result = run_round(&reclaimer, args, config, round, seed, progress)?;
        info!("Round {} completed:", round);
        info!(
            "  Pins: {} ({} purged, {:.2}%)",
            result.pins,
            result.pins_purged,
            result.purged_pin_rate() * 100.0
        );
        info!("  Unpins: {}", result.unpins);
        info!(
            "  Pressure events: {}, {} pages purged in {} ranges",
            result.pressure_events, result.pages_purged, result.ranges_purged
        );
        info!("  Peak reclaimable: {} bytes", result.peak_reclaimable_bytes);
        rounds.push(result);
    }
    Ok(rounds)
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;

    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);
    if args.segments == 0 || args.pages == 0 || args.max_range == 0 {
        bail!("--segments, --pages and --max-range must be greater than 0");
    }
    if !(0.0..=1.0).contains(&args.pressure_rate) {
        bail!("--pressure-rate must be within [0, 1]");
    }
    let config = match &args.config {
        Some(path) => AshmemConfig::from_jsonfile(path)?,
        None => AshmemConfig::default(),
    };

    let start_time = Instant::now();
    let rounds = match args.backend.as_str() {
        "heap" => evaluate(HeapStore::default(), &args, &config, &progress)?,
        "memfd" => evaluate(MemfdStore::default(), &args, &config, &progress)?,
        backend => bail!("Unknown backend: {}", backend),
    };

    let results = EvaluationResults {
        date: chrono::Local::now().to_rfc3339(),
        args: args.clone(),
        config,
        rounds,
    };
    if let Some(output_file) = &args.output {
        results.save_to_file(output_file)?;
    }

    let pins: u64 = results.rounds.iter().map(|r| r.pins).sum();
    let purged: u64 = results.rounds.iter().map(|r| r.pins_purged).sum();
    let pages: u64 = results.rounds.iter().map(|r| r.pages_purged).sum();
    info!("=== EVALUATION SUMMARY ===");
    info!("Rounds: {}", results.rounds.len());
    info!("Pins reporting purged data: {}/{}", purged, pins);
    info!("Pages purged: {}", pages);
    info!(
        "Total evaluation time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}
