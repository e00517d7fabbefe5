use clap::Parser;
use parking_lot::Mutex;
use rand::Rng;
use snel_merge::engine::merge::{MergeScheduler, MergeSource, MergeTrigger};
use snel_merge::engine::MergeError;
use snel_merge::logging;
use snel_merge::shared::config::load_settings;
use std::collections::VecDeque;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser)]
#[command(name = "merge-sim")]
#[command(about = "Drive the merge scheduler against an in-memory index", long_about = None)]
struct Args {
    /// Number of flushes to simulate
    /// Can also be set via SNEL_MERGE_SIM_FLUSHES environment variable
    #[arg(short, long)]
    flushes: Option<usize>,

    /// Merges the policy finds after each flush
    /// Can also be set via SNEL_MERGE_SIM_MERGES_PER_FLUSH environment variable
    #[arg(short, long)]
    merges_per_flush: Option<usize>,

    /// Time one merge takes, in milliseconds
    /// Can also be set via SNEL_MERGE_SIM_MERGE_MS environment variable
    #[arg(short = 'd', long)]
    merge_ms: Option<u64>,

    /// Probability that a merge fails (0.0 - 1.0)
    /// Can also be set via SNEL_MERGE_SIM_FAILURE_RATE environment variable
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Probability that the index aborts a merge itself (0.0 - 1.0)
    /// Can also be set via SNEL_MERGE_SIM_ABORT_RATE environment variable
    #[arg(long)]
    abort_rate: Option<f64>,
}

struct SimConfig {
    flushes: usize,
    merges_per_flush: usize,
    merge_duration: Duration,
    failure_rate: f64,
    abort_rate: f64,
}

impl SimConfig {
    fn from_args(args: &Args) -> anyhow::Result<Self> {
        let failure_rate = resolve(args.failure_rate, "SNEL_MERGE_SIM_FAILURE_RATE", 0.0)?;
        let abort_rate = resolve(args.abort_rate, "SNEL_MERGE_SIM_ABORT_RATE", 0.0)?;
        for (name, rate) in [("failure_rate", failure_rate), ("abort_rate", abort_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                anyhow::bail!("{name} must be between 0.0 and 1.0, got {rate}");
            }
        }

        Ok(Self {
            flushes: resolve(args.flushes, "SNEL_MERGE_SIM_FLUSHES", 10)?,
            merges_per_flush: resolve(args.merges_per_flush, "SNEL_MERGE_SIM_MERGES_PER_FLUSH", 4)?,
            merge_duration: Duration::from_millis(resolve(args.merge_ms, "SNEL_MERGE_SIM_MERGE_MS", 20)?),
            failure_rate,
            abort_rate,
        })
    }
}

/// Command line first, then the environment, then the default.
fn resolve<T>(arg: Option<T>, var: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = arg {
        return Ok(value);
    }
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {var}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
struct PlannedMerge {
    id: usize,
    segments: [usize; 2],
}

#[derive(Default)]
struct Counters {
    planned: AtomicUsize,
    committed: AtomicUsize,
    failed: AtomicUsize,
    aborted: AtomicUsize,
    returned: AtomicUsize,
}

struct SimIndex {
    pending: Mutex<VecDeque<PlannedMerge>>,
    next_segment: AtomicUsize,
    merge_duration: Duration,
    failure_rate: f64,
    abort_rate: f64,
    counters: Counters,
}

impl SimIndex {
    fn new(cfg: &SimConfig) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            next_segment: AtomicUsize::new(0),
            merge_duration: cfg.merge_duration,
            failure_rate: cfg.failure_rate,
            abort_rate: cfg.abort_rate,
            counters: Counters::default(),
        }
    }

    /// Writes `merges` pairs of fresh segments and plans one merge per pair.
    fn flush(&self, merges: usize) {
        let mut pending = self.pending.lock();
        for _ in 0..merges {
            let first = self.next_segment.fetch_add(2, Ordering::SeqCst);
            let id = self.counters.planned.fetch_add(1, Ordering::SeqCst) + 1;
            pending.push_back(PlannedMerge {
                id,
                segments: [first, first + 1],
            });
        }
    }
}

impl MergeSource for SimIndex {
    type Request = PlannedMerge;

    fn next_merge(&self) -> Option<PlannedMerge> {
        self.pending.lock().pop_front()
    }

    fn has_pending_merges(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    fn perform_merge(&self, request: &PlannedMerge) -> Result<(), MergeError> {
        thread::sleep(self.merge_duration);

        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.abort_rate) {
            self.counters.aborted.fetch_add(1, Ordering::SeqCst);
            return Err(MergeError::Aborted(format!(
                "segments {:?} already merged",
                request.segments
            )));
        }
        if rng.gen_bool(self.failure_rate) {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            return Err(MergeError::Failed(format!(
                "simulated write error on merge {}",
                request.id
            )));
        }
        self.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn merge_finish(&self, _request: PlannedMerge) {
        self.counters.returned.fetch_add(1, Ordering::SeqCst);
    }

    fn describe_state(&self) -> String {
        format!(
            "pending={} committed={}",
            self.pending.lock().len(),
            self.counters.committed.load(Ordering::SeqCst)
        )
    }

    fn storage_context(&self) -> String {
        "memory://merge-sim".to_string()
    }

    fn describe_request(&self, request: &PlannedMerge) -> String {
        format!("merge#{} segments={:?}", request.id, request.segments)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let sim = SimConfig::from_args(&args)?;
    let settings = load_settings()?;
    logging::init(&settings.logging)?;

    let scheduler = MergeScheduler::new(&settings.merge)?;
    info!(target: "snel_merge::sim", %scheduler, flushes = sim.flushes, "Starting merge simulation");

    let index = Arc::new(SimIndex::new(&sim));
    let started = Instant::now();
    let mut launch_errors = 0usize;

    for _ in 0..sim.flushes {
        index.flush(sim.merges_per_flush);
        if let Err(err) = scheduler.on_merges_may_be_needed(&index, MergeTrigger::SegmentFlush, true) {
            err.log_error();
            launch_errors += 1;
        }
    }
    if let Err(err) = scheduler.on_merges_may_be_needed(&index, MergeTrigger::FullFlush, false) {
        err.log_error();
        launch_errors += 1;
    }

    let drained = scheduler.drain_and_close();
    let counters = &index.counters;

    println!("Merge simulation finished in {:?}", started.elapsed());
    println!("  {}", scheduler);
    println!("  planned:       {}", counters.planned.load(Ordering::SeqCst));
    println!("  committed:     {}", counters.committed.load(Ordering::SeqCst));
    println!("  aborted:       {}", counters.aborted.load(Ordering::SeqCst));
    println!("  failed:        {}", counters.failed.load(Ordering::SeqCst));
    println!("  returned:      {}", counters.returned.load(Ordering::SeqCst));
    println!("  left pending:  {}", index.pending.lock().len());
    println!("  launch errors: {}", launch_errors);
    println!(
        "  failures handled by policy: {}",
        scheduler.failure_policy().handled_count()
    );

    if let Err(err) = drained {
        println!("  first failure: {}", err);
    }
    Ok(())
}
