use crate::engine::errors::MergeError;
use crate::engine::merge::{MergeSource, unit};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRequest {
    pub id: u64,
    pub segments: Vec<String>,
    pub estimated_bytes: u64,
}

#[derive(Debug, Clone)]
pub enum MergeBehavior {
    Succeed,
    Fail(String),
    Abort(String),
    Panic(String),
}

#[derive(Debug, Default)]
struct Ledger {
    handed_out: Vec<u64>,
    performed: Vec<u64>,
    committed: Vec<u64>,
    finished: Vec<u64>,
    on_unit_thread: Vec<bool>,
}

/// In-memory engine that records every request crossing the scheduler boundary.
///
/// Merges can be held open with `hold`/`release` to pin units mid-merge.
pub struct SimulatedEngine {
    queue: Mutex<VecDeque<SimRequest>>,
    behaviors: HashMap<u64, MergeBehavior>,
    merge_duration: Duration,
    ledger: Mutex<Ledger>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    held: Mutex<bool>,
    released: Condvar,
    started: Mutex<usize>,
    started_cv: Condvar,
}

impl SimulatedEngine {
    pub fn new(
        requests: Vec<SimRequest>,
        behaviors: HashMap<u64, MergeBehavior>,
        merge_duration: Duration,
        held: bool,
    ) -> Self {
        Self {
            queue: Mutex::new(requests.into()),
            behaviors,
            merge_duration,
            ledger: Mutex::new(Ledger::default()),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            held: Mutex::new(held),
            released: Condvar::new(),
            started: Mutex::new(0),
            started_cv: Condvar::new(),
        }
    }

    pub fn push(&self, request: SimRequest) {
        self.queue.lock().push_back(request);
    }

    pub fn hold(&self) {
        *self.held.lock() = true;
    }

    pub fn release(&self) {
        let mut held = self.held.lock();
        *held = false;
        self.released.notify_all();
    }

    /// Waits until at least `count` merges entered `perform_merge`.
    pub fn wait_until_started(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut started = self.started.lock();
        while *started < count {
            if self.started_cv.wait_until(&mut started, deadline).timed_out() {
                return *started >= count;
            }
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn handed_out(&self) -> Vec<u64> {
        self.ledger.lock().handed_out.clone()
    }

    pub fn performed(&self) -> Vec<u64> {
        self.ledger.lock().performed.clone()
    }

    pub fn committed(&self) -> Vec<u64> {
        self.ledger.lock().committed.clone()
    }

    pub fn finished(&self) -> Vec<u64> {
        self.ledger.lock().finished.clone()
    }

    pub fn ran_on_unit_threads(&self) -> bool {
        let ledger = self.ledger.lock();
        !ledger.on_unit_thread.is_empty() && ledger.on_unit_thread.iter().all(|flag| *flag)
    }
}

impl MergeSource for SimulatedEngine {
    type Request = SimRequest;

    fn next_merge(&self) -> Option<SimRequest> {
        let request = self.queue.lock().pop_front()?;
        self.ledger.lock().handed_out.push(request.id);
        Some(request)
    }

    fn has_pending_merges(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    fn perform_merge(&self, request: &SimRequest) -> Result<(), MergeError> {
        {
            let mut ledger = self.ledger.lock();
            ledger.performed.push(request.id);
            ledger.on_unit_thread.push(unit::on_merge_unit_thread());
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        {
            let mut started = self.started.lock();
            *started += 1;
            self.started_cv.notify_all();
        }

        {
            let mut held = self.held.lock();
            while *held {
                self.released.wait(&mut held);
            }
        }
        if !self.merge_duration.is_zero() {
            thread::sleep(self.merge_duration);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match self.behaviors.get(&request.id) {
            None | Some(MergeBehavior::Succeed) => {
                self.ledger.lock().committed.push(request.id);
                Ok(())
            }
            Some(MergeBehavior::Fail(msg)) => Err(MergeError::Failed(msg.clone())),
            Some(MergeBehavior::Abort(msg)) => Err(MergeError::Aborted(msg.clone())),
            Some(MergeBehavior::Panic(msg)) => panic!("{}", msg),
        }
    }

    fn merge_finish(&self, request: SimRequest) {
        self.ledger.lock().finished.push(request.id);
    }

    fn describe_state(&self) -> String {
        format!("pending={} running={}", self.pending(), self.running())
    }

    fn storage_context(&self) -> String {
        "sim://index".to_string()
    }

    fn describe_request(&self, request: &SimRequest) -> String {
        format!("merge#{} {:?}", request.id, request.segments)
    }
}
