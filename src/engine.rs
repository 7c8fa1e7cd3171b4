use crate::journal_store::{JournalStore, JournalStoreOptions};
use crate::measure::LatencyMeasurer;
use crate::op_counter::OpCounter;
use bytemuck::Pod;
use spdlog::{error, info};
use std::hint::spin_loop;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::thread::sleep;
use std::time::{Duration, Instant};

struct Worker {
    name: String,
    idle: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Owns the worker threads of a topology and the journals they talk through.
///
/// Each worker repeatedly calls its step function until the engine stops.
/// A step returns whether it found any work, which drives the idle backoff
/// and [`WorkerEngine::await_idle`].
pub struct WorkerEngine {
    root_path: PathBuf,
    running: Arc<AtomicBool>,
    enable_latency_stats: bool,
    workers: Vec<Worker>,
    op_counter: Arc<OpCounter>,
    pin_cores: bool,
}

impl WorkerEngine {
    pub fn new() -> Self {
        Self::new_with_root_path("data")
    }

    pub fn new_with_root_path(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            running: Arc::new(AtomicBool::new(true)),
            enable_latency_stats: false,
            workers: vec![],
            op_counter: OpCounter::new(),
            pin_cores: false,
        }
    }

    pub fn set_pin_cores(&mut self, pin_cores: bool) {
        self.pin_cores = pin_cores;
    }

    pub fn enable_latency_stats(&mut self, enable: bool) {
        self.enable_latency_stats = enable;
    }

    pub fn run_worker(
        &mut self,
        name: impl Into<String>,
        mut step: impl FnMut() -> bool + Send + 'static,
    ) {
        let name = name.into();
        let worker_id = self.workers.len();
        let running = self.running.clone();
        let idle = Arc::new(AtomicBool::new(false));
        let worker_idle = idle.clone();
        let enable_latency_stats = self.enable_latency_stats;
        let pin_cores = self.pin_cores;
        let worker_name = name.clone();

        let handle = thread::spawn(move || {
            if pin_cores
                && let Some(core_ids) = core_affinity::get_core_ids()
                && let Some(core_id) = core_ids.get(worker_id % core_ids.len())
            {
                core_affinity::set_for_current(*core_id);
            }

            let mut measurer = enable_latency_stats.then(|| LatencyMeasurer::new(1000));
            let mut steps_without_work = 0u32;
            while running.load(Ordering::Relaxed) {
                let instant = Instant::now();
                let did_work = step();
                worker_idle.store(!did_work, Ordering::Release);
                if did_work {
                    steps_without_work = 0;
                    if let Some(measurer) = measurer.as_mut() {
                        measurer.measure(instant.elapsed());
                    }
                } else {
                    steps_without_work = steps_without_work.saturating_add(1);
                    if steps_without_work > 1000 {
                        thread::yield_now();
                    } else if steps_without_work > 10 {
                        spin_loop();
                    }
                }
            }

            if let Some(measurer) = measurer {
                info!("[Latency/{}]{}", worker_name, measurer.format_stats());
            }
        });

        self.workers.push(Worker { name, idle, handle });
    }

    pub fn new_journal_store<State: Pod + Send>(
        &self,
        options: JournalStoreOptions,
    ) -> Result<JournalStore<State>, std::io::Error> {
        JournalStore::new(&self.root_path, self.op_counter.clone(), options)
    }

    /// Blocks until no worker has made progress for a full polling period, or
    /// until `timeout` elapses. Returns `true` if the workers went idle.
    pub fn await_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut last_op_count = self.op_counter.total_op_count();
        loop {
            sleep(Duration::from_millis(1));
            let new_op_count = self.op_counter.total_op_count();
            let all_idle = self
                .workers
                .iter()
                .all(|w| w.idle.load(Ordering::Acquire) || w.handle.is_finished());
            if new_op_count == last_op_count && all_idle {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            last_op_count = new_op_count;
        }
    }

    pub fn is_any_worker_panicked(&self) -> bool {
        self.running.load(Ordering::Relaxed) && self.workers.iter().any(|w| w.handle.is_finished())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signals every worker to stop and joins them. A worker finishes the step
    /// it is in before it observes the signal.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            if worker.handle.join().is_err() {
                error!("[Engine] Worker '{}' panicked", worker.name);
            }
        }
    }
}

impl Default for WorkerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
