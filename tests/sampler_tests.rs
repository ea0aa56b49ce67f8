use cpu_trace_profiler::reporter::Reporter;
use cpu_trace_profiler::sampler::store::trace_depth;
use cpu_trace_profiler::sampler::{
    blocking, enter, Frame, Profiler, RegistrySource, SamplingLoop, StackSource, ThreadSnapshot,
    ThreadState, TraceFilter, TraceStore,
};
use cpu_trace_profiler::utils::config::ProfilerConfig;
use cpu_trace_profiler::utils::error::{ReportError, SampleError};
use pretty_assertions::assert_eq;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Returns the next scripted set of threads on every call, repeating the last one
struct ScriptedSource {
    ticks: VecDeque<Vec<ThreadSnapshot>>,
    last: Vec<ThreadSnapshot>,
}

impl ScriptedSource {
    fn new(ticks: Vec<Vec<ThreadSnapshot>>) -> Self {
        Self {
            ticks: ticks.into(),
            last: Vec::new(),
        }
    }

    fn repeating(threads: Vec<ThreadSnapshot>) -> Self {
        Self {
            ticks: VecDeque::new(),
            last: threads,
        }
    }
}

impl StackSource for ScriptedSource {
    fn threads_in_state(
        &mut self,
        state: ThreadState,
        exclude: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<ThreadSnapshot>, SampleError> {
        if let Some(next) = self.ticks.pop_front() {
            self.last = next;
        }
        Ok(self
            .last
            .iter()
            .filter(|t| t.state == state && !exclude(&t.name))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct Recorder {
    gauges: Vec<(String, u64)>,
    batches: Vec<HashMap<String, u64>>,
}

impl Reporter for Recorder {
    fn record_gauge_value(&mut self, key: &str, value: u64) -> Result<(), ReportError> {
        self.gauges.push((key.to_string(), value));
        Ok(())
    }

    fn record_gauge_values(&mut self, gauges: &HashMap<String, u64>) -> Result<(), ReportError> {
        self.batches.push(gauges.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Totals(Arc<Mutex<HashMap<String, u64>>>);

impl Reporter for Totals {
    fn record_gauge_values(&mut self, gauges: &HashMap<String, u64>) -> Result<(), ReportError> {
        let mut totals = self.0.lock().unwrap();
        for (key, value) in gauges {
            *totals.entry(key.clone()).or_insert(0) += value;
        }
        Ok(())
    }
}

fn runnable(name: &str, frames: &[(&str, &str)]) -> ThreadSnapshot {
    ThreadSnapshot::new(
        name,
        ThreadState::Runnable,
        frames.iter().map(|(c, m)| Frame::new(*c, *m)).collect(),
    )
}

fn config(ticks_per_flush: u32) -> ProfilerConfig {
    ProfilerConfig {
        period: Duration::from_millis(10),
        reporting_period: Duration::from_millis(10) * ticks_per_flush,
        ..ProfilerConfig::default()
    }
}

#[test]
fn test_store_aggregates_and_drains() {
    let mut store = TraceStore::new();
    store.increment("cpu.trace.a", 1).unwrap();
    store.increment("cpu.trace.a", 1).unwrap();
    store.increment("cpu.trace.a", 1).unwrap();
    store.increment("cpu.trace.b", 2).unwrap();

    assert_eq!(store.get("cpu.trace.a"), Some(3));

    let mut expected = HashMap::new();
    expected.insert("cpu.trace.a".to_string(), 3);
    expected.insert("cpu.trace.b".to_string(), 2);
    assert_eq!(store.drain(), expected);

    assert_eq!(store.size(), 0);
    assert_eq!(store.size_in_chars(), 0);
    assert!(store.drain().is_empty());
}

#[test]
#[should_panic(expected = "does not start with")]
fn test_store_rejects_foreign_key() {
    let mut store = TraceStore::new();
    store.increment("mem.trace.a", 1).unwrap();
}

#[test]
fn test_foreign_key_leaves_store_untouched() {
    let mut store = TraceStore::new();
    store.increment("cpu.trace.a.b", 1).unwrap();
    store.increment("cpu.trace.a.b.c.d", 2).unwrap();
    let chars = store.size_in_chars();

    let result = panic::catch_unwind(AssertUnwindSafe(|| store.increment("mem.trace.a.b.c.d.e.f", 1)));
    assert!(result.is_err());

    assert_eq!(store.size(), 2);
    assert_eq!(store.size_in_chars(), chars);
    assert_eq!(store.get("cpu.trace.a.b"), Some(1));
    assert_eq!(store.get("mem.trace.a.b.c.d.e.f"), None);
    let bounds = store.bounds().unwrap();
    assert_eq!((bounds.min, bounds.max), (2, 4));
}

#[test]
fn test_depth_bounds_survive_drain() {
    let mut store = TraceStore::new();
    store.increment("cpu.trace.a.b", 1).unwrap();
    store.increment("cpu.trace.a.b.c.d.e", 1).unwrap();
    store.increment("cpu.trace.a.b.c", 1).unwrap();

    let bounds = store.bounds().unwrap();
    assert_eq!((bounds.min, bounds.max), (2, 5));

    store.drain();
    let bounds = store.bounds().unwrap();
    assert_eq!((bounds.min, bounds.max), (2, 5));
    assert_eq!(trace_depth("cpu.trace.a.b.c"), 3);
}

#[test]
fn test_filter_blacklist_wins() {
    let filter = TraceFilter::new(&["com.app".to_string()], &["com.app.internal".to_string()]);

    assert!(filter.include_stack_trace("cpu.trace.com.app.Main.main"));
    assert!(!filter.include_stack_trace("cpu.trace.com.app.internal.Cache.get"));
    assert!(!filter.include_stack_trace("cpu.trace.org.other.Main.main"));
}

#[test]
fn test_filter_excludes_profiler_itself() {
    let filter = TraceFilter::default();
    assert!(!filter.include_stack_trace("cpu.trace.cpu_trace_profiler.reporter.Flush.run"));
    assert!(filter.include_stack_trace("cpu.trace.app.Main.main"));
}

#[test]
fn test_flush_every_tenth_tick() {
    let source = ScriptedSource::repeating(vec![runnable("main", &[("app.Main", "main")])]);
    let mut sampler = SamplingLoop::new(source, Recorder::default(), &config(10));
    assert_eq!(sampler.reporting_frequency(), 10);

    for _ in 0..9 {
        sampler.tick();
    }
    assert!(sampler.reporter().batches.is_empty());
    assert_eq!(sampler.profile_count(), 9);

    sampler.tick();
    assert_eq!(sampler.reporter().batches.len(), 1);
    assert_eq!(sampler.reporter().batches[0]["cpu.trace.app.Main.main"], 10);
    assert_eq!(sampler.profile_count(), 0);
}

#[test]
fn test_profiler_threads_are_not_sampled() {
    let source = ScriptedSource::repeating(vec![
        runnable("cpu-trace-profiler-sampler", &[("app.Sampler", "run")]),
        runnable("main", &[("app.Main", "main")]),
    ]);
    let mut sampler = SamplingLoop::new(source, Recorder::default(), &config(1));

    sampler.tick();

    let batch = &sampler.reporter().batches[0];
    assert_eq!(batch.len(), 1);
    assert!(batch.contains_key("cpu.trace.app.Main.main"));
}

#[test]
fn test_exhaustion_forces_flush() {
    // every key is 20 characters, the budget holds three
    let five: Vec<ThreadSnapshot> = (0..5)
        .map(|i| {
            ThreadSnapshot::new(
                format!("worker-{}", i),
                ThreadState::Runnable,
                vec![Frame::new("app.T", format!("run{}", i))],
            )
        })
        .collect();
    let one = vec![runnable("worker-0", &[("app.T", "run0")])];

    let config = ProfilerConfig {
        max_trace_chars: Some(60),
        ..config(10)
    };
    let mut sampler = SamplingLoop::new(ScriptedSource::new(vec![five, one]), Recorder::default(), &config);

    sampler.tick();
    {
        let reporter = sampler.reporter();
        assert_eq!(
            reporter.gauges,
            vec![
                ("cpu.OOM.size".to_string(), 3),
                ("cpu.OOM.sizeInChars".to_string(), 60),
                ("cpu.stats.size".to_string(), 3),
                ("cpu.stats.sizeInChars".to_string(), 60),
            ]
        );
        assert_eq!(reporter.batches.len(), 1);
        assert_eq!(reporter.batches[0].len(), 3);
    }
    assert_eq!(sampler.traces().size(), 0);
    assert_eq!(sampler.profile_count(), 1);

    sampler.tick();
    assert_eq!(sampler.reporter().gauges.len(), 4);
    assert_eq!(sampler.traces().get("cpu.trace.app.T.run0"), Some(1));
}

/// Rejects every report, counting the attempts
#[derive(Default)]
struct Refusing {
    attempts: usize,
}

impl Reporter for Refusing {
    fn record_gauge_values(&mut self, _gauges: &HashMap<String, u64>) -> Result<(), ReportError> {
        self.attempts += 1;
        Err(ReportError::Rejected {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

#[test]
fn test_failed_report_keeps_sampling() {
    let source = ScriptedSource::repeating(vec![runnable("main", &[("app.Main", "main")])]);
    let mut sampler = SamplingLoop::new(source, Refusing::default(), &config(2));

    sampler.tick();
    sampler.tick();

    // two stats gauges and the trace batch were all attempted
    assert_eq!(sampler.reporter().attempts, 3);
    assert_eq!(sampler.traces().size(), 0);
    assert_eq!(sampler.profile_count(), 0);

    sampler.tick();
    assert_eq!(sampler.traces().get("cpu.trace.app.Main.main"), Some(1));
}

struct Unavailable;

impl StackSource for Unavailable {
    fn threads_in_state(
        &mut self,
        _state: ThreadState,
        _exclude: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<ThreadSnapshot>, SampleError> {
        Err(SampleError::Unavailable("thread list not readable".to_string()))
    }
}

#[test]
fn test_unavailable_source_skips_tick() {
    let mut sampler = SamplingLoop::new(Unavailable, Recorder::default(), &config(10));

    sampler.tick();

    assert!(sampler.reporter().gauges.is_empty());
    assert!(sampler.reporter().batches.is_empty());
    assert_eq!(sampler.profile_count(), 1);
    assert_eq!(sampler.traces().size(), 0);
}

#[test]
fn test_shutdown_reports_bounds() {
    let source = ScriptedSource::repeating(vec![
        runnable("a", &[("app.Main", "main")]),
        runnable("b", &[("app.Main", "main"), ("app.Worker", "run")]),
    ]);
    let mut sampler = SamplingLoop::new(source, Recorder::default(), &config(100));

    sampler.tick();
    sampler.shutdown();

    let reporter = sampler.reporter();
    assert_eq!(reporter.batches.len(), 1);
    assert_eq!(
        reporter.gauges,
        vec![
            ("cpu.stats.size".to_string(), 2),
            ("cpu.stats.sizeInChars".to_string(), 23 + 38),
            ("cpu.trace.3".to_string(), 3),
            ("cpu.trace.6".to_string(), 6),
            ("cpu.stats.size".to_string(), 0),
            ("cpu.stats.sizeInChars".to_string(), 0),
        ]
    );
}

#[test]
fn test_profiler_samples_registered_threads() {
    let stop = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let busy = {
        let stop = Arc::clone(&stop);
        let ready = ready_tx.clone();
        thread::Builder::new()
            .name("it-busy".to_string())
            .spawn(move || {
                let _frame = enter("it.Busy", "spin");
                ready.send(()).unwrap();
                let mut x = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    x = std::hint::black_box(x.wrapping_add(1));
                }
            })
            .unwrap()
    };

    let sleeper = thread::Builder::new()
        .name("it-sleeper".to_string())
        .spawn(move || {
            let _waiting = blocking();
            let _frame = enter("it.Sleeper", "wait");
            ready_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();

    ready_rx.recv().unwrap();
    ready_rx.recv().unwrap();

    let reporter = Totals::default();
    let config = ProfilerConfig {
        period: Duration::from_millis(2),
        reporting_period: Duration::from_millis(20),
        ..ProfilerConfig::default()
    };
    let profiler = Profiler::start(RegistrySource::new(), reporter.clone(), config).unwrap();
    thread::sleep(Duration::from_millis(150));
    profiler.shutdown().unwrap();

    stop.store(true, Ordering::Relaxed);
    release_tx.send(()).unwrap();
    busy.join().unwrap();
    sleeper.join().unwrap();

    let totals = reporter.0.lock().unwrap();
    assert!(totals.get("cpu.trace.it.Busy.spin").copied().unwrap_or(0) > 0);
    assert!(!totals.keys().any(|k| k.contains("Sleeper")));
}
