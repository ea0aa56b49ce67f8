//! Instrumentation-based stack source.
//!
//! Rust offers no portable way to read another thread's call stack, so
//! threads publish their own. Instrumented code calls [`enter`] at the top of
//! a function and keeps the returned [`FrameGuard`] alive for the duration of
//! the call; dropping the guard pops the frame on any exit path. Code that is
//! about to block wraps the wait in [`blocking`] so the thread is not counted
//! as runnable while it sleeps.
//!
//! Every thread's published stack lives in an `Arc<Mutex<_>>` owned by the
//! thread's TLS. The process-wide registry only keeps weak references, so a
//! thread that exits disappears from the registry on the next enumeration.

use super::source::{Frame, StackSource, ThreadSnapshot, ThreadState};
use crate::utils::error::SampleError;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread;

/// Frame as published by the owning thread
#[derive(Debug, Clone, Copy)]
struct PublishedFrame {
    class: &'static str,
    method: &'static str,
    line: Option<u32>,
}

impl PublishedFrame {
    fn to_frame(self) -> Frame {
        Frame {
            class: self.class.to_string(),
            method: self.method.to_string(),
            line: self.line,
        }
    }
}

#[derive(Debug)]
struct PublishedThread {
    name: String,
    state: ThreadState,
    frames: Vec<PublishedFrame>,
}

type SharedThread = Arc<Mutex<PublishedThread>>;

fn registry() -> &'static Mutex<Vec<Weak<Mutex<PublishedThread>>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Weak<Mutex<PublishedThread>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// A panicking instrumented thread must not take the sampler down with it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

thread_local! {
    static CURRENT: SharedThread = {
        let current = thread::current();
        let name = current
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", current.id()));

        let shared = Arc::new(Mutex::new(PublishedThread {
            name,
            state: ThreadState::Runnable,
            frames: Vec::new(),
        }));
        lock(registry()).push(Arc::downgrade(&shared));
        shared
    };
}

/// Pops the frame pushed by [`enter`] when dropped
///
/// Not `Send`: the frame belongs to the thread that entered it.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        // try_with: TLS may already be gone during thread teardown
        let _ = CURRENT.try_with(|current| {
            lock(current).frames.truncate(self.depth);
        });
    }
}

/// Marks the thread as waiting until dropped
#[must_use = "the thread is runnable again as soon as the guard is dropped"]
pub struct BlockingGuard {
    previous: ThreadState,
    _not_send: PhantomData<*const ()>,
}

impl Drop for BlockingGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = CURRENT.try_with(|current| {
            lock(current).state = previous;
        });
    }
}

/// Publish a frame on the calling thread's stack
///
/// **Public** - the instrumentation entry point
///
/// # Example
/// ```ignore
/// fn handle(req: Request) {
///     let _frame = registry::enter("app::server::Handler", "handle");
///     // ...
/// }
/// ```
pub fn enter(class: &'static str, method: &'static str) -> FrameGuard {
    push_frame(PublishedFrame {
        class,
        method,
        line: None,
    })
}

/// Publish a frame that carries a source line
pub fn enter_at(class: &'static str, method: &'static str, line: u32) -> FrameGuard {
    push_frame(PublishedFrame {
        class,
        method,
        line: Some(line),
    })
}

fn push_frame(frame: PublishedFrame) -> FrameGuard {
    let depth = CURRENT.with(|current| {
        let mut current = lock(current);
        let depth = current.frames.len();
        current.frames.push(frame);
        depth
    });

    FrameGuard {
        depth,
        _not_send: PhantomData,
    }
}

/// Mark the calling thread as waiting (not runnable) until the guard drops
pub fn blocking() -> BlockingGuard {
    let previous = CURRENT.with(|current| {
        let mut current = lock(current);
        std::mem::replace(&mut current.state, ThreadState::Waiting)
    });

    BlockingGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Number of live threads that have published at least once
pub fn registered_threads() -> usize {
    lock(registry())
        .iter()
        .filter(|weak| weak.strong_count() > 0)
        .count()
}

/// [`StackSource`] backed by the instrumentation registry
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistrySource;

impl RegistrySource {
    pub fn new() -> Self {
        Self
    }
}

impl StackSource for RegistrySource {
    fn threads_in_state(
        &mut self,
        state: ThreadState,
        exclude: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<ThreadSnapshot>, SampleError> {
        let mut registry = lock(registry());
        registry.retain(|weak| weak.strong_count() > 0);

        let mut snapshots = Vec::new();
        snapshots.try_reserve(registry.len())?;

        for weak in registry.iter() {
            let Some(shared) = weak.upgrade() else {
                continue;
            };
            let thread = lock(&shared);
            if thread.state != state || exclude(&thread.name) {
                continue;
            }

            let mut frames = Vec::new();
            frames.try_reserve_exact(thread.frames.len())?;
            frames.extend(thread.frames.iter().map(|f| f.to_frame()));

            snapshots.push(ThreadSnapshot {
                name: thread.name.clone(),
                state: thread.state,
                frames,
            });
        }

        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn snapshot_of(name: &str, state: ThreadState) -> Option<ThreadSnapshot> {
        RegistrySource
            .threads_in_state(state, &|_| false)
            .unwrap()
            .into_iter()
            .find(|t| t.name == name)
    }

    #[test]
    fn test_frames_published_and_popped() {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("registry-test-frames".to_string())
            .spawn(move || {
                let _outer = enter("app::Server", "run");
                {
                    let _inner = enter_at("app::Handler", "handle", 12);
                    ready_tx.send(()).unwrap();
                    done_rx.recv().unwrap();
                }
                ready_tx.send(()).unwrap();
                done_rx.recv().unwrap();
            })
            .unwrap();

        ready_rx.recv().unwrap();
        assert!(registered_threads() >= 1);
        let snapshot = snapshot_of("registry-test-frames", ThreadState::Runnable).unwrap();
        assert_eq!(
            snapshot.frames,
            vec![
                Frame::new("app::Server", "run"),
                Frame::new("app::Handler", "handle").with_line(12),
            ]
        );

        done_tx.send(()).unwrap();
        ready_rx.recv().unwrap();
        let snapshot = snapshot_of("registry-test-frames", ThreadState::Runnable).unwrap();
        assert_eq!(snapshot.frames.len(), 1);

        done_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(snapshot_of("registry-test-frames", ThreadState::Runnable).is_none());
    }

    #[test]
    fn test_blocking_threads_are_not_runnable() {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("registry-test-blocking".to_string())
            .spawn(move || {
                let _frame = enter("app::Queue", "pop");
                let _wait = blocking();
                ready_tx.send(()).unwrap();
                done_rx.recv().unwrap();
            })
            .unwrap();

        ready_rx.recv().unwrap();
        assert!(snapshot_of("registry-test-blocking", ThreadState::Runnable).is_none());
        assert!(snapshot_of("registry-test-blocking", ThreadState::Waiting).is_some());

        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_exclusion_by_name() {
        let _frame = enter("app::Main", "main");
        let me = thread::current().name().unwrap_or_default().to_string();
        let threads = RegistrySource
            .threads_in_state(ThreadState::Runnable, &|name| name == me)
            .unwrap();
        assert!(threads.iter().all(|t| t.name != me));
    }
}
