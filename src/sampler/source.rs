//! Thread snapshots and the capability that produces them.
//!
//! The sampling loop never inspects threads directly. It asks a
//! [`StackSource`] for the stacks of every thread in a given state and works
//! only with the returned [`ThreadSnapshot`]s.

use crate::utils::error::SampleError;

/// Execution state of a sampled thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Executing or ready to execute
    Runnable,

    /// Blocked on I/O, a lock or a sleep
    Waiting,
}

/// One stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Package-qualified class (or module path)
    pub class: String,
    pub method: String,
    pub line: Option<u32>,
}

impl Frame {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            line: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// Call stack of one thread at one instant
///
/// Frames are ordered outermost first: `frames[0]` is the thread's entry
/// point and the last frame is the one currently executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub name: String,
    pub state: ThreadState,
    pub frames: Vec<Frame>,
}

impl ThreadSnapshot {
    pub fn new(name: impl Into<String>, state: ThreadState, frames: Vec<Frame>) -> Self {
        Self {
            name: name.into(),
            state,
            frames,
        }
    }
}

/// Something that can snapshot the live threads of the current process
pub trait StackSource {
    /// Snapshot every thread in `state` whose name is not accepted by `exclude`
    ///
    /// May be expensive, and may return threads with empty stacks.
    fn threads_in_state(
        &mut self,
        state: ThreadState,
        exclude: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<ThreadSnapshot>, SampleError>;
}

impl<S: StackSource + ?Sized> StackSource for Box<S> {
    fn threads_in_state(
        &mut self,
        state: ThreadState,
        exclude: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<ThreadSnapshot>, SampleError> {
        (**self).threads_in_state(state, exclude)
    }
}
