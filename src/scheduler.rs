use crate::event::{EventSink, SessionEvent};
use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(pub(crate) u64);

/// Registers a session for ticks until `unregister` is called with the
/// returned handle. Ticks arrive on `sink` as [`SessionEvent::Tick`].
pub trait Scheduler {
    fn register(&mut self, sink: EventSink) -> TickHandle;
    fn unregister(&mut self, handle: TickHandle);
}

/// Ticks from a `tokio::time::interval` task per registration.
pub struct TokioTicker {
    period: Duration,
    next: u64,
    tasks: HashMap<TickHandle, JoinHandle<()>>,
}

impl TokioTicker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: 0,
            tasks: HashMap::new(),
        }
    }
}

impl Default for TokioTicker {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl Scheduler for TokioTicker {
    fn register(&mut self, sink: EventSink) -> TickHandle {
        self.next += 1;
        let handle = TickHandle(self.next);

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Ticks disabled, no runtime: {}", e);
                return handle;
            }
        };

        let period = self.period;
        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut last = Instant::now();
            loop {
                interval.tick().await;
                let now = Instant::now();
                let delta = now - last;
                last = now;
                if sink.send(SessionEvent::Tick { handle, delta }).is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(handle, task);
        handle
    }

    fn unregister(&mut self, handle: TickHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
    }
}

impl Drop for TokioTicker {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

/// Scheduler for hosts that run their own frame loop: every call to
/// [`ManualTicker::tick`] posts one tick to each registered session.
#[derive(Clone, Default)]
pub struct ManualTicker {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Default)]
struct ManualInner {
    next: u64,
    registered: HashMap<TickHandle, EventSink>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self, delta: Duration) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for (handle, sink) in &inner.registered {
            let _ = sink.send(SessionEvent::Tick { handle: *handle, delta });
        }
    }

    pub fn registered(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).registered.len()
    }
}

impl Scheduler for ManualTicker {
    fn register(&mut self, sink: EventSink) -> TickHandle {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next += 1;
        let handle = TickHandle(inner.next);
        inner.registered.insert(handle, sink);
        handle
    }

    fn unregister(&mut self, handle: TickHandle) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.registered.remove(&handle);
    }
}
