//! Test doubles for the engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};

use crate::BoxFuture;
use crate::planner::ChunkDescriptor;
use crate::source::{MemorySource, SourceAccessor, SourceError};
use crate::transport::{ChunkTransport, SessionMetadata, TransportError};

/// Scripted outcome of one send.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    Fail,
    Hang,
    Panic,
}

/// Transport whose per-chunk outcomes are scripted; unscripted sends succeed.
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<u32, VecDeque<Step>>>,
    always_fail: Mutex<HashSet<u32>>,
    delay: Duration,
    gate: Option<Semaphore>,
    entered: watch::Sender<usize>,
    calls: Mutex<Vec<u32>>,
    received: Mutex<HashMap<u32, Vec<u8>>>,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        let (entered, _) = watch::channel(0);
        Self {
            scripts: Mutex::new(HashMap::new()),
            always_fail: Mutex::new(HashSet::new()),
            delay: Duration::ZERO,
            gate: None,
            entered,
            calls: Mutex::new(Vec::new()),
            received: Mutex::new(HashMap::new()),
            current: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    /// Every send sleeps `delay` before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every send blocks until [`release`](Self::release) grants a permit.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Queues outcomes for the next sends of chunk `index`.
    pub fn script(&self, index: u32, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .extend(steps);
    }

    pub fn fail_always(&self, index: u32) {
        self.always_fail.lock().unwrap().insert(index);
    }

    pub async fn wait_for_entered(&self, n: usize) {
        let mut rx = self.entered.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, index: u32) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|i| **i == index)
            .count()
    }

    pub fn received(&self) -> HashMap<u32, Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn next_step(&self, index: u32) -> Option<Step> {
        if self.always_fail.lock().unwrap().contains(&index) {
            return Some(Step::Fail);
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&index)
            .and_then(VecDeque::pop_front)
    }
}

struct ConcurrencyGuard<'a>(&'a AtomicUsize);

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ChunkTransport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        data: Vec<u8>,
        chunk: &'a ChunkDescriptor,
        _session: &'a SessionMetadata,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(chunk.index);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            let _guard = ConcurrencyGuard(&self.current);
            self.entered.send_modify(|count| *count += 1);

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.next_step(chunk.index) {
                Some(Step::Fail) => Err(TransportError::Network("scripted failure".into())),
                Some(Step::Hang) => std::future::pending::<Result<(), TransportError>>().await,
                Some(Step::Panic) => panic!("transport panicked on chunk {}", chunk.index),
                None => {
                    self.received.lock().unwrap().insert(chunk.index, data);
                    Ok(())
                }
            }
        })
    }
}

/// Memory source whose reads at one offset fail a fixed number of times.
pub(crate) struct FlakySource {
    inner: MemorySource,
    fail_offset: u64,
    failures_left: AtomicU32,
}

impl FlakySource {
    pub fn new(data: Vec<u8>, fail_offset: u64, failures: u32) -> Self {
        Self {
            inner: MemorySource::new(data),
            fail_offset,
            failures_left: AtomicU32::new(failures),
        }
    }
}

impl SourceAccessor for FlakySource {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read_range(&self, offset: u64, length: u64) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
        if offset == self.fail_offset
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Box::pin(async {
                Err(SourceError::Io(io::Error::other("simulated read failure")))
            });
        }
        self.inner.read_range(offset, length)
    }
}
