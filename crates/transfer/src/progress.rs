use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Default averaging window.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default cap on retained samples.
const DEFAULT_MAX_SAMPLES: usize = 100;

/// Transfer rate over a sliding window of completed-chunk samples.
pub struct ThroughputMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    max_samples: usize,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl ThroughputMeter {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                samples: VecDeque::new(),
                window,
                max_samples: max_samples.max(2),
            }),
        }
    }

    /// Records `bytes` delivered now.
    pub fn record(&self, bytes: u64) {
        let mut m = self.inner.lock().unwrap();
        let now = Instant::now();
        m.samples.push_back((now, bytes));

        let window = m.window;
        while m
            .samples
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > window)
        {
            m.samples.pop_front();
        }
        while m.samples.len() > m.max_samples {
            m.samples.pop_front();
        }
    }

    /// Average bytes/second across the window; 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let m = self.inner.lock().unwrap();
        let (Some((first, _)), Some((last, _))) = (m.samples.front(), m.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.duration_since(*first);
        if m.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        // The first sample marks the window start; its bytes predate it.
        let bytes: u64 = m.samples.iter().skip(1).map(|(_, b)| b).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to deliver `remaining_bytes`, if a rate is known.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}
