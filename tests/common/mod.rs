//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use burncheck::stress::{MetricSampler, ResourceKind, SampleError};

/// In-memory log sink for a test-scoped subscriber.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Run `f` with a DEBUG-level subscriber installed on this thread and return
/// its result together with the captured log lines.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, buffer.lines())
}

/// Index of the first line containing `needle`.
pub fn position(lines: &[String], needle: &str) -> Option<usize> {
    lines.iter().position(|l| l.contains(needle))
}

/// Sampler that reports a constant after sleeping a short window.
pub struct SteadySampler {
    pub window: Duration,
    pub percent: f32,
}

impl Default for SteadySampler {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(50),
            percent: 50.0,
        }
    }
}

impl MetricSampler for SteadySampler {
    fn sample(&mut self, kind: ResourceKind) -> Result<f32, SampleError> {
        match kind {
            ResourceKind::Cpu => {
                thread::sleep(self.window);
                Ok(self.percent)
            }
            ResourceKind::Memory => Ok(self.percent),
            ResourceKind::Gpu => Err(SampleError::UnsupportedKind(kind)),
        }
    }

    fn window(&self) -> Duration {
        self.window
    }
}
