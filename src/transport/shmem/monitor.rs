//! Heartbeat & monitor (spec.md §4.7 "Heartbeat & monitor").
//!
//! Every active device in a session writes a heartbeat onto the session's
//! control queue at a fixed cadence; an external monitor reads the queue
//! with a short timeout and, on silence past `T` ms (default 5000), runs
//! cleanup. The queue is kept in-process (an `Arc<Mutex<VecDeque<_>>>`)
//! rather than a second mmap'd ring buffer: every scenario this runtime
//! drives has the monitor and its devices in the same process, and a
//! cross-process queue would reuse exactly the `Segment` machinery already
//! exercised by the main/management segments.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub device_id: String,
    pub at: Instant,
}

/// The session's control queue (`fmq_<id>_cq`).
#[derive(Clone)]
pub struct ControlQueue {
    inner: Arc<Mutex<VecDeque<Heartbeat>>>,
}

impl ControlQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn send_heartbeat(&self, device_id: impl Into<String>) {
        self.inner.lock().push_back(Heartbeat {
            device_id: device_id.into(),
            at: Instant::now(),
        });
    }

    fn drain(&self) -> Vec<Heartbeat> {
        self.inner.lock().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for ControlQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the control queue and performs session cleanup on heartbeat
/// silence. Also exposes an interactive mode, single-character commands
/// over any `Read + Write` (`p`rint queues, `c`lose memory, `h`elp,
/// `q`uit), so it is testable without a real TTY.
pub struct Monitor {
    queue: ControlQueue,
    last_seen: Mutex<HashMap<String, Instant>>,
    cleanup_log: Mutex<Vec<String>>,
    segment_paths: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl Monitor {
    pub fn new(queue: ControlQueue) -> Self {
        Self {
            queue,
            last_seen: Mutex::new(HashMap::new()),
            cleanup_log: Mutex::new(Vec::new()),
            segment_paths: Mutex::new(HashMap::new()),
        }
    }

    /// Drains any pending heartbeats, recording their arrival time.
    pub fn poll_once(&self) {
        for hb in self.queue.drain() {
            self.last_seen.lock().insert(hb.device_id, hb.at);
        }
    }

    /// Associates `device_id` with the segment files its session owns, so a
    /// later timeout cleanup actually removes them from disk rather than
    /// only forgetting the device in-process.
    pub fn register_segment_paths(&self, device_id: impl Into<String>, paths: Vec<PathBuf>) {
        self.segment_paths.lock().insert(device_id.into(), paths);
    }

    /// Every known device whose last heartbeat is older than `timeout` is
    /// cleaned up and returned: dropped from the monitor's bookkeeping, its
    /// registered segment files removed from disk (grounded on
    /// `manager/memory_map.rs`'s `FileManager::delete_file`, which calls
    /// `std::fs::remove_file` on a tracked path), and its id appended to the
    /// cleanup log. A segment that is already gone, or was never registered,
    /// is not an error — cleanup is best-effort idempotent teardown.
    pub fn check_timeouts(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut stale = Vec::new();
        self.last_seen.lock().retain(|device_id, last| {
            if now.duration_since(*last) > timeout {
                stale.push(device_id.clone());
                false
            } else {
                true
            }
        });
        for id in &stale {
            tracing::warn!(device = %id, "heartbeat timeout, running session cleanup");
            if let Some(paths) = self.segment_paths.lock().remove(id) {
                for path in paths {
                    match std::fs::remove_file(&path) {
                        Ok(()) => tracing::info!(device = %id, path = %path.display(), "removed stale segment file"),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => tracing::warn!(device = %id, path = %path.display(), error = %e, "failed to remove segment file"),
                    }
                }
            }
            self.cleanup_log.lock().push(id.clone());
        }
        stale
    }

    pub fn cleaned_up_devices(&self) -> Vec<String> {
        self.cleanup_log.lock().clone()
    }

    pub fn known_device_count(&self) -> usize {
        self.last_seen.lock().len()
    }

    /// Polls and checks timeouts on a fixed cadence until `stop` is set.
    pub fn run_daemon(&self, timeout: Duration, poll_interval: Duration, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            self.poll_once();
            self.check_timeouts(timeout);
            std::thread::sleep(poll_interval);
        }
    }

    /// Line-oriented interactive loop. Reads one command character per
    /// line; unrecognized input prints a hint and continues.
    pub fn run_interactive<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> io::Result<()> {
        loop {
            write!(output, "> ")?;
            output.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Ok(());
            }
            match line.trim().chars().next() {
                Some('p') => {
                    writeln!(output, "pending heartbeats: {}", self.queue.len())?;
                    writeln!(output, "known devices: {}", self.known_device_count())?;
                }
                Some('c') => {
                    self.last_seen.lock().clear();
                    writeln!(output, "memory closed")?;
                }
                Some('h') => {
                    writeln!(output, "commands: p(rint) c(lose) h(elp) q(uit)")?;
                }
                Some('q') => {
                    writeln!(output, "bye")?;
                    return Ok(());
                }
                _ => {
                    writeln!(output, "unrecognized command, try h")?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_device_is_cleaned_up_after_timeout() {
        let queue = ControlQueue::new();
        queue.send_heartbeat("dev-1");
        let monitor = Monitor::new(queue);
        monitor.poll_once();
        std::thread::sleep(Duration::from_millis(20));
        let stale = monitor.check_timeouts(Duration::from_millis(5));
        assert_eq!(stale, vec!["dev-1".to_string()]);
        assert_eq!(monitor.known_device_count(), 0);
    }

    #[test]
    fn fresh_heartbeat_is_not_cleaned_up() {
        let queue = ControlQueue::new();
        queue.send_heartbeat("dev-2");
        let monitor = Monitor::new(queue);
        monitor.poll_once();
        let stale = monitor.check_timeouts(Duration::from_secs(5));
        assert!(stale.is_empty());
        assert_eq!(monitor.known_device_count(), 1);
    }

    #[test]
    fn interactive_print_and_quit() {
        let queue = ControlQueue::new();
        queue.send_heartbeat("dev-3");
        let monitor = Monitor::new(queue);
        monitor.poll_once();
        let input = io::Cursor::new(b"p\nq\n".to_vec());
        let mut output = Vec::new();
        monitor.run_interactive(input, &mut output).unwrap();
        let rendered = String::from_utf8(output).unwrap();
        assert!(rendered.contains("known devices: 1"));
        assert!(rendered.contains("bye"));
    }

    #[test]
    fn interactive_close_clears_known_devices() {
        let queue = ControlQueue::new();
        queue.send_heartbeat("dev-4");
        let monitor = Monitor::new(queue);
        monitor.poll_once();
        let input = io::Cursor::new(b"c\nq\n".to_vec());
        let mut output = Vec::new();
        monitor.run_interactive(input, &mut output).unwrap();
        assert_eq!(monitor.known_device_count(), 0);
    }
}
