use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Result;
use log::{debug, warn};

use super::cdev::EdgeKind;

/// How long [`EdgeWatcher::stop`] waits before abandoning the thread.
pub const STOP_GRACE: Duration = Duration::from_millis(200);

/// Longest single blocking wait; bounds how late the thread sees a stop.
pub const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Blocking source of line edges.
pub trait EdgeEvents: Send + Sync + 'static {
    /// Waits up to `timeout` for an edge; `Ok(false)` when none arrived.
    fn wait_edge(&self, timeout: Duration) -> Result<bool>;

    /// Reads the edge that [`wait_edge`](Self::wait_edge) announced.
    fn read_edge(&self) -> Result<EdgeKind>;
}

impl<T: EdgeEvents + ?Sized> EdgeEvents for Arc<T> {
    fn wait_edge(&self, timeout: Duration) -> Result<bool> {
        (**self).wait_edge(timeout)
    }

    fn read_edge(&self) -> Result<EdgeKind> {
        (**self).read_edge()
    }
}

/// OS thread waiting on a line's edge events, handing each edge to a
/// closure.
#[derive(Debug)]
pub struct EdgeWatcher {
    stop: Arc<AtomicBool>,
    exited: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeWatcher {
    pub fn spawn<E, F>(events: E, mut on_edge: F) -> std::io::Result<Self>
    where
        E: EdgeEvents,
        F: FnMut(EdgeKind) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        // Dropped when the thread ends, panics included.
        let (exit_tx, exited) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("gpio-edge".into())
            .spawn(move || {
                let _exit = exit_tx;
                while !thread_stop.load(Ordering::Acquire) {
                    match events.wait_edge(WAIT_SLICE) {
                        Ok(false) => {}
                        Ok(true) => match events.read_edge() {
                            Ok(edge) if !thread_stop.load(Ordering::Acquire) => on_edge(edge),
                            Ok(_) => {}
                            Err(e) => {
                                warn!("{e:#}");
                                break;
                            }
                        },
                        Err(e) => {
                            warn!("{e:#}");
                            break;
                        }
                    }
                }
                debug!("GPIO edge watcher exited");
            })?;

        Ok(Self {
            stop,
            exited,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Asks the thread to stop and joins it, giving up after `grace`. Later
    /// calls are no-ops.
    pub fn stop(&mut self, grace: Duration) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);

        match self.exited.recv_timeout(grace) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("GPIO edge watcher did not stop within {grace:?}, abandoned");
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("GPIO edge watcher panicked");
                }
            }
        }
    }
}

impl Drop for EdgeWatcher {
    fn drop(&mut self) {
        self.stop(STOP_GRACE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEdges;
    use std::time::Instant;

    #[test]
    fn delivers_edges_in_order() {
        let (edges, line) = FakeEdges::new();
        let (seen_tx, seen_rx) = mpsc::channel();
        let mut watcher = EdgeWatcher::spawn(line, move |edge| {
            let _ = seen_tx.send(edge);
        })
        .unwrap();

        edges.send(EdgeKind::Rising);
        edges.send(EdgeKind::Falling);

        let timeout = Duration::from_secs(2);
        assert_eq!(seen_rx.recv_timeout(timeout).unwrap(), EdgeKind::Rising);
        assert_eq!(seen_rx.recv_timeout(timeout).unwrap(), EdgeKind::Falling);

        watcher.stop(STOP_GRACE);
        assert!(!watcher.is_running());
    }

    #[test]
    fn stop_ends_idle_thread_within_one_wait() {
        let (_edges, line) = FakeEdges::new();
        let mut watcher = EdgeWatcher::spawn(line, |_| {}).unwrap();
        assert!(watcher.is_running());

        let started = Instant::now();
        watcher.stop(STOP_GRACE);

        assert!(!watcher.is_running());
        assert!(started.elapsed() < STOP_GRACE);
    }

    #[test]
    fn stop_twice_is_harmless() {
        let (_edges, line) = FakeEdges::new();
        let mut watcher = EdgeWatcher::spawn(line, |_| {}).unwrap();
        watcher.stop(STOP_GRACE);
        watcher.stop(STOP_GRACE);
        drop(watcher);
    }

    #[test]
    fn exits_when_line_fails() {
        let (edges, line) = FakeEdges::new();
        let watcher = EdgeWatcher::spawn(line, |_| {}).unwrap();
        drop(edges);

        let deadline = Instant::now() + Duration::from_secs(2);
        while watcher.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!watcher.is_running());
    }

    #[test]
    fn stuck_thread_is_abandoned_after_grace() {
        let (edges, line) = FakeEdges::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut watcher = EdgeWatcher::spawn(line, move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
        })
        .unwrap();

        edges.send(EdgeKind::Rising);
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let started = Instant::now();
        watcher.stop(Duration::from_millis(20));
        assert!(started.elapsed() < STOP_GRACE);
        drop(release_tx);
    }
}
