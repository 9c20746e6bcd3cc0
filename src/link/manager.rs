//! Link manager
//!
//! Owns the single serial connection. Writes are queued to a dedicated writer
//! thread and complete through a oneshot, so async callers wait without
//! blocking the runtime. A reader thread drains inbound bytes and reports them
//! as events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};

use super::transport::{is_transient, PortOpener, SerialOpener, Transport};
use super::{LinkConfig, LinkError, LinkResult};
use crate::protocol::BaudRate;

/// Connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Open { device: String, baud: BaudRate },
}

/// Events emitted by the link manager
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The connection opened or closed
    StateChanged(LinkState),
    /// Everything that was buffered at the time of the read
    DataAvailable(Bytes),
    /// The reader hit an unrecoverable error and stopped
    Error { message: String },
}

/// Link statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkStats {
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub writes_completed: u64,
    /// Attempts the transport refused and that were retried
    pub write_retries: u64,
}

#[derive(Default)]
struct StatCounters {
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    writes_completed: AtomicU64,
    write_retries: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> LinkStats {
        LinkStats {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            writes_completed: self.writes_completed.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
        }
    }
}

struct WriteRequest {
    bytes: Bytes,
    done: oneshot::Sender<LinkResult<()>>,
}

/// Owns the serial connection and its worker threads
pub struct LinkManager {
    config: LinkConfig,
    opener: Arc<dyn PortOpener>,
    state: LinkState,
    write_tx: Option<mpsc::Sender<WriteRequest>>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    stats: Arc<StatCounters>,
}

impl LinkManager {
    /// Create a manager for host serial ports
    pub fn new(config: LinkConfig) -> Self {
        let opener = SerialOpener {
            timeout: config.port_timeout,
        };
        Self::with_opener(config, Arc::new(opener))
    }

    pub fn with_opener(config: LinkConfig, opener: Arc<dyn PortOpener>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            config,
            opener,
            state: LinkState::Closed,
            write_tx: None,
            stop: Arc::new(AtomicBool::new(true)),
            workers: Vec::new(),
            event_tx,
            event_rx: Some(event_rx),
            stats: Arc::new(StatCounters::default()),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.event_rx.take()
    }

    pub fn opener(&self) -> &dyn PortOpener {
        self.opener.as_ref()
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn stats(&self) -> LinkStats {
        self.stats.snapshot()
    }

    /// Open the device and start listening for inbound data
    pub fn open(&mut self, device: &str, baud: BaudRate) -> LinkResult<()> {
        if let LinkState::Open { device: current, .. } = &self.state {
            return Err(LinkError::AlreadyOpen(current.clone()));
        }

        tracing::info!("Opening {} at {} baud", device, baud);

        let open_error = |source| LinkError::Open {
            device: device.to_string(),
            source,
        };
        let writer_port = self.opener.open(device, baud).map_err(open_error)?;
        let reader_port = writer_port.try_clone_transport().map_err(open_error)?;

        let stop = Arc::new(AtomicBool::new(false));
        let (write_tx, write_rx) = mpsc::channel(self.config.write_queue_depth.max(1));

        let writer = {
            let stop = stop.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            thread::Builder::new()
                .name("radiochat-writer".to_string())
                .spawn(move || writer_loop(writer_port, write_rx, stop, config, stats))?
        };

        let reader = {
            let stop = stop.clone();
            let stats = self.stats.clone();
            let events = self.event_tx.clone();
            let poll = self.config.read_poll;
            thread::Builder::new()
                .name("radiochat-reader".to_string())
                .spawn(move || reader_loop(reader_port, stop, poll, events, stats))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                drop(write_tx);
                let _ = writer.join();
                return Err(LinkError::Io(e));
            }
        };

        self.stop = stop;
        self.write_tx = Some(write_tx);
        self.workers = vec![writer, reader];
        self.state = LinkState::Open {
            device: device.to_string(),
            baud,
        };
        self.emit(LinkEvent::StateChanged(self.state.clone()));

        tracing::info!("Connected to {}", device);
        Ok(())
    }

    /// Close the connection. Safe to call when already closed.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.write_tx = None;

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("Link worker thread panicked");
            }
        }

        if let LinkState::Open { device, .. } = &self.state {
            tracing::info!("Disconnected from {}", device);
            self.state = LinkState::Closed;
            self.emit(LinkEvent::StateChanged(LinkState::Closed));
        }
    }

    /// Write bytes and wait until the transport has accepted all of them
    ///
    /// Dropping the returned future stops waiting; bytes already handed to the
    /// writer thread may still go out.
    pub async fn write(&self, bytes: impl Into<Bytes>) -> LinkResult<()> {
        let tx = self.write_tx.as_ref().ok_or(LinkError::NotOpen)?;
        let (done_tx, done_rx) = oneshot::channel();

        tx.send(WriteRequest {
            bytes: bytes.into(),
            done: done_tx,
        })
        .await
        .map_err(|_| LinkError::Closed)?;

        done_rx.await.map_err(|_| LinkError::Closed)?
    }

    fn emit(&self, event: LinkEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!("Link event dropped, receiver gone");
        }
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn writer_loop(
    mut port: Box<dyn Transport>,
    mut requests: mpsc::Receiver<WriteRequest>,
    stop: Arc<AtomicBool>,
    config: LinkConfig,
    stats: Arc<StatCounters>,
) {
    while let Some(request) = requests.blocking_recv() {
        let result = if stop.load(Ordering::SeqCst) {
            Err(LinkError::Closed)
        } else {
            write_with_retry(port.as_mut(), &request.bytes, &config, &stop, &stats)
        };

        if result.is_ok() {
            stats.writes_completed.fetch_add(1, Ordering::Relaxed);
        }
        // The caller may have stopped waiting
        let _ = request.done.send(result);
    }
    tracing::debug!("Writer thread exiting");
}

/// Push every byte through the transport, retrying while it refuses
fn write_with_retry(
    port: &mut dyn Transport,
    bytes: &[u8],
    config: &LinkConfig,
    stop: &AtomicBool,
    stats: &StatCounters,
) -> LinkResult<()> {
    let mut remaining = bytes;
    let mut last_progress = Instant::now();
    let mut flushed = false;

    while !remaining.is_empty() || !flushed {
        if stop.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }

        let attempt = if remaining.is_empty() {
            port.flush().map(|_| {
                flushed = true;
                0
            })
        } else {
            port.write(remaining)
        };

        match attempt {
            Ok(n) if n > 0 => {
                remaining = &remaining[n..];
                stats.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
                last_progress = Instant::now();
                continue;
            }
            Ok(_) if flushed => continue,
            Ok(_) => {}
            Err(e) if is_transient(&e) => {}
            Err(e) => return Err(LinkError::Io(e)),
        }

        stats.write_retries.fetch_add(1, Ordering::Relaxed);
        let waited = last_progress.elapsed();
        if let Some(limit) = config.write_stall_timeout {
            if waited >= limit {
                tracing::warn!("Write stalled for {:?}, giving up", waited);
                return Err(LinkError::WriteStalled(waited));
            }
        }
        if waited >= Duration::from_secs(1) {
            tracing::warn!(
                "Peer has not accepted data for {:?}, {} bytes pending",
                waited,
                remaining.len()
            );
        }
        thread::sleep(config.write_retry);
    }

    Ok(())
}

fn reader_loop(
    mut port: Box<dyn Transport>,
    stop: Arc<AtomicBool>,
    poll: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
    stats: Arc<StatCounters>,
) {
    let mut buf = [0u8; 4096];

    'outer: while !stop.load(Ordering::SeqCst) {
        let pending = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => {
                tracing::error!("Serial read failed: {}", e);
                let _ = events.send(LinkEvent::Error {
                    message: e.to_string(),
                });
                break;
            }
        };

        if pending == 0 {
            thread::sleep(poll);
            continue;
        }

        let mut data = BytesMut::with_capacity(pending);
        while data.len() < pending {
            let want = (pending - data.len()).min(buf.len());
            match port.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e) if is_transient(&e) => break,
                Err(e) => {
                    tracing::error!("Serial read failed: {}", e);
                    let _ = events.send(LinkEvent::Error {
                        message: e.to_string(),
                    });
                    break 'outer;
                }
            }
        }

        if data.is_empty() {
            continue;
        }

        stats
            .bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        tracing::debug!("Read {} bytes", data.len());

        if events.send(LinkEvent::DataAvailable(data.freeze())).is_err() {
            break;
        }
    }
    tracing::debug!("Reader thread exiting");
}
