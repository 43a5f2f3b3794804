//! Device I/O boundary
//!
//! A [`DeviceAdapter`] opens a named device and hands back a [`DeviceHandle`].
//! The handle talks to the device through channels:
//! - inbound: chunks pushed by an adapter-owned reader, which doubles as the
//!   "data available" notification
//! - outbound: bytes to write, consumed in order by an adapter-owned writer
//!
//! The session never touches the device directly, so no callback can run
//! concurrently with it.
//!
//! # Adding a new backend
//!
//! 1. Implement [`DeviceAdapter::open`]
//! 2. Feed received chunks into [`DeviceChannels::rx`]'s sender, report
//!    failures as `Err` items
//! 3. Write everything received on [`DeviceChannels::tx`]'s receiver

pub mod serial;

pub use serial::SerialAdapter;

use crate::config::SerialConfig;
use crate::constants::DISCARD_POLL_MS;
use crate::error::{BridgeError, Result};
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Opens named devices
///
/// `open` is blocking; callers run it off the async executor.
pub trait DeviceAdapter: Send + Sync + 'static {
    /// Open and configure `name`
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` - no such device
    /// - `DeviceBusy` - device held by another owner
    /// - `DeviceIo` - configuration or setup failed
    fn open(&self, name: &str, timeout: Duration, line: &SerialConfig) -> Result<DeviceHandle>;
}

/// Open `name` on a blocking thread, giving up after `timeout`
///
/// A timed-out open is reported as `DeviceBusy`. If the open completes
/// later, the handle is dropped and its workers stop.
pub async fn open(
    adapter: &Arc<dyn DeviceAdapter>,
    name: &str,
    timeout: Duration,
    line: &SerialConfig,
) -> Result<DeviceHandle> {
    let adapter = adapter.clone();
    let device = name.to_string();
    let line = line.clone();
    let task = tokio::task::spawn_blocking(move || adapter.open(&device, timeout, &line));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(BridgeError::device_io(
            name,
            io::Error::other(format!("open task failed: {}", join_err)),
        )),
        Err(_) => Err(BridgeError::DeviceBusy {
            device: name.to_string(),
            reason: format!("open timed out after {}ms", timeout.as_millis()),
        }),
    }
}

/// Channels connecting a handle to its device backend
pub struct DeviceChannels {
    /// Chunks read from the device; `Err` reports a device failure
    ///
    /// Returns `None` once the backend has stopped.
    pub rx: mpsc::Receiver<io::Result<Bytes>>,

    /// Bytes to write to the device, in order
    pub tx: mpsc::Sender<Bytes>,
}

/// Discards output the driver has buffered but not yet sent
pub(crate) type Discard = Box<dyn Fn() -> io::Result<()> + Send + Sync>;

/// Background threads owned by a handle
pub(crate) struct Workers {
    /// Stops the reader
    pub stop: Arc<AtomicBool>,
    /// Makes the writer drop whatever is still queued
    pub abort: Arc<AtomicBool>,
    /// Resolves with the writer's result once it exits
    pub writer_done: oneshot::Receiver<io::Result<()>>,
    pub discard: Discard,
    /// How long queued output may take to drain on close
    pub flush_timeout: Duration,
}

/// Exclusive handle to an open device
///
/// Dropping the handle without [`close`](Self::close) still stops its
/// background threads; queued writes are then discarded.
pub struct DeviceHandle {
    name: String,
    rx: mpsc::Receiver<io::Result<Bytes>>,
    tx: Option<mpsc::Sender<Bytes>>,
    /// Received bytes not yet handed to the session
    pending: Bytes,
    /// Failure seen while draining, reported after the bytes before it
    fault: Option<io::Error>,
    workers: Option<Workers>,
}

impl DeviceHandle {
    /// Wrap backend channels in a handle
    pub fn new(name: impl Into<String>, channels: DeviceChannels) -> Self {
        Self {
            name: name.into(),
            rx: channels.rx,
            tx: Some(channels.tx),
            pending: Bytes::new(),
            fault: None,
            workers: None,
        }
    }

    /// Attach the backend threads, stopped on close or drop
    pub(crate) fn with_workers(mut self, workers: Workers) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the device has unread bytes
    ///
    /// Returns `Ok(false)` when the backend has stopped. Cancel safe.
    pub async fn data_available(&mut self) -> Result<bool> {
        loop {
            if !self.pending.is_empty() {
                return Ok(true);
            }
            if let Some(e) = self.fault.take() {
                return Err(BridgeError::device_io(self.name.as_str(), e));
            }
            match self.rx.recv().await {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Err(BridgeError::device_io(self.name.as_str(), e)),
                None => return Ok(false),
            }
        }
    }

    /// Append up to `limit` already-received bytes to `dst`
    ///
    /// Never waits. Returns the number of bytes appended; 0 means nothing is
    /// currently available. A backend failure is held back and reported by
    /// the next [`data_available`](Self::data_available).
    pub fn read(&mut self, dst: &mut BytesMut, limit: usize) -> usize {
        let mut copied = 0;
        while copied < limit {
            if self.pending.is_empty() {
                if self.fault.is_some() {
                    break;
                }
                match self.rx.try_recv() {
                    Ok(Ok(chunk)) => self.pending = chunk,
                    Ok(Err(e)) => {
                        self.fault = Some(e);
                        break;
                    }
                    Err(_) => break,
                }
                continue;
            }
            let take = (limit - copied).min(self.pending.len());
            dst.extend_from_slice(&self.pending.split_to(take));
            copied += take;
        }
        copied
    }

    /// Queue bytes for the device writer
    pub async fn write(&self, data: Bytes) -> Result<()> {
        let stopped = || {
            BridgeError::device_io(
                self.name.as_str(),
                io::Error::new(io::ErrorKind::BrokenPipe, "device writer stopped"),
            )
        };
        let tx = self.tx.as_ref().ok_or_else(stopped)?;
        tx.send(data).await.map_err(|_| stopped())
    }

    /// Release the device
    ///
    /// Queued writes get the flush timeout to complete. If the writer is
    /// still stuck after that, queued output is discarded and the writer gets
    /// one more flush timeout to exit before it is left behind. Never waits
    /// longer than twice the flush timeout. A writer failure is returned as
    /// `DeviceIo`.
    pub async fn close(mut self) -> Result<()> {
        drop(self.tx.take());
        // Backend threads must not block on a full inbound channel from here on
        self.rx.close();
        let Some(mut workers) = self.workers.take() else {
            return Ok(());
        };
        workers.stop.store(true, Ordering::SeqCst);

        if let Ok(done) =
            tokio::time::timeout(workers.flush_timeout, &mut workers.writer_done).await
        {
            return self.writer_result(done);
        }

        warn!(
            "Writer on {} stalled for {}ms, discarding queued output",
            self.name,
            workers.flush_timeout.as_millis()
        );
        workers.abort.store(true, Ordering::SeqCst);
        let poll = Duration::from_millis(DISCARD_POLL_MS);
        let deadline = tokio::time::Instant::now() + workers.flush_timeout;
        while tokio::time::Instant::now() < deadline {
            if let Err(e) = (workers.discard)() {
                debug!("Discarding output on {} failed: {}", self.name, e);
            }
            if let Ok(done) = tokio::time::timeout(poll, &mut workers.writer_done).await {
                return self.writer_result(done);
            }
        }

        Err(BridgeError::device_io(
            self.name.as_str(),
            io::Error::new(
                io::ErrorKind::TimedOut,
                "device writer did not stop, leaving it behind",
            ),
        ))
    }

    fn writer_result(
        &self,
        done: std::result::Result<io::Result<()>, oneshot::error::RecvError>,
    ) -> Result<()> {
        match done {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::device_io(self.name.as_str(), e)),
            Err(_) => Err(BridgeError::device_io(
                self.name.as_str(),
                io::Error::other("device writer thread panicked"),
            )),
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Some(workers) = &self.workers {
            workers.stop.store(true, Ordering::SeqCst);
            workers.abort.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn handle() -> (
        DeviceHandle,
        mpsc::Sender<io::Result<Bytes>>,
        mpsc::Receiver<Bytes>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        let handle = DeviceHandle::new("/dev/test0", DeviceChannels { rx: in_rx, tx: out_tx });
        (handle, in_tx, out_rx)
    }

    #[tokio::test]
    async fn test_read_drains_queued_chunks() {
        let (mut device, in_tx, _out) = handle();
        in_tx.send(Ok(Bytes::from_static(b"OK"))).await.unwrap();
        in_tx.send(Ok(Bytes::from_static(b"\r\n"))).await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(device.read(&mut buf, 64), 4);
        assert_eq!(&buf[..], b"OK\r\n");
        assert_eq!(device.read(&mut buf, 64), 0);
    }

    #[tokio::test]
    async fn test_read_respects_limit() {
        let (mut device, in_tx, _out) = handle();
        in_tx.send(Ok(Bytes::from_static(b"abcdef"))).await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(device.read(&mut buf, 4), 4);
        assert_eq!(&buf[..], b"abcd");

        // Remainder stays pending for the next burst
        assert!(device.data_available().await.unwrap());
        buf.clear();
        assert_eq!(device.read(&mut buf, 4), 2);
        assert_eq!(&buf[..], b"ef");
    }

    #[tokio::test]
    async fn test_fault_reported_after_data() {
        let (mut device, in_tx, _out) = handle();
        in_tx.send(Ok(Bytes::from_static(b"last"))).await.unwrap();
        in_tx.send(Err(io::Error::other("unplugged"))).await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(device.read(&mut buf, 64), 4);
        assert!(matches!(
            device.data_available().await,
            Err(BridgeError::DeviceIo { .. })
        ));
    }

    #[tokio::test]
    async fn test_data_available_false_when_backend_stops() {
        let (mut device, in_tx, _out) = handle();
        drop(in_tx);
        assert!(!device.data_available().await.unwrap());
    }

    #[tokio::test]
    async fn test_write_then_close_releases_writer() {
        let (device, _in_tx, mut out_rx) = handle();
        device.write(Bytes::from_static(b"AT\r\n")).await.unwrap();
        device.close().await.unwrap();

        assert_eq!(out_rx.recv().await.unwrap().as_ref(), b"AT\r\n");
        assert!(out_rx.recv().await.is_none());
    }

    fn workers(
        writer_done: oneshot::Receiver<io::Result<()>>,
        discard: Discard,
    ) -> (Workers, Arc<AtomicBool>) {
        let abort = Arc::new(AtomicBool::new(false));
        let workers = Workers {
            stop: Arc::new(AtomicBool::new(false)),
            abort: abort.clone(),
            writer_done,
            discard,
            flush_timeout: Duration::from_millis(50),
        };
        (workers, abort)
    }

    #[tokio::test]
    async fn test_close_waits_for_writer_result() {
        let (device, _in_tx, _out) = handle();
        let (done_tx, done_rx) = oneshot::channel();
        let (workers, abort) = workers(done_rx, Box::new(|| Ok(())));
        let device = device.with_workers(workers);

        done_tx
            .send(Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled")))
            .unwrap();
        assert!(matches!(
            device.close().await,
            Err(BridgeError::DeviceIo { .. })
        ));
        assert!(!abort.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_discards_output_of_stalled_writer() {
        let (device, _in_tx, _out) = handle();
        let (done_tx, done_rx) = oneshot::channel();
        // Discarding buffered output is what lets the stuck write return
        let done_tx = Mutex::new(Some(done_tx));
        let discard: Discard = Box::new(move || {
            if let Some(tx) = done_tx.lock().unwrap().take() {
                let _ = tx.send(Ok(()));
            }
            Ok(())
        });
        let (workers, abort) = workers(done_rx, discard);
        let device = device.with_workers(workers);

        let closed = tokio::time::timeout(Duration::from_secs(2), device.close())
            .await
            .expect("close did not return");
        assert!(closed.is_ok());
        assert!(abort.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_gives_up_on_writer_that_never_stops() {
        let (device, _in_tx, _out) = handle();
        let (_done_tx, done_rx) = oneshot::channel();
        let discards = Arc::new(AtomicUsize::new(0));
        let counter = discards.clone();
        let (workers, _abort) = workers(
            done_rx,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let device = device.with_workers(workers);

        let closed = tokio::time::timeout(Duration::from_secs(2), device.close())
            .await
            .expect("close did not return");
        match closed {
            Err(BridgeError::DeviceIo { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::TimedOut)
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(discards.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_close_unblocks_full_inbound_channel() {
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let device = DeviceHandle::new("/dev/test0", DeviceChannels { rx: in_rx, tx: out_tx });
        in_tx.send(Ok(Bytes::from_static(b"x"))).await.unwrap();

        // A backend thread reporting into a full channel
        let reporter = std::thread::spawn(move || {
            in_tx
                .blocking_send(Err(io::Error::other("late fault")))
                .is_err()
        });
        device.close().await.unwrap();
        assert!(reporter.join().unwrap());
    }

    struct SlowAdapter;

    impl DeviceAdapter for SlowAdapter {
        fn open(&self, name: &str, _: Duration, _: &SerialConfig) -> Result<DeviceHandle> {
            std::thread::sleep(Duration::from_millis(200));
            Err(BridgeError::DeviceNotFound {
                device: name.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_open_timeout_reports_busy() {
        let adapter: Arc<dyn DeviceAdapter> = Arc::new(SlowAdapter);
        let result = open(
            &adapter,
            "/dev/slow",
            Duration::from_millis(20),
            &SerialConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(BridgeError::DeviceBusy { .. })));
    }

    struct OnceAdapter(Mutex<Option<DeviceChannels>>);

    impl DeviceAdapter for OnceAdapter {
        fn open(&self, name: &str, _: Duration, _: &SerialConfig) -> Result<DeviceHandle> {
            match self.0.lock().unwrap().take() {
                Some(channels) => Ok(DeviceHandle::new(name, channels)),
                None => Err(BridgeError::DeviceBusy {
                    device: name.to_string(),
                    reason: "already open".into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_open_is_exclusive() {
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let adapter: Arc<dyn DeviceAdapter> = Arc::new(OnceAdapter(Mutex::new(Some(
            DeviceChannels { rx: in_rx, tx: out_tx },
        ))));
        let line = SerialConfig::default();
        let timeout = Duration::from_secs(1);

        let first = open(&adapter, "/dev/test0", timeout, &line).await.unwrap();
        assert_eq!(first.name(), "/dev/test0");
        assert!(matches!(
            open(&adapter, "/dev/test0", timeout, &line).await,
            Err(BridgeError::DeviceBusy { .. })
        ));
    }
}
