//! Serial port backend built on the `serialport` crate
//!
//! Uses blocking threads, one per direction:
//! - Reader thread: reads with a short timeout, pushes chunks to the session
//! - Writer thread: receives from channel, writes to serial port
//!
//! The reader stops when the handle is closed or dropped, or when the port
//! reports an error or goes silent past the disconnect threshold. The writer
//! stops when the handle releases its sender, a write fails, or the handle
//! asks it to abort. A third clone of the port is kept for discarding output
//! the driver has buffered, which releases a write stuck on flow control.

use super::{DeviceAdapter, DeviceChannels, DeviceHandle, Discard, Workers};
use crate::config::{FlowControl, Parity, SerialConfig};
use crate::constants::{
    CHANNEL_CAPACITY, DEVICE_READ_CHUNK, DEVICE_WRITE_CHUNK, SERIAL_DISCONNECT_THRESHOLD,
    SERIAL_READ_TIMEOUT_MS,
};
use crate::error::{BridgeError, Result};
use bytes::Bytes;
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Serial port adapter
///
/// # Example
///
/// ```ignore
/// let adapter = SerialAdapter;
/// let device = adapter.open("/dev/ttyS0", Duration::from_secs(5), &SerialConfig::default())?;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialAdapter;

impl DeviceAdapter for SerialAdapter {
    fn open(&self, name: &str, _timeout: Duration, line: &SerialConfig) -> Result<DeviceHandle> {
        let mut port = serialport::new(name, line.baud_rate)
            .timeout(Duration::from_millis(SERIAL_READ_TIMEOUT_MS))
            .open()
            .map_err(|e| map_open_error(name, e))?;
        debug!("Found port {}", name);

        configure(port.as_mut(), line).map_err(|e| BridgeError::device_io(name, e.into()))?;

        let clone = |port: &dyn SerialPort| {
            port.try_clone()
                .map_err(|e| BridgeError::device_io(name, e.into()))
        };
        let mut port_write = clone(port.as_ref())?;
        let control = clone(port.as_ref())?;
        // Writes may wait on CTS, give them longer than the read poll interval
        port_write
            .set_timeout(line.write_timeout())
            .map_err(|e| BridgeError::device_io(name, e.into()))?;

        spawn_workers(name, port, port_write, control, line.write_timeout())
    }
}

/// Apply line parameters to an open port
fn configure(port: &mut dyn SerialPort, line: &SerialConfig) -> serialport::Result<()> {
    port.set_baud_rate(line.baud_rate)?;
    port.set_data_bits(data_bits(line.data_bits))?;
    port.set_stop_bits(stop_bits(line.stop_bits))?;
    port.set_parity(parity(line.parity))?;
    port.set_flow_control(flow_control(line.flow_control))?;
    Ok(())
}

fn spawn_workers(
    name: &str,
    port_read: Box<dyn SerialPort>,
    port_write: Box<dyn SerialPort>,
    control: Box<dyn SerialPort>,
    flush_timeout: Duration,
) -> Result<DeviceHandle> {
    let (in_tx, in_rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
    let (done_tx, done_rx) = oneshot::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let abort = Arc::new(AtomicBool::new(false));

    // Writer thread (blocking); exits once the handle drops its sender
    let faults = in_tx.clone();
    let writer_abort = abort.clone();
    std::thread::Builder::new()
        .name("serial-writer".into())
        .spawn(move || {
            let result = write_loop(port_write, out_rx, &writer_abort, &faults);
            let _ = done_tx.send(result);
        })
        .map_err(|e| BridgeError::device_io(name, e))?;

    // Reader thread (blocking)
    let stop_reader = stop.clone();
    std::thread::Builder::new()
        .name("serial-reader".into())
        .spawn(move || {
            let mut port = port_read;
            let mut buf = [0u8; DEVICE_READ_CHUNK];
            let mut zero_reads = 0u32;

            while !stop_reader.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(n) if n > 0 => {
                        zero_reads = 0;
                        if in_tx
                            .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                            .is_err()
                        {
                            // Handle closed or dropped
                            break;
                        }
                    }
                    Ok(_) => {
                        // Zero bytes read - could be normal or port gone
                        zero_reads += 1;
                        if zero_reads > SERIAL_DISCONNECT_THRESHOLD {
                            let _ = in_tx.blocking_send(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "serial port disconnected",
                            )));
                            break;
                        }
                    }
                    Err(ref e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                        ) =>
                    {
                        // Nothing available yet
                        zero_reads = 0;
                    }
                    Err(e) => {
                        let _ = in_tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
            // Channel closes once the writer's clone is gone too
        })
        .map_err(|e| BridgeError::device_io(name, e))?;

    let control = Mutex::new(control);
    let discard: Discard = Box::new(move || {
        let port = control
            .lock()
            .map_err(|_| io::Error::other("control port lock poisoned"))?;
        port.clear(ClearBuffer::Output).map_err(io::Error::from)
    });

    let channels = DeviceChannels {
        rx: in_rx,
        tx: out_tx,
    };
    Ok(DeviceHandle::new(name, channels).with_workers(Workers {
        stop,
        abort,
        writer_done: done_rx,
        discard,
        flush_timeout,
    }))
}

/// Write queued bursts until the queue closes, a write fails or `abort` is set
///
/// Bursts go out in small slices so a write waiting on flow control holds
/// little data and `abort` is seen between slices.
fn write_loop(
    mut port: Box<dyn SerialPort>,
    mut queue: mpsc::Receiver<Bytes>,
    abort: &AtomicBool,
    faults: &mpsc::Sender<io::Result<Bytes>>,
) -> io::Result<()> {
    while let Some(data) = queue.blocking_recv() {
        for chunk in data.chunks(DEVICE_WRITE_CHUNK) {
            if abort.load(Ordering::Relaxed) {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "queued output discarded",
                ));
            }
            if let Err(e) = port.write_all(chunk) {
                // Session learns about it through the inbound channel, if it still listens
                let _ = faults.try_send(Err(io::Error::new(e.kind(), e.to_string())));
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Classify an open failure
fn map_open_error(name: &str, e: serialport::Error) -> BridgeError {
    match e.kind() {
        serialport::ErrorKind::NoDevice
        | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => BridgeError::DeviceNotFound {
            device: name.to_string(),
        },
        _ if is_busy(&e.description) => BridgeError::DeviceBusy {
            device: name.to_string(),
            reason: e.description,
        },
        _ => BridgeError::device_io(name, e.into()),
    }
}

/// EBUSY / sharing violations surface as free-form descriptions
fn is_busy(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    lower.contains("busy") || lower.contains("in use") || lower.contains("access is denied")
}

fn data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> serialport::StopBits {
    match bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Software => serialport::FlowControl::Software,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}
