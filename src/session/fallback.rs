//! Threaded relay for hosts without readiness multiplexing or raw mode.
//!
//! The shell channel is split: a drain thread only receives from it, the
//! calling thread only sends to it. Drained chunks travel over a bounded
//! queue to a display-sink thread, and an explicit `Eof`/`Failed` message
//! marks the end of the remote stream.
//!
//! The calling thread stops only on local end of input. It cannot see
//! remote end of stream while blocked reading a keystroke; it learns of
//! it from the sink's report once input ends. Before waiting for that
//! report it closes the channel, so a drain blocked on a still-open shell
//! reaches end of stream and can be joined.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::relay::{RelayExit, RelayOutcome};
use crate::error::{Error, Result};
use crate::ssh::ChannelWriter;

/// Largest chunk read by the drain thread.
pub const DRAIN_CHUNK_SIZE: usize = 256;

/// Chunks buffered between the drain thread and the display sink.
const QUEUE_DEPTH: usize = 64;

/// How long to wait for the sink's report after local input ends.
const SINK_GRACE: Duration = Duration::from_millis(500);

/// Shown before relaying in threaded mode.
pub const BANNER: &[u8] = b"Line-buffered terminal emulation. Press F6 or ^Z to send EOF.\r\n\r\n";

/// Written to local output when the drain thread sees remote end of stream.
pub const DRAIN_EOF_MARKER: &[u8] = b"\r\n*** EOF ***\r\n\r\n";

/// Messages from the drain thread to the display sink.
#[derive(Debug)]
enum DrainEvent {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

/// What the display sink reports when it stops.
#[derive(Debug)]
enum SinkReport {
    RemoteClosed { bytes: u64 },
    Failed(io::Error),
}

/// Runs the threaded relay.
///
/// `reader` and `output` move into background threads; `writer` and
/// `input` stay on the calling thread.
///
/// `remote_closed` in the outcome is true only when the drain thread saw
/// end of stream and both threads were joined. Otherwise the drain may
/// still hold the channel.
pub fn run<Rd, Wr, I, O>(
    reader: Rd,
    mut writer: Wr,
    input: &mut I,
    mut output: O,
    cancel: &CancelToken,
) -> Result<RelayOutcome>
where
    Rd: Read + Send + 'static,
    Wr: ChannelWriter,
    I: Read,
    O: Write + Send + 'static,
{
    output.write_all(BANNER)?;
    output.flush()?;

    let (events_tx, events_rx) = mpsc::sync_channel(QUEUE_DEPTH);
    let (report_tx, report_rx) = mpsc::channel();

    let drain_thread = thread::Builder::new()
        .name("sshelf-drain".to_string())
        .spawn(move || drain(reader, &events_tx))?;
    let display_thread = thread::Builder::new()
        .name("sshelf-display".to_string())
        .spawn(move || display(&events_rx, output, &report_tx))?;

    let mut outcome = RelayOutcome {
        exit: RelayExit::LocalEof,
        remote_closed: false,
        bytes_from_remote: 0,
        bytes_to_remote: 0,
    };

    let mut key = [0u8; 1];
    loop {
        if cancel.is_cancelled() {
            outcome.exit = RelayExit::Cancelled;
            break;
        }
        match input.read(&mut key) {
            Ok(0) => break,
            Ok(_) => {
                writer.write_all(&key)?;
                writer.flush()?;
                outcome.bytes_to_remote += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    debug!("Local input ended ({:?})", outcome.exit);

    if let Err(e) = writer.close() {
        warn!("Could not close shell channel: {}", e);
    }

    match report_rx.recv_timeout(SINK_GRACE) {
        Ok(SinkReport::RemoteClosed { bytes }) => {
            // The drain returns right after sending its end-of-stream event.
            join(drain_thread);
            join(display_thread);
            outcome.remote_closed = true;
            outcome.bytes_from_remote = bytes;
        }
        Ok(SinkReport::Failed(e)) => {
            join(display_thread);
            warn!("Drain failed: {}", e);
            return Err(Error::Io(e));
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("Remote still open after close; drain thread detached");
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!("Display sink stopped without a report");
        }
    }

    info!(
        "Threaded relay closed: {:?}, remote closed: {}",
        outcome.exit, outcome.remote_closed
    );
    Ok(outcome)
}

fn join(handle: thread::JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("relay").to_string();
    if handle.join().is_err() {
        warn!("{} thread panicked", name);
    }
}

/// Receives from the channel until end of stream or error.
fn drain<Rd: Read>(mut reader: Rd, events: &SyncSender<DrainEvent>) {
    let mut chunk = [0u8; DRAIN_CHUNK_SIZE];
    loop {
        let event = match reader.read(&mut chunk) {
            Ok(0) => DrainEvent::Eof,
            Ok(n) => DrainEvent::Data(chunk[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => DrainEvent::Failed(e),
        };
        let last = !matches!(event, DrainEvent::Data(_));
        if events.send(event).is_err() || last {
            return;
        }
    }
}

/// Writes drained chunks to `output` until the drain thread signals the end.
fn display<O: Write>(events: &Receiver<DrainEvent>, mut output: O, report: &mpsc::Sender<SinkReport>) {
    let mut bytes = 0u64;
    let result = loop {
        match events.recv() {
            Ok(DrainEvent::Data(data)) => {
                if let Err(e) = output.write_all(&data).and_then(|()| output.flush()) {
                    break SinkReport::Failed(e);
                }
                bytes += data.len() as u64;
            }
            Ok(DrainEvent::Eof) => {
                if let Err(e) = output
                    .write_all(DRAIN_EOF_MARKER)
                    .and_then(|()| output.flush())
                {
                    break SinkReport::Failed(e);
                }
                break SinkReport::RemoteClosed { bytes };
            }
            Ok(DrainEvent::Failed(e)) => break SinkReport::Failed(e),
            Err(_) => {
                break SinkReport::Failed(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "drain thread vanished",
                ));
            }
        }
    };
    let _ = report.send(result);
}
