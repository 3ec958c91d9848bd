use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use riio_transport::{PortRead, PortWrite, TransportError};
use riio_wire::{
    drain, fault_code, read_exact_vectored, write_all_vectored, Command, Fault, Opcode, WireError,
    HEADER_SIZE,
};
use tracing::{debug, warn};

use crate::error::{ResponderError, Result};
use crate::slot::RequestSlot;
use crate::sync::{lock, wait};

/// State shared between user threads and the two workers.
pub(crate) struct Shared {
    next_id: Mutex<u16>,
    pub(crate) readers: Mutex<VecDeque<RequestSlot>>,
    pub(crate) writers: Mutex<VecDeque<RequestSlot>>,
    pub(crate) wcond: Condvar,
    stop: AtomicBool,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: Mutex::new(0),
            readers: Mutex::new(VecDeque::new()),
            writers: Mutex::new(VecDeque::new()),
            wcond: Condvar::new(),
            stop: AtomicBool::new(false),
        })
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Flag shutdown and wake the writer. Held under the writer lock so the
    /// wakeup cannot be lost.
    pub(crate) fn request_stop(&self) {
        let _queue = lock(&self.writers);
        self.stop.store(true, Ordering::SeqCst);
        self.wcond.notify_all();
    }

    /// Monotonically increasing, wrap allowed. The id space vastly exceeds
    /// the number of concurrent operations, so collisions with live slots do
    /// not occur in practice.
    fn next_client_id(&self) -> u16 {
        let mut next = lock(&self.next_id);
        let id = *next;
        *next = next.wrapping_add(1);
        id
    }
}

/// Serves commands the peer initiates (everything that is not a response).
///
/// Runs on the reader thread. Returning an error stops the responder, which
/// is the required behaviour for protocol violations.
pub trait CommandHandler: Send {
    fn handle(&mut self, cmd: &Command, data: &mut CommandData<'_>) -> Result<()>;
}

/// Read-token handed to the inbound-command handler so it can consume the
/// command's payload and enqueue responses.
pub struct CommandData<'a> {
    port: &'a mut dyn PortRead,
    shared: &'a Arc<Shared>,
}

impl CommandData<'_> {
    /// Read exactly `buf.len()` bytes of command payload.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        Ok(read_exact_vectored(&mut *self.port, &mut [buf], len)?)
    }

    /// Throw away `bytes` of command payload.
    pub fn discard(&mut self, bytes: usize) -> Result<()> {
        Ok(drain(&mut *self.port, bytes)?)
    }

    /// A slot suitable for responding to `cmd`: it reuses the command's
    /// client id so the response correlates on the far side.
    pub fn response_slot(&self, cmd: &Command) -> RequestSlot {
        RequestSlot::new(Arc::clone(self.shared), cmd.client_id)
    }
}

/// Handler for links where the peer is never supposed to initiate commands.
pub struct RejectAllHandler;

impl CommandHandler for RejectAllHandler {
    fn handle(&mut self, cmd: &Command, _data: &mut CommandData<'_>) -> Result<()> {
        warn!(op = ?cmd.op, "peer sent a command on a client-only link");
        Err(ResponderError::UnexpectedCommand(cmd.op))
    }
}

/// The per-link multiplexer: one reader thread, one writer thread, and the
/// queues connecting them to user threads.
pub struct Responder {
    shared: Arc<Shared>,
    read_thread: Option<JoinHandle<()>>,
    write_thread: Option<JoinHandle<()>>,
}

impl Responder {
    /// Take ownership of the two port halves and start the workers.
    pub fn spawn(
        reader: Box<dyn PortRead>,
        writer: Box<dyn PortWrite>,
        handler: Box<dyn CommandHandler>,
    ) -> Result<Self> {
        let shared = Shared::new();

        let read_shared = Arc::clone(&shared);
        let read_thread = thread::Builder::new()
            .name("riio-responder-reader".into())
            .spawn(move || reader_loop(read_shared, reader, handler))
            .map_err(|e| ResponderError::Transport(TransportError::Io(e)))?;

        let write_shared = Arc::clone(&shared);
        let write_thread = thread::Builder::new()
            .name("riio-responder-writer".into())
            .spawn(move || writer_loop(write_shared, writer))
            .map_err(|e| ResponderError::Transport(TransportError::Io(e)))?;

        Ok(Self {
            shared,
            read_thread: Some(read_thread),
            write_thread: Some(write_thread),
        })
    }

    /// A fresh slot with a newly allocated client id.
    pub fn new_slot(&self) -> RequestSlot {
        RequestSlot::new(Arc::clone(&self.shared), self.shared.next_client_id())
    }

    /// A slot bound to an explicit client id, for answering inbound
    /// commands.
    pub fn slot_with_id(&self, client_id: u16) -> RequestSlot {
        RequestSlot::new(Arc::clone(&self.shared), client_id)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped()
    }

    /// Ask the workers to stop. The reader only notices once its blocking
    /// read returns, so cancel the underlying transport first.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Block until both workers exited.
    pub fn wait_done(&mut self) {
        if let Some(handle) = self.write_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.read_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.stop();
        self.wait_done();
    }
}

fn wire_fault_code(err: &WireError) -> i32 {
    match err {
        WireError::Transport(inner) => fault_code(inner),
        WireError::NoBuffers | WireError::TooManySegments { .. } => {
            Fault::InvalidArgument.wire_code()
        }
        WireError::UnknownOpcode(_) => Fault::Io.wire_code(),
    }
}

fn reader_loop(
    shared: Arc<Shared>,
    mut port: Box<dyn PortRead>,
    mut handler: Box<dyn CommandHandler>,
) {
    while !shared.stopped() {
        let mut raw = [0u8; HEADER_SIZE];
        if let Err(err) = read_exact_vectored(&mut *port, &mut [&mut raw], HEADER_SIZE) {
            debug!(error = %err, "reader stopping");
            break;
        }

        let cmd = match Command::from_bytes(&raw) {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!(error = %err, "fatal protocol error");
                break;
            }
        };

        if cmd.op != Opcode::Response {
            let mut data = CommandData {
                port: &mut *port,
                shared: &shared,
            };
            if let Err(err) = handler.handle(&cmd, &mut data) {
                warn!(error = %err, op = ?cmd.op, "inbound command failed");
                break;
            }
            continue;
        }

        // First match wins; the slot leaves the queue before any payload is
        // copied so a second response for the same id cannot race it.
        let slot = {
            let mut queue = lock(&shared.readers);
            let idx = queue
                .iter()
                .position(|slot| slot.client_id() == cmd.client_id);
            idx.and_then(|idx| queue.remove(idx))
        };

        let Some(slot) = slot else {
            debug!(client_id = cmd.client_id, code = cmd.code, "dropping orphan response");
            if cmd.code > 0 && drain(&mut *port, cmd.code as usize).is_err() {
                break;
            }
            continue;
        };

        let mut final_code = cmd.code as i64;
        let mut delivered = cmd.code as i64;
        let mut stop_after = false;

        if cmd.code > 0 {
            let mut r = lock(&slot.inner.r_io);
            let capacity: usize = r.bufs.iter().map(|b| b.len()).sum();
            if capacity > 0 {
                let res = {
                    let mut views: Vec<&mut [u8]> =
                        r.bufs.iter_mut().map(|b| &mut b[..]).collect();
                    read_exact_vectored(&mut *port, &mut views, cmd.code as usize)
                };
                drop(r);
                match res {
                    Ok(read) => {
                        delivered = read as i64;
                        // Consume the full frame even if the buffers were
                        // too small, so the stream stays framed.
                        if read < cmd.code as usize
                            && drain(&mut *port, cmd.code as usize - read).is_err()
                        {
                            stop_after = true;
                        }
                    }
                    Err(err) => {
                        final_code = wire_fault_code(&err) as i64;
                        delivered = final_code;
                        stop_after = true;
                    }
                }
            } else {
                drop(r);
                if drain(&mut *port, cmd.code as usize).is_err() {
                    stop_after = true;
                }
            }
        }

        {
            let queue = lock(&shared.readers);
            let cleanup = {
                let mut r = lock(&slot.inner.r_io);
                r.code = final_code;
                r.cleanup.take()
            };
            slot.inner.r_done.store(true, Ordering::Relaxed);
            slot.inner.r_cond.notify_all();
            if let Some(cb) = cleanup {
                cb(delivered);
            }
            drop(queue);
        }

        if stop_after {
            break;
        }
    }

    shared.request_stop();

    // Wake everything still waiting for a response; nothing will arrive.
    let orphans: Vec<_> = {
        let mut queue = lock(&shared.readers);
        queue.drain(..).collect()
    };
    for slot in orphans {
        let queue = lock(&shared.readers);
        let code = Fault::BrokenPipe.wire_code() as i64;
        let cleanup = {
            let mut r = lock(&slot.inner.r_io);
            r.code = code;
            r.cleanup.take()
        };
        slot.inner.r_done.store(true, Ordering::Relaxed);
        slot.inner.r_cond.notify_all();
        if let Some(cb) = cleanup {
            cb(code);
        }
        drop(queue);
    }
    debug!("reader thread exited");
}

fn writer_loop(shared: Arc<Shared>, mut port: Box<dyn PortWrite>) {
    let mut queue = lock(&shared.writers);

    loop {
        while queue.is_empty() && !shared.stopped() {
            queue = wait(&shared.wcond, queue);
        }
        if shared.stopped() {
            break;
        }
        let Some(slot) = queue.pop_front() else {
            continue;
        };
        drop(queue);

        let (header, payload) = {
            let w = lock(&slot.inner.w_io);
            (w.cmd.to_bytes(), w.payload.clone())
        };
        let mut bufs: Vec<&[u8]> = Vec::with_capacity(payload.len() + 1);
        bufs.push(&header[..]);
        for chunk in &payload {
            bufs.push(chunk.as_ref());
        }

        let code = match write_all_vectored(&mut *port, &bufs) {
            Ok(written) => written as i64,
            Err(err) => {
                debug!(error = %err, "send failed");
                wire_fault_code(&err) as i64
            }
        };

        queue = lock(&shared.writers);
        let cleanup = {
            let mut w = lock(&slot.inner.w_io);
            w.code = code;
            w.cleanup.take()
        };
        slot.inner.w_done.store(true, Ordering::Relaxed);
        slot.inner.w_cond.notify_all();
        if let Some(cb) = cleanup {
            cb(code);
        }
    }

    // Fail whatever was still queued so senders do not hang.
    let leftovers: Vec<_> = queue.drain(..).collect();
    for slot in leftovers {
        let code = Fault::BrokenPipe.wire_code() as i64;
        let cleanup = {
            let mut w = lock(&slot.inner.w_io);
            w.code = code;
            w.cleanup.take()
        };
        slot.inner.w_done.store(true, Ordering::Relaxed);
        slot.inner.w_cond.notify_all();
        if let Some(cb) = cleanup {
            cb(code);
        }
    }
    drop(queue);
    debug!("writer thread exited");
}
