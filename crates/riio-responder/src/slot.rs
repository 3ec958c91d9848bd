use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use bytes::{Bytes, BytesMut};
use riio_wire::{Command, Opcode, MAX_SEGMENTS};

use crate::error::{ResponderError, Result};
use crate::responder::Shared;
use crate::sync::{lock, wait};

/// Fired on the worker thread when its direction completes, with the byte
/// count transferred or a negative fault code. Runs with the corresponding
/// queue lock held; it must not call back into the responder.
pub type CleanupFn = Box<dyn FnOnce(i64) + Send>;

/// Write-side record: the command being sent and its payload.
pub(crate) struct WriteIo {
    pub(crate) cmd: Command,
    pub(crate) payload: Vec<Bytes>,
    pub(crate) code: i64,
    pub(crate) cleanup: Option<CleanupFn>,
}

/// Read-side record: the buffers an expected response will be copied into.
pub(crate) struct ReadIo {
    pub(crate) code: i64,
    pub(crate) bufs: Vec<BytesMut>,
    pub(crate) cleanup: Option<CleanupFn>,
}

pub(crate) struct SlotInner {
    pub(crate) client_id: u16,
    pub(crate) shared: Arc<Shared>,

    pub(crate) r_cond: Condvar,
    pub(crate) w_cond: Condvar,

    pub(crate) r_done: AtomicBool,
    pub(crate) w_done: AtomicBool,
    pub(crate) cancelled: AtomicBool,

    pub(crate) r_io: Mutex<ReadIo>,
    pub(crate) w_io: Mutex<WriteIo>,
}

/// Per-operation state for one in-flight exchange.
///
/// Cloning a slot clones a handle to the same exchange; the worker queues
/// hold such clones. A slot may sit on the writer queue (awaiting send) and
/// the reader queue (awaiting a response) at the same time. The
/// `r_done`/`w_done` flags are only written under the corresponding queue
/// lock, which makes the condition-variable handoff race-free.
#[derive(Clone)]
pub struct RequestSlot {
    pub(crate) inner: Arc<SlotInner>,
}

impl RequestSlot {
    pub(crate) fn new(shared: Arc<Shared>, client_id: u16) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                client_id,
                shared,
                r_cond: Condvar::new(),
                w_cond: Condvar::new(),
                r_done: AtomicBool::new(false),
                w_done: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                r_io: Mutex::new(ReadIo {
                    code: 0,
                    bufs: Vec::new(),
                    cleanup: None,
                }),
                w_io: Mutex::new(WriteIo {
                    cmd: Command::new(client_id, Opcode::Response, 0, 0),
                    payload: Vec::new(),
                    code: 0,
                    cleanup: None,
                }),
            }),
        }
    }

    pub fn client_id(&self) -> u16 {
        self.inner.client_id
    }

    pub(crate) fn is_same(&self, other: &RequestSlot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue `cmd` plus `payload` for transmission and return immediately.
    pub fn send_command_async(
        &self,
        cmd: Command,
        payload: Vec<Bytes>,
        cleanup: Option<CleanupFn>,
    ) -> Result<()> {
        if payload.len() + 1 > MAX_SEGMENTS {
            return Err(ResponderError::InvalidArgument("too many payload segments"));
        }

        {
            let mut w = lock(&self.inner.w_io);
            w.cmd = cmd;
            w.payload = payload;
            w.code = 0;
            w.cleanup = cleanup;
        }

        let mut queue = lock(&self.inner.shared.writers);
        if self.inner.shared.stopped() {
            return Err(ResponderError::Stopped);
        }
        self.inner.w_done.store(false, Ordering::Relaxed);
        queue.push_back(self.clone());
        self.inner.shared.wcond.notify_one();
        Ok(())
    }

    /// Block until a queued send completed; returns the bytes written.
    pub fn wait_for_send_done(&self) -> Result<i64> {
        let mut queue = lock(&self.inner.shared.writers);
        while !self.inner.w_done.load(Ordering::Relaxed)
            && !self.inner.cancelled.load(Ordering::Relaxed)
        {
            queue = wait(&self.inner.w_cond, queue);
        }
        if !self.inner.w_done.load(Ordering::Relaxed) {
            return Err(ResponderError::Cancelled);
        }
        self.inner.w_done.store(false, Ordering::Relaxed);
        drop(queue);

        let code = lock(&self.inner.w_io).code;
        if code < 0 {
            Err(ResponderError::from_code(code))
        } else {
            Ok(code)
        }
    }

    /// Send a command and wait until it hit the wire.
    pub fn send_command(&self, cmd: Command, payload: Vec<Bytes>) -> Result<i64> {
        self.send_command_async(cmd, payload, None)?;
        self.wait_for_send_done()
    }

    /// Queue a response frame for a previously received command.
    pub fn send_response_async(
        &self,
        code: i32,
        payload: Vec<Bytes>,
        cleanup: Option<CleanupFn>,
    ) -> Result<()> {
        let cmd = Command::new(self.inner.client_id, Opcode::Response, 0, code);
        self.send_command_async(cmd, payload, cleanup)
    }

    /// Send a response frame and wait until it hit the wire.
    pub fn send_response(&self, code: i32, payload: Vec<Bytes>) -> Result<i64> {
        self.send_response_async(code, payload, None)?;
        self.wait_for_send_done()
    }

    /// Register `bufs` for the next matching response and return
    /// immediately. May be called before or after the command is sent.
    pub fn get_response_async(&self, bufs: Vec<BytesMut>) -> Result<()> {
        self.enqueue_response_request(bufs, None)
    }

    /// Like [`RequestSlot::get_response_async`], additionally registering a
    /// cleanup hook fired on the reader thread with the delivered byte count.
    pub fn get_response_async_with_cleanup(
        &self,
        bufs: Vec<BytesMut>,
        cleanup: CleanupFn,
    ) -> Result<()> {
        self.enqueue_response_request(bufs, Some(cleanup))
    }

    fn enqueue_response_request(
        &self,
        bufs: Vec<BytesMut>,
        cleanup: Option<CleanupFn>,
    ) -> Result<()> {
        if bufs.len() > MAX_SEGMENTS {
            return Err(ResponderError::InvalidArgument("too many response buffers"));
        }

        let mut queue = lock(&self.inner.shared.readers);
        if self.inner.shared.stopped() {
            return Err(ResponderError::Stopped);
        }
        {
            let mut r = lock(&self.inner.r_io);
            r.code = 0;
            r.bufs = bufs;
            r.cleanup = cleanup;
        }
        self.inner.r_done.store(false, Ordering::Relaxed);
        queue.push_back(self.clone());
        Ok(())
    }

    /// Block until the registered response arrived. Returns the response
    /// code and the filled buffers.
    pub fn wait_for_response(&self) -> Result<(i64, Vec<BytesMut>)> {
        let mut queue = lock(&self.inner.shared.readers);
        while !self.inner.r_done.load(Ordering::Relaxed)
            && !self.inner.cancelled.load(Ordering::Relaxed)
        {
            queue = wait(&self.inner.r_cond, queue);
        }
        if !self.inner.r_done.load(Ordering::Relaxed) {
            return Err(ResponderError::Cancelled);
        }
        self.inner.r_done.store(false, Ordering::Relaxed);
        drop(queue);

        let (code, bufs) = {
            let mut r = lock(&self.inner.r_io);
            (r.code, mem::take(&mut r.bufs))
        };
        if code < 0 {
            Err(ResponderError::from_code(code))
        } else {
            Ok((code, bufs))
        }
    }

    /// Blocking receive: register buffers, wait for the response.
    pub fn get_response(&self, bufs: Vec<BytesMut>) -> Result<(i64, Vec<BytesMut>)> {
        self.get_response_async(bufs)?;
        self.wait_for_response()
    }

    /// Wait for the pending response and atomically queue a new response
    /// request on the same slot, without letting a frame slip through the
    /// gap. Enables zero-gap back-to-back request/response pipelining.
    pub fn get_and_request_response(&self, next: Vec<BytesMut>) -> Result<(i64, Vec<BytesMut>)> {
        if next.len() > MAX_SEGMENTS {
            return Err(ResponderError::InvalidArgument("too many response buffers"));
        }

        let mut queue = lock(&self.inner.shared.readers);
        while !self.inner.r_done.load(Ordering::Relaxed)
            && !self.inner.cancelled.load(Ordering::Relaxed)
        {
            queue = wait(&self.inner.r_cond, queue);
        }
        if !self.inner.r_done.load(Ordering::Relaxed) {
            return Err(ResponderError::Cancelled);
        }
        self.inner.r_done.store(false, Ordering::Relaxed);

        let (code, prev) = {
            let mut r = lock(&self.inner.r_io);
            let code = r.code;
            let prev = mem::replace(&mut r.bufs, next);
            r.code = 0;
            (code, prev)
        };
        // Re-queued before the reader lock drops.
        queue.push_back(self.clone());
        drop(queue);

        if code < 0 {
            Err(ResponderError::from_code(code))
        } else {
            Ok((code, prev))
        }
    }

    /// Send a command, then wait for its response. On a send failure the
    /// pending response request is cancelled before the error is returned.
    pub fn exec_command(
        &self,
        cmd: Command,
        payload: Vec<Bytes>,
        response_bufs: Vec<BytesMut>,
    ) -> Result<(i64, Vec<BytesMut>)> {
        self.get_response_async(response_bufs)?;

        if let Err(err) = self.send_command(cmd, payload) {
            self.cancel();
            return Err(err);
        }

        self.wait_for_response()
    }

    /// Send a payload-less command and return the response code.
    pub fn exec_simple_command(&self, cmd: Command) -> Result<i64> {
        self.exec_command(cmd, Vec::new(), Vec::new())
            .map(|(code, _)| code)
    }

    /// Withdraw the slot from both queues. Idempotent. A response already
    /// being copied when cancel runs is drained on the wire but never
    /// delivered; blocked waiters wake with [`ResponderError::Cancelled`].
    pub fn cancel(&self) {
        {
            let mut queue = lock(&self.inner.shared.readers);
            queue.retain(|slot| !slot.is_same(self));
            self.inner.cancelled.store(true, Ordering::SeqCst);
            self.inner.r_cond.notify_all();
        }
        {
            let mut queue = lock(&self.inner.shared.writers);
            queue.retain(|slot| !slot.is_same(self));
            self.inner.w_cond.notify_all();
        }
    }
}
