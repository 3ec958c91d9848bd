//! Typed builders for the operations a client issues over a responder.
//!
//! Each helper allocates a fresh slot, frames the command and blocks for the
//! response. Negative return codes surface as
//! [`ResponderError::Remote`](crate::ResponderError::Remote); non-negative
//! codes are payload lengths or write counts.

use bytes::{BufMut, Bytes, BytesMut};
use riio_wire::{Command, Opcode};

use crate::error::Result;
use crate::responder::Responder;

const TRIGGER_NAME_MAX: usize = 128;
const VERSION_MAX: usize = 64;

/// Which attribute catalogue an operation targets. Device and channel
/// identifiers are opaque at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrTarget<'a> {
    Device,
    Debug,
    Buffer,
    Channel(&'a str),
}

impl AttrTarget<'_> {
    fn read_opcode(self) -> Opcode {
        match self {
            AttrTarget::Device => Opcode::ReadAttr,
            AttrTarget::Debug => Opcode::ReadDbgAttr,
            AttrTarget::Buffer => Opcode::ReadBufAttr,
            AttrTarget::Channel(_) => Opcode::ReadChnAttr,
        }
    }

    fn write_opcode(self) -> Opcode {
        match self {
            AttrTarget::Device => Opcode::WriteAttr,
            AttrTarget::Debug => Opcode::WriteDbgAttr,
            AttrTarget::Buffer => Opcode::WriteBufAttr,
            AttrTarget::Channel(_) => Opcode::WriteChnAttr,
        }
    }

    /// `[channel NUL] attr [NUL value]`
    fn payload(self, attr: &str, value: Option<&[u8]>) -> Bytes {
        let mut buf = BytesMut::new();
        if let AttrTarget::Channel(chn) = self {
            buf.put_slice(chn.as_bytes());
            buf.put_u8(0);
        }
        buf.put_slice(attr.as_bytes());
        if let Some(value) = value {
            buf.put_u8(0);
            buf.put_slice(value);
        }
        buf.freeze()
    }
}

impl Responder {
    /// Fetch an attribute value, reading at most `max_len` bytes.
    pub fn read_attr(
        &self,
        dev: u8,
        target: AttrTarget<'_>,
        attr: &str,
        max_len: usize,
    ) -> Result<Bytes> {
        let payload = target.payload(attr, None);
        let slot = self.new_slot();
        let cmd = Command::new(
            slot.client_id(),
            target.read_opcode(),
            dev,
            payload.len() as i32,
        );

        let (code, mut bufs) =
            slot.exec_command(cmd, vec![payload], vec![BytesMut::zeroed(max_len)])?;

        let mut value = bufs.pop().unwrap_or_default();
        value.truncate((code as usize).min(value.len()));
        Ok(value.freeze())
    }

    /// Store an attribute value. A zero response code acknowledges the full
    /// write, so the value length is reported back on success.
    pub fn write_attr(
        &self,
        dev: u8,
        target: AttrTarget<'_>,
        attr: &str,
        value: &[u8],
    ) -> Result<usize> {
        let payload = target.payload(attr, Some(value));
        let slot = self.new_slot();
        let cmd = Command::new(
            slot.client_id(),
            target.write_opcode(),
            dev,
            payload.len() as i32,
        );

        slot.exec_command(cmd, vec![payload], Vec::new())?;
        Ok(value.len())
    }

    /// Open a device for streaming with the given channel mask.
    pub fn open_device(&self, dev: u8, samples: u32, cyclic: bool, mask: &[u32]) -> Result<()> {
        let mut words = BytesMut::with_capacity(mask.len() * 4);
        for word in mask {
            words.put_u32_le(*word);
        }

        let op = if cyclic { Opcode::OpenCyclic } else { Opcode::Open };
        let slot = self.new_slot();
        let cmd = Command::new(slot.client_id(), op, dev, samples as i32);
        let payload = if words.is_empty() {
            Vec::new()
        } else {
            vec![words.freeze()]
        };

        slot.exec_command(cmd, payload, Vec::new())?;
        Ok(())
    }

    pub fn close_device(&self, dev: u8) -> Result<()> {
        let slot = self.new_slot();
        slot.exec_simple_command(Command::new(slot.client_id(), Opcode::Close, dev, 0))?;
        Ok(())
    }

    /// Read up to `len` bytes of sample data.
    pub fn read_buffer(&self, dev: u8, len: usize) -> Result<BytesMut> {
        let slot = self.new_slot();
        let cmd = Command::new(slot.client_id(), Opcode::ReadBuf, dev, len as i32);

        let (code, mut bufs) = slot.exec_command(cmd, Vec::new(), vec![BytesMut::zeroed(len)])?;

        let mut data = bufs.pop().unwrap_or_default();
        data.truncate((code as usize).min(data.len()));
        Ok(data)
    }

    /// Push sample data. A zero response code acknowledges the full block.
    pub fn write_buffer(&self, dev: u8, data: Bytes) -> Result<usize> {
        let len = data.len();
        let slot = self.new_slot();
        let cmd = Command::new(slot.client_id(), Opcode::WriteBuf, dev, len as i32);

        slot.exec_command(cmd, vec![data], Vec::new())?;
        Ok(len)
    }

    /// The trigger currently bound to the device, if any.
    pub fn get_trigger(&self, dev: u8) -> Result<Option<String>> {
        let slot = self.new_slot();
        let cmd = Command::new(slot.client_id(), Opcode::GetTrig, dev, 0);

        let (code, bufs) =
            slot.exec_command(cmd, Vec::new(), vec![BytesMut::zeroed(TRIGGER_NAME_MAX)])?;
        if code == 0 {
            return Ok(None);
        }

        let len = (code as usize).min(TRIGGER_NAME_MAX);
        Ok(Some(
            String::from_utf8_lossy(&bufs[0][..len]).into_owned(),
        ))
    }

    /// Bind a trigger by name; `None` clears it.
    pub fn set_trigger(&self, dev: u8, trigger: Option<&str>) -> Result<()> {
        let slot = self.new_slot();
        let name = trigger.unwrap_or_default();
        let cmd = Command::new(slot.client_id(), Opcode::SetTrig, dev, name.len() as i32);
        let payload = if name.is_empty() {
            Vec::new()
        } else {
            vec![Bytes::copy_from_slice(name.as_bytes())]
        };

        slot.exec_command(cmd, payload, Vec::new())?;
        Ok(())
    }

    pub fn set_buffers_count(&self, dev: u8, count: u32) -> Result<()> {
        let slot = self.new_slot();
        slot.exec_simple_command(Command::new(
            slot.client_id(),
            Opcode::SetBufCnt,
            dev,
            count as i32,
        ))?;
        Ok(())
    }

    /// Tell the remote which timeout to apply to its own backend.
    pub fn set_remote_timeout(&self, millis: u32) -> Result<()> {
        let slot = self.new_slot();
        slot.exec_simple_command(Command::new(
            slot.client_id(),
            Opcode::Timeout,
            0,
            millis as i32,
        ))?;
        Ok(())
    }

    /// Fetch the remote context description.
    pub fn context_description(&self, max_len: usize) -> Result<Bytes> {
        let slot = self.new_slot();
        let cmd = Command::new(slot.client_id(), Opcode::Print, 0, 0);

        let (code, mut bufs) = slot.exec_command(cmd, Vec::new(), vec![BytesMut::zeroed(max_len)])?;

        let mut text = bufs.pop().unwrap_or_default();
        text.truncate((code as usize).min(text.len()));
        Ok(text.freeze())
    }

    /// The server's version string.
    pub fn server_version(&self) -> Result<String> {
        let slot = self.new_slot();
        let cmd = Command::new(slot.client_id(), Opcode::Version, 0, 0);

        let (code, bufs) = slot.exec_command(cmd, Vec::new(), vec![BytesMut::zeroed(VERSION_MAX)])?;

        let len = (code as usize).min(VERSION_MAX);
        Ok(String::from_utf8_lossy(&bufs[0][..len]).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use riio_transport::{PortRead, PortWrite, Result as TransportResult, TransportError};
    use riio_wire::{Fault, HEADER_SIZE};

    use super::*;
    use crate::responder::RejectAllHandler;
    use crate::ResponderError;

    struct BlockingReader {
        rx: mpsc::Receiver<Vec<u8>>,
        pending: VecDeque<u8>,
    }

    impl PortRead for BlockingReader {
        fn read_vectored(&mut self, bufs: &mut [&mut [u8]]) -> TransportResult<usize> {
            while self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(chunk) => self.pending.extend(chunk),
                    Err(_) => return Err(TransportError::Closed),
                }
            }
            let mut copied = 0;
            for buf in bufs.iter_mut() {
                for byte in buf.iter_mut() {
                    match self.pending.pop_front() {
                        Some(b) => {
                            *byte = b;
                            copied += 1;
                        }
                        None => return Ok(copied),
                    }
                }
            }
            Ok(copied)
        }
    }

    struct SinkWriter(Arc<Mutex<Vec<u8>>>);

    impl PortWrite for SinkWriter {
        fn write_vectored(&mut self, bufs: &[&[u8]]) -> TransportResult<usize> {
            let mut sink = self.0.lock().unwrap();
            let mut total = 0;
            for buf in bufs {
                sink.extend_from_slice(buf);
                total += buf.len();
            }
            Ok(total)
        }
    }

    fn harness() -> (Responder, mpsc::Sender<Vec<u8>>, Arc<Mutex<Vec<u8>>>) {
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(Mutex::new(Vec::new()));
        let responder = Responder::spawn(
            Box::new(BlockingReader {
                rx,
                pending: VecDeque::new(),
            }),
            Box::new(SinkWriter(Arc::clone(&sink))),
            Box::new(RejectAllHandler),
        )
        .unwrap();
        (responder, tx, sink)
    }

    /// Wait for the command frame starting at byte `at`, then answer it
    /// with `code` and `payload`, echoing the command's client id.
    fn respond_at(
        sink: &Arc<Mutex<Vec<u8>>>,
        tx: &mpsc::Sender<Vec<u8>>,
        at: usize,
        code: i32,
        payload: &'static [u8],
    ) -> thread::JoinHandle<Command> {
        let sink = Arc::clone(sink);
        let tx = tx.clone();
        thread::spawn(move || {
            for _ in 0..1000 {
                {
                    let wire = sink.lock().unwrap();
                    if wire.len() > at + HEADER_SIZE - 1 {
                        let raw: [u8; HEADER_SIZE] =
                            wire[at..at + HEADER_SIZE].try_into().unwrap();
                        drop(wire);
                        let cmd = Command::from_bytes(&raw).unwrap();
                        let mut frame = Command::new(cmd.client_id, Opcode::Response, 0, code)
                            .to_bytes()
                            .to_vec();
                        frame.extend_from_slice(payload);
                        tx.send(frame).unwrap();
                        return cmd;
                    }
                }
                thread::sleep(Duration::from_millis(2));
            }
            panic!("command never reached the wire");
        })
    }

    #[test]
    fn read_attr_frames_the_name_and_returns_the_value() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 5, b"1234\n");
        let value = responder
            .read_attr(0, AttrTarget::Device, "in_voltage0_raw", 64)
            .unwrap();
        let cmd = server.join().unwrap();

        assert_eq!(cmd.op, Opcode::ReadAttr);
        assert_eq!(cmd.dev, 0);
        assert_eq!(cmd.code, 15);
        assert_eq!(value.as_ref(), b"1234\n");

        let wire = sink.lock().unwrap().clone();
        assert_eq!(&wire[HEADER_SIZE..HEADER_SIZE + 15], b"in_voltage0_raw");
    }

    #[test]
    fn channel_attr_payload_carries_the_channel_id() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 0, b"");
        let written = responder
            .write_attr(1, AttrTarget::Channel("voltage0"), "scale", b"1.5")
            .unwrap();
        let cmd = server.join().unwrap();

        assert_eq!(cmd.op, Opcode::WriteChnAttr);
        assert_eq!(written, 3);

        let wire = sink.lock().unwrap().clone();
        assert_eq!(&wire[HEADER_SIZE..], b"voltage0\0scale\x001.5");
    }

    #[test]
    fn debug_and_buffer_attrs_pick_their_opcodes() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 1, b"1");
        responder
            .read_attr(0, AttrTarget::Debug, "direct_reg_access", 16)
            .unwrap();
        assert_eq!(server.join().unwrap().op, Opcode::ReadDbgAttr);

        let at = sink.lock().unwrap().len();
        let server = respond_at(&sink, &tx, at, 1, b"1");
        responder
            .read_attr(0, AttrTarget::Buffer, "data_available", 16)
            .unwrap();
        assert_eq!(server.join().unwrap().op, Opcode::ReadBufAttr);
    }

    #[test]
    fn open_sends_samples_count_and_mask_words() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 0, b"");
        responder.open_device(2, 256, false, &[0x0000_000F]).unwrap();
        let cmd = server.join().unwrap();

        assert_eq!(cmd.op, Opcode::Open);
        assert_eq!(cmd.dev, 2);
        assert_eq!(cmd.code, 256);

        let wire = sink.lock().unwrap().clone();
        assert_eq!(&wire[HEADER_SIZE..], &[0x0F, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn cyclic_open_uses_its_own_opcode() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 0, b"");
        responder.open_device(0, 64, true, &[1]).unwrap();
        assert_eq!(server.join().unwrap().op, Opcode::OpenCyclic);
    }

    #[test]
    fn buffer_write_reports_accepted_bytes() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 0, b"");
        let accepted = responder
            .write_buffer(3, Bytes::from_static(b"\x01\x02\x03\x04"))
            .unwrap();
        let cmd = server.join().unwrap();

        assert_eq!(cmd.op, Opcode::WriteBuf);
        assert_eq!(cmd.code, 4);
        assert_eq!(accepted, 4);
    }

    #[test]
    fn buffer_read_truncates_to_the_returned_code() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 6, b"sample");
        let data = responder.read_buffer(1, 32).unwrap();
        let cmd = server.join().unwrap();

        assert_eq!(cmd.op, Opcode::ReadBuf);
        assert_eq!(cmd.code, 32);
        assert_eq!(data.as_ref(), b"sample");
    }

    #[test]
    fn trigger_roundtrip() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 0, b"");
        assert_eq!(responder.get_trigger(0).unwrap(), None);
        assert_eq!(server.join().unwrap().op, Opcode::GetTrig);

        let at = sink.lock().unwrap().len();
        let server = respond_at(&sink, &tx, at, 8, b"trigger0");
        assert_eq!(
            responder.get_trigger(0).unwrap().as_deref(),
            Some("trigger0")
        );
        server.join().unwrap();

        let at = sink.lock().unwrap().len();
        let server = respond_at(&sink, &tx, at, 0, b"");
        responder.set_trigger(0, Some("trigger0")).unwrap();
        let cmd = server.join().unwrap();
        assert_eq!(cmd.op, Opcode::SetTrig);
        assert_eq!(cmd.code, 8);
    }

    #[test]
    fn remote_timeout_and_buffer_count_are_code_only() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 0, b"");
        responder.set_remote_timeout(2500).unwrap();
        let cmd = server.join().unwrap();
        assert_eq!(cmd.op, Opcode::Timeout);
        assert_eq!(cmd.code, 2500);

        let at = sink.lock().unwrap().len();
        let server = respond_at(&sink, &tx, at, 0, b"");
        responder.set_buffers_count(1, 4).unwrap();
        let cmd = server.join().unwrap();
        assert_eq!(cmd.op, Opcode::SetBufCnt);
        assert_eq!(cmd.code, 4);
    }

    #[test]
    fn version_string_is_trimmed() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, 6, b"1.0.3\n");
        assert_eq!(responder.server_version().unwrap(), "1.0.3");
        assert_eq!(server.join().unwrap().op, Opcode::Version);
    }

    #[test]
    fn remote_error_code_becomes_a_typed_fault() {
        let (responder, tx, sink) = harness();

        let server = respond_at(&sink, &tx, 0, Fault::AccessDenied.wire_code(), b"");
        let err = responder.read_attr(0, AttrTarget::Device, "secret", 16);
        server.join().unwrap();

        assert!(matches!(
            err,
            Err(ResponderError::Remote(Fault::AccessDenied))
        ));
    }
}
