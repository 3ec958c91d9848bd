use crate::error::{Result, WireError};

/// Size of the packed command header on the wire.
pub const HEADER_SIZE: usize = 8;

/// Operation codes understood by the instrument server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Response = 0,
    Print,
    Version,
    Timeout,
    Open,
    OpenCyclic,
    Close,
    ReadAttr,
    ReadDbgAttr,
    ReadBufAttr,
    ReadChnAttr,
    WriteAttr,
    WriteDbgAttr,
    WriteBufAttr,
    WriteChnAttr,
    ReadBuf,
    WriteBuf,
    GetTrig,
    SetTrig,
    SetBufCnt,
}

impl Opcode {
    pub fn from_wire(op: u8) -> Result<Self> {
        Ok(match op {
            0 => Opcode::Response,
            1 => Opcode::Print,
            2 => Opcode::Version,
            3 => Opcode::Timeout,
            4 => Opcode::Open,
            5 => Opcode::OpenCyclic,
            6 => Opcode::Close,
            7 => Opcode::ReadAttr,
            8 => Opcode::ReadDbgAttr,
            9 => Opcode::ReadBufAttr,
            10 => Opcode::ReadChnAttr,
            11 => Opcode::WriteAttr,
            12 => Opcode::WriteDbgAttr,
            13 => Opcode::WriteBufAttr,
            14 => Opcode::WriteChnAttr,
            15 => Opcode::ReadBuf,
            16 => Opcode::WriteBuf,
            17 => Opcode::GetTrig,
            18 => Opcode::SetTrig,
            19 => Opcode::SetBufCnt,
            other => return Err(WireError::UnknownOpcode(other)),
        })
    }
}

/// The fixed command header.
///
/// `code` is command-specific on the way out (sample count, timeout,
/// payload length). In a [`Opcode::Response`] frame it is the signed return
/// code; when positive it is also the number of payload bytes that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Correlates responses to requests. Unique among live requests.
    pub client_id: u16,
    pub op: Opcode,
    /// Device index within the remote context.
    pub dev: u8,
    pub code: i32,
}

impl Command {
    pub fn new(client_id: u16, op: Opcode, dev: u8, code: i32) -> Self {
        Self {
            client_id,
            op,
            dev,
            code,
        }
    }

    /// Serialize to the little-endian wire layout.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&self.client_id.to_le_bytes());
        out[2] = self.op as u8;
        out[3] = self.dev;
        out[4..8].copy_from_slice(&self.code.to_le_bytes());
        out
    }

    /// Parse a header. An unknown opcode is a protocol violation.
    pub fn from_bytes(raw: &[u8; HEADER_SIZE]) -> Result<Self> {
        Ok(Self {
            client_id: u16::from_le_bytes([raw[0], raw[1]]),
            op: Opcode::from_wire(raw[2])?,
            dev: raw[3],
            code: i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let cmd = Command::new(0x1234, Opcode::ReadAttr, 3, -2);
        let raw = cmd.to_bytes();
        assert_eq!(raw, [0x34, 0x12, 7, 3, 0xFE, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let cmd = Command::new(65535, Opcode::SetBufCnt, 255, i32::MIN);
        let parsed = Command::from_bytes(&cmd.to_bytes()).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn every_opcode_roundtrips() {
        for op in 0u8..20 {
            let parsed = Opcode::from_wire(op).unwrap();
            assert_eq!(parsed as u8, op);
        }
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert!(matches!(
            Opcode::from_wire(20),
            Err(WireError::UnknownOpcode(20))
        ));
        assert!(matches!(
            Opcode::from_wire(255),
            Err(WireError::UnknownOpcode(255))
        ));

        let raw = [0, 0, 99, 0, 0, 0, 0, 0];
        assert!(Command::from_bytes(&raw).is_err());
    }

    #[test]
    fn response_code_carries_sign() {
        let raw = Command::new(1, Opcode::Response, 0, -32).to_bytes();
        let parsed = Command::from_bytes(&raw).unwrap();
        assert_eq!(parsed.code, -32);
    }
}
