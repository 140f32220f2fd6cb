//! Keymaster — заголовок команды защищённого порта
//! Keymaster — secure-port command header
//!
//! Раскладка / Layout:
//!   u32 cmd | payload...
//!
//! Младший бит — ответ, следующий — "стоп", остальное — код запроса.
//! Low bit marks a response, the next one "stop", the rest is the request code.

use alloc::vec::Vec;

use super::{put_u32, DecodeError, Reader};

pub const SECURE_PORT: &str = "cuprux.keymaster.secure";

pub const RESP_BIT: u32 = 1;
pub const STOP_BIT: u32 = 2;
pub const REQ_SHIFT: u32 = 2;

pub const GET_AUTH_TOKEN_KEY: u32 = 0 << REQ_SHIFT;
pub const GET_DEVICE_INFO: u32 = 1 << REQ_SHIFT;
pub const SET_ATTESTATION_IDS_SECURE: u32 = 0xc000 << REQ_SHIFT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHeader {
    pub cmd: u32,
    pub payload: Vec<u8>,
}

impl CommandHeader {
    pub const HEADER_LEN: usize = 4;

    pub fn request(code: u32, payload: Vec<u8>) -> Self {
        Self { cmd: code, payload }
    }

    pub fn is_response(&self) -> bool {
        self.cmd & RESP_BIT != 0
    }

    pub fn is_stop(&self) -> bool {
        self.cmd & STOP_BIT != 0
    }

    /// Код запроса без служебных битов / Request code without flag bits
    pub fn request_code(&self) -> u32 {
        self.cmd & !(RESP_BIT | STOP_BIT)
    }

    /// Ответ на этот запрос / Response to this request
    pub fn response_to(&self, payload: Vec<u8>) -> Self {
        Self { cmd: self.request_code() | RESP_BIT, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        put_u32(&mut out, self.cmd);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let cmd = r.u32()?;
        Ok(Self { cmd, payload: r.rest().to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_keeps_request_code() {
        let req = CommandHeader::request(GET_DEVICE_INFO, vec![]);
        let resp = req.response_to(vec![1, 2, 3]);
        assert!(resp.is_response());
        assert!(!resp.is_stop());
        assert_eq!(resp.request_code(), GET_DEVICE_INFO);
        assert_eq!(resp.encode(), [5, 0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn decode_needs_full_header() {
        assert_eq!(
            CommandHeader::decode(&[1, 2]),
            Err(DecodeError::Truncated { need: 4, have: 2 })
        );
        let stop = CommandHeader::decode(&(SET_ATTESTATION_IDS_SECURE | STOP_BIT).to_le_bytes()).unwrap();
        assert!(stop.is_stop());
        assert_eq!(stop.request_code(), SET_ATTESTATION_IDS_SECURE);
    }
}
