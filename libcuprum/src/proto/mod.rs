//! Wire-форматы сервисов / Service wire formats
//!
//! Фиксированные заголовки little-endian, за которыми идёт тело переменной длины.
//! Fixed little-endian headers followed by a variable-length body.
//! Кодирование явное, без опоры на раскладку структур в памяти.
//! Encoding is explicit, never relying on in-memory struct layout.

pub mod keymaster;
pub mod storage;

use alloc::string::String;
use alloc::vec::Vec;

/// Ошибки разбора / Decode errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("reserved field is not zero")]
    Reserved,
    #[error("name is not valid utf-8")]
    BadName,
    #[error("size field {declared} does not match message length {actual}")]
    SizeMismatch { declared: usize, actual: usize },
}

/// Курсор чтения / Read cursor
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated { need: n, have: self.buf.len() });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn i32(&mut self) -> Result<i32, DecodeError> {
        self.array().map(i32::from_le_bytes)
    }

    pub(crate) fn u64(&mut self) -> Result<u64, DecodeError> {
        self.array().map(u64::from_le_bytes)
    }

    pub(crate) fn reserved_u32(&mut self) -> Result<(), DecodeError> {
        match self.u32()? {
            0 => Ok(()),
            _ => Err(DecodeError::Reserved),
        }
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.take(n)
    }

    /// Остаток буфера / Remainder of the buffer
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        core::mem::take(&mut self.buf)
    }

    pub(crate) fn name(&mut self) -> Result<String, DecodeError> {
        let raw = self.rest();
        core::str::from_utf8(raw).map(String::from).map_err(|_| DecodeError::BadName)
    }
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}
