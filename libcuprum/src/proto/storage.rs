//! Storage — протокол файлового хранилища / file-storage protocol
//!
//! Конверт / Envelope (24 байта / bytes):
//!   u32 cmd | u32 op_id | u32 flags | u32 size | i32 result | u32 reserved=0 | payload...
//!
//! `size` — полная длина сообщения вместе с заголовком.
//! `size` is the full message length including the header.

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;

use super::{put_i32, put_u32, put_u64, DecodeError, Reader};

pub const CLIENT_TD_PORT: &str = "cuprux.storage.client.td";
pub const CLIENT_TDP_PORT: &str = "cuprux.storage.client.tdp";
pub const CLIENT_TDEA_PORT: &str = "cuprux.storage.client.tdea";
pub const CLIENT_TP_PORT: &str = "cuprux.storage.client.tp";
pub const DISK_PROXY_PORT: &str = "cuprux.storage.proxy";

pub const REQ_SHIFT: u32 = 1;
pub const RESP_BIT: u32 = 1;

/// Команды / Commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    /// Ответ-ошибка на неразобранный запрос / Error reply to an unparsed request
    RespMsgErr = RESP_BIT,
    FileDelete = 1 << REQ_SHIFT,
    FileOpen = 2 << REQ_SHIFT,
    FileClose = 3 << REQ_SHIFT,
    FileRead = 4 << REQ_SHIFT,
    FileWrite = 5 << REQ_SHIFT,
    FileGetSize = 6 << REQ_SHIFT,
    FileSetSize = 7 << REQ_SHIFT,
    RpmbSend = 8 << REQ_SHIFT,
    EndTransaction = 9 << REQ_SHIFT,
    FileMove = 10 << REQ_SHIFT,
    FileList = 11 << REQ_SHIFT,
}

impl Command {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Код ответа на эту команду / Response code for this command
    pub const fn response(self) -> u32 {
        self as u32 | RESP_BIT
    }

    /// Разобрать код, игнорируя бит ответа.
    /// Parse a code, ignoring the response bit.
    pub fn from_code(code: u32) -> Option<Self> {
        if code == RESP_BIT {
            return Some(Self::RespMsgErr);
        }
        Some(match code & !RESP_BIT {
            c if c == Self::FileDelete as u32 => Self::FileDelete,
            c if c == Self::FileOpen as u32 => Self::FileOpen,
            c if c == Self::FileClose as u32 => Self::FileClose,
            c if c == Self::FileRead as u32 => Self::FileRead,
            c if c == Self::FileWrite as u32 => Self::FileWrite,
            c if c == Self::FileGetSize as u32 => Self::FileGetSize,
            c if c == Self::FileSetSize as u32 => Self::FileSetSize,
            c if c == Self::RpmbSend as u32 => Self::RpmbSend,
            c if c == Self::EndTransaction as u32 => Self::EndTransaction,
            c if c == Self::FileMove as u32 => Self::FileMove,
            c if c == Self::FileList as u32 => Self::FileList,
            _ => return None,
        })
    }
}

/// Коды результата / Result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StorageErr {
    NoError = 0,
    Generic = 1,
    NotValid = 2,
    Unimplemented = 3,
    Access = 4,
    NotFound = 5,
    Exist = 6,
    Transact = 7,
}

impl StorageErr {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::NoError,
            1 => Self::Generic,
            2 => Self::NotValid,
            3 => Self::Unimplemented,
            4 => Self::Access,
            5 => Self::NotFound,
            6 => Self::Exist,
            7 => Self::Transact,
            _ => return None,
        })
    }
}

bitflags! {
    /// Флаги конверта / Envelope flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MsgFlags: u32 {
        const BATCH       = 0x1;
        const PRE_COMMIT  = 0x2;
        const POST_COMMIT = 0x4;
        const TRANSACT_COMPLETE = Self::POST_COMMIT.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const CREATE           = 1 << 0;
        const CREATE_EXCLUSIVE = 1 << 1;
        const TRUNCATE         = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveFlags: u32 {
        const CREATE           = 1 << 0;
        const CREATE_EXCLUSIVE = 1 << 1;
        const OPEN_FILE        = 1 << 2;
    }
}

/// Состояние файла в листинге / File state in a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListState {
    Start = 0,
    End = 1,
    Committed = 2,
    Added = 3,
    Removed = 4,
}

impl ListState {
    pub const MASK: u8 = 7;

    pub fn from_flags(flags: u8) -> Option<Self> {
        Some(match flags & Self::MASK {
            0 => Self::Start,
            1 => Self::End,
            2 => Self::Committed,
            3 => Self::Added,
            4 => Self::Removed,
            _ => return None,
        })
    }
}

// ── Конверт / Envelope ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMsg {
    pub cmd: u32,
    pub op_id: u32,
    pub flags: MsgFlags,
    pub result: i32,
    pub payload: Vec<u8>,
}

impl StorageMsg {
    pub const HEADER_LEN: usize = 24;

    pub fn request(cmd: Command, op_id: u32, payload: Vec<u8>) -> Self {
        Self { cmd: cmd.code(), op_id, flags: MsgFlags::empty(), result: 0, payload }
    }

    pub fn is_response(&self) -> bool {
        self.cmd & RESP_BIT != 0
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.cmd)
    }

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        put_u32(&mut out, self.cmd);
        put_u32(&mut out, self.op_id);
        put_u32(&mut out, self.flags.bits());
        put_u32(&mut out, self.encoded_len() as u32);
        put_i32(&mut out, self.result);
        put_u32(&mut out, 0);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let cmd = r.u32()?;
        let op_id = r.u32()?;
        let flags = MsgFlags::from_bits_retain(r.u32()?);
        let size = r.u32()? as usize;
        let result = r.i32()?;
        r.reserved_u32()?;
        if size != buf.len() {
            return Err(DecodeError::SizeMismatch { declared: size, actual: buf.len() });
        }
        Ok(Self { cmd, op_id, flags, result, payload: r.rest().to_vec() })
    }
}

// ── Тела запросов и ответов / Request and response bodies ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDeleteReq {
    pub flags: u32,
    pub name: String,
}

impl FileDeleteReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.name.len());
        put_u32(&mut out, self.flags);
        out.extend_from_slice(self.name.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        Ok(Self { flags: r.u32()?, name: r.name()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMoveReq {
    pub flags: MoveFlags,
    pub handle: u32,
    pub old_name: String,
    pub new_name: String,
}

impl FileMoveReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.old_name.len() + self.new_name.len());
        put_u32(&mut out, self.flags.bits());
        put_u32(&mut out, self.handle);
        put_u32(&mut out, self.old_name.len() as u32);
        out.extend_from_slice(self.old_name.as_bytes());
        out.extend_from_slice(self.new_name.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let flags = MoveFlags::from_bits_retain(r.u32()?);
        let handle = r.u32()?;
        let old_len = r.u32()? as usize;
        let old = r.bytes(old_len)?;
        let old_name = core::str::from_utf8(old).map_err(|_| DecodeError::BadName)?.into();
        Ok(Self { flags, handle, old_name, new_name: r.name()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOpenReq {
    pub flags: OpenFlags,
    pub name: String,
}

impl FileOpenReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.name.len());
        put_u32(&mut out, self.flags.bits());
        out.extend_from_slice(self.name.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        Ok(Self { flags: OpenFlags::from_bits_retain(r.u32()?), name: r.name()? })
    }
}

/// Есть только при успехе / Present only on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOpenResp {
    pub handle: u32,
}

impl FileOpenResp {
    pub fn encode(&self) -> Vec<u8> {
        self.handle.to_le_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { handle: Reader::new(buf).u32()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCloseReq {
    pub handle: u32,
}

impl FileCloseReq {
    pub fn encode(&self) -> Vec<u8> {
        self.handle.to_le_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { handle: Reader::new(buf).u32()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileReadReq {
    pub handle: u32,
    pub size: u32,
    pub offset: u64,
}

impl FileReadReq {
    pub const LEN: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        put_u32(&mut out, self.handle);
        put_u32(&mut out, self.size);
        put_u64(&mut out, self.offset);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        Ok(Self { handle: r.u32()?, size: r.u32()?, offset: r.u64()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWriteReq {
    pub offset: u64,
    pub handle: u32,
    pub data: Vec<u8>,
}

impl FileWriteReq {
    pub const HEADER_LEN: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.data.len());
        put_u64(&mut out, self.offset);
        put_u32(&mut out, self.handle);
        put_u32(&mut out, 0);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let offset = r.u64()?;
        let handle = r.u32()?;
        r.reserved_u32()?;
        Ok(Self { offset, handle, data: r.rest().to_vec() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListReq {
    /// 0 — без ограничения / 0 means no limit
    pub max_count: u8,
    pub flags: u8,
    /// Последнее полученное имя, пусто для START.
    /// Last name returned, empty for START.
    pub name: String,
}

impl FileListReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.name.len());
        out.push(self.max_count);
        out.push(self.flags);
        out.extend_from_slice(self.name.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        Ok(Self { max_count: r.u8()?, flags: r.u8()?, name: r.name()? })
    }
}

/// Запись листинга; имя оканчивается нулём, записи идут подряд.
/// Listing entry; the name is NUL-terminated and entries repeat back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListResp {
    pub flags: u8,
    pub name: String,
}

impl FileListResp {
    pub fn state(&self) -> Option<ListState> {
        ListState::from_flags(self.flags)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.flags);
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
    }

    pub fn encode_all(entries: &[FileListResp]) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in entries {
            entry.encode_into(&mut out);
        }
        out
    }

    /// Все записи из одного сообщения / Every entry in one message
    pub fn decode_all(buf: &[u8]) -> Result<Vec<Self>, DecodeError> {
        let mut entries = Vec::new();
        let mut r = Reader::new(buf);
        loop {
            let rest = r.rest();
            if rest.is_empty() {
                return Ok(entries);
            }
            let flags = rest[0];
            let body = &rest[1..];
            let nul = body
                .iter()
                .position(|&b| b == 0)
                .ok_or(DecodeError::Truncated { need: body.len() + 1, have: body.len() })?;
            let name = core::str::from_utf8(&body[..nul]).map_err(|_| DecodeError::BadName)?;
            entries.push(Self { flags, name: name.into() });
            r = Reader::new(&body[nul + 1..]);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileGetSizeReq {
    pub handle: u32,
}

impl FileGetSizeReq {
    pub fn encode(&self) -> Vec<u8> {
        self.handle.to_le_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { handle: Reader::new(buf).u32()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileGetSizeResp {
    pub size: u64,
}

impl FileGetSizeResp {
    pub fn encode(&self) -> Vec<u8> {
        self.size.to_le_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self { size: Reader::new(buf).u64()? })
    }
}

/// u64 size | u32 handle | 4 байта выравнивания / 4 bytes of tail padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSetSizeReq {
    pub size: u64,
    pub handle: u32,
}

impl FileSetSizeReq {
    pub const LEN: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        put_u64(&mut out, self.size);
        put_u32(&mut out, self.handle);
        put_u32(&mut out, 0);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let size = r.u64()?;
        let handle = r.u32()?;
        // хвостовое выравнивание может отсутствовать / tail padding may be absent
        let _ = r.rest();
        Ok(Self { size, handle })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmbSendReq {
    pub reliable_write_size: u32,
    pub write_size: u32,
    pub read_size: u32,
    pub payload: Vec<u8>,
}

impl RpmbSendReq {
    pub const HEADER_LEN: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        put_u32(&mut out, self.reliable_write_size);
        put_u32(&mut out, self.write_size);
        put_u32(&mut out, self.read_size);
        put_u32(&mut out, 0);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let reliable_write_size = r.u32()?;
        let write_size = r.u32()?;
        let read_size = r.u32()?;
        r.reserved_u32()?;
        Ok(Self { reliable_write_size, write_size, read_size, payload: r.rest().to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_layout_is_fixed() {
        let mut msg = StorageMsg::request(Command::FileRead, 7, vec![0xaa, 0xbb]);
        msg.flags = MsgFlags::PRE_COMMIT;
        msg.result = -2;
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 26);
        assert_eq!(&bytes[0..4], &8u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &26u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &(-2i32).to_le_bytes());
        assert_eq!(&bytes[20..24], &[0, 0, 0, 0]);
        assert_eq!(StorageMsg::decode(&bytes), Ok(msg));
    }

    #[test]
    fn envelope_rejects_bad_size_and_reserved() {
        let mut bytes = StorageMsg::request(Command::FileClose, 1, vec![1, 2, 3, 4]).encode();
        bytes.push(0);
        assert_eq!(
            StorageMsg::decode(&bytes),
            Err(DecodeError::SizeMismatch { declared: 28, actual: 29 })
        );
        bytes.pop();
        bytes[20] = 1;
        assert_eq!(StorageMsg::decode(&bytes), Err(DecodeError::Reserved));
    }

    #[test]
    fn response_bit_maps_back_to_command() {
        let resp = StorageMsg {
            cmd: Command::FileOpen.response(),
            op_id: 3,
            flags: MsgFlags::empty(),
            result: StorageErr::NotFound as i32,
            payload: vec![],
        };
        assert!(resp.is_response());
        assert_eq!(resp.command(), Some(Command::FileOpen));
        assert_eq!(StorageErr::from_code(resp.result), Some(StorageErr::NotFound));
        assert_eq!(Command::from_code(RESP_BIT), Some(Command::RespMsgErr));
        assert_eq!(Command::from_code(12 << REQ_SHIFT), None);
    }

    #[test]
    fn write_request_checks_reserved() {
        let req = FileWriteReq { offset: 1 << 40, handle: 9, data: b"hello".to_vec() };
        let mut bytes = req.encode();
        assert_eq!(&bytes[0..8], &(1u64 << 40).to_le_bytes());
        assert_eq!(FileWriteReq::decode(&bytes), Ok(req));
        bytes[12] = 0xff;
        assert_eq!(FileWriteReq::decode(&bytes), Err(DecodeError::Reserved));
    }

    #[test]
    fn move_request_splits_names() {
        let req = FileMoveReq {
            flags: MoveFlags::CREATE | MoveFlags::OPEN_FILE,
            handle: 4,
            old_name: "a.bin".into(),
            new_name: "b.bin".into(),
        };
        assert_eq!(FileMoveReq::decode(&req.encode()), Ok(req));
    }

    #[test]
    fn list_response_repeats_in_one_message() {
        let entries = vec![
            FileListResp { flags: ListState::Committed as u8, name: "one".into() },
            FileListResp { flags: ListState::Added as u8, name: "two".into() },
            FileListResp { flags: ListState::End as u8, name: String::new() },
        ];
        let bytes = FileListResp::encode_all(&entries);
        assert_eq!(bytes.len(), 1 + 4 + 1 + 4 + 1 + 1);
        let decoded = FileListResp::decode_all(&bytes).unwrap();
        assert_eq!(decoded, entries);
        assert_eq!(decoded[2].state(), Some(ListState::End));
    }

    #[test]
    fn list_response_without_terminator_is_truncated() {
        assert!(matches!(
            FileListResp::decode_all(&[2, b'x', b'y']),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn set_size_carries_tail_padding() {
        let req = FileSetSizeReq { size: 4096, handle: 2 };
        let bytes = req.encode();
        assert_eq!(bytes.len(), FileSetSizeReq::LEN);
        assert_eq!(FileSetSizeReq::decode(&bytes), Ok(req));
        assert_eq!(FileSetSizeReq::decode(&bytes[..12]), Ok(req));
    }
}
