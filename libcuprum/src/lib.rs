//! libcuprum — CupruxOS userspace library
//!
//! Тонкая обёртка над syscall'ами + удобный IPC API.
//! Thin wrapper over syscalls + convenient IPC API.
//!
//! Использование / Usage:
//!   use libcuprum::ipc::{Ipc, EventMask};
//!   let port = ipc.port_create("cuprux.echo", 8, 4096, PortFlags::ALLOW_TA_CONNECT)?;
//!   let ev = ipc.wait_any(Timeout::Infinite)?;

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod handle;
pub mod ipc;
pub mod logger;
pub mod mem;
pub mod proto;
pub mod sys;
pub mod time;
pub mod uuid;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use handle::{Cookie, Handle};
pub use uuid::Uuid;

/// Ошибки syscall / Syscall errors
///
/// Коды совпадают с ABI ядра (отрицательные значения в rax).
/// Codes match the kernel ABI (negative values in rax).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid handle")]
    BadHandle,
    #[error("connection refused by port policy")]
    NoPermission,
    #[error("invalid argument")]
    InvalidArg,
    #[error("out of memory")]
    NoMemory,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("no message pending")]
    NoMsg,
    #[error("peer receive queue is full")]
    NotEnoughBuffer,
    #[error("channel closed")]
    ChannelClosed,
    #[error("object in wrong state")]
    BadState,
    #[error("timed out")]
    TimedOut,
    #[error("message too big")]
    TooBig,
    #[error("out of handles")]
    NoResources,
    #[error("unknown error ({0})")]
    Unknown(isize),
}

impl Error {
    /// Перевести код возврата syscall в ошибку.
    /// Map a negative syscall return code to an error.
    pub fn from_raw(code: isize) -> Self {
        match code {
            -1 => Self::BadHandle,
            -2 => Self::NoPermission,
            -3 => Self::InvalidArg,
            -4 => Self::NoMemory,
            -5 => Self::NotFound,
            -6 => Self::AlreadyExists,
            -7 => Self::NoMsg,
            -8 => Self::NotEnoughBuffer,
            -9 => Self::ChannelClosed,
            -10 => Self::BadState,
            -11 => Self::TimedOut,
            -12 => Self::TooBig,
            -13 => Self::NoResources,
            other => Self::Unknown(other),
        }
    }

    pub fn to_raw(self) -> isize {
        match self {
            Self::BadHandle => -1,
            Self::NoPermission => -2,
            Self::InvalidArg => -3,
            Self::NoMemory => -4,
            Self::NotFound => -5,
            Self::AlreadyExists => -6,
            Self::NoMsg => -7,
            Self::NotEnoughBuffer => -8,
            Self::ChannelClosed => -9,
            Self::BadState => -10,
            Self::TimedOut => -11,
            Self::TooBig => -12,
            Self::NoResources => -13,
            Self::Unknown(code) => code,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
