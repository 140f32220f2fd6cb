//! Handles и cookies / Handles and cookies
//!
//! Handle — номер записи в таблице handle'ов задачи (порт или канал).
//! Handle — slot number in the task's handle table (port or channel).

use core::fmt;

/// Номер handle'а / Handle number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(pub i32);

impl Handle {
    /// "Не открыт" / "Not open"
    pub const INVALID: Handle = Handle(-1);

    /// Первый handle, выдаваемый ядром задаче.
    /// First handle number the kernel hands out to a task.
    pub const USER_BASE: i32 = 1000;

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Непрозрачная привязка, которую ядро хранит при handle'е и
/// возвращает в каждом событии.
/// Opaque binding the kernel stores with a handle and hands back
/// with every event on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Cookie(pub u64);

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
