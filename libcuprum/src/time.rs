//! Время / Time
//!
//! Часы ядра считают наносекунды с момента загрузки.
//! Kernel clock counts nanoseconds since boot.

use core::time::Duration;

pub const USEC: u64 = 1_000;
pub const MSEC: u64 = 1_000_000;
pub const SEC: u64 = 1_000_000_000;

/// Таймаут ожидания / Wait timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Ждать без ограничения / Block without a bound
    Infinite,
    After(Duration),
}

impl Timeout {
    pub const fn millis(ms: u64) -> Self {
        Self::After(Duration::from_millis(ms))
    }

    /// Значение для syscall: `u64::MAX` — бесконечность.
    /// Syscall encoding: `u64::MAX` means infinite.
    pub fn as_nanos(self) -> u64 {
        match self {
            Self::Infinite => u64::MAX,
            Self::After(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX - 1),
        }
    }

    /// Оставшееся время до `deadline` (нс) при текущем `now` (нс).
    /// Time left until `deadline` (ns) given the current `now` (ns).
    pub fn until(deadline: u64, now: u64) -> Option<Self> {
        let left = deadline.checked_sub(now).filter(|&left| left > 0)?;
        Some(Self::After(Duration::from_nanos(left)))
    }
}
