//! Настройки сервиса / Service settings

use alloc::format;
use alloc::string::String;
use core::ops::Range;
use core::time::Duration;

use libcuprum::ipc::MAX_USER_HANDLES;

/// Базовый путь имён сервисов / Base path of service names
pub const SRV_PATH_BASE: &str = "cuprux.ipc-unittest";

/// Первый handle, который клиент теста ещё не занял.
/// First handle number the test client has not taken yet.
pub const FIRST_FREE_HANDLE: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub base_path:       String,
    /// Пауза closer'ов на нечётном соединении / Closer pause on odd connections
    pub closer_delay:    Duration,
    pub connect_timeout: Duration,
    /// Номера портов `accept{i}`, которые обходит connect
    /// Port numbers `accept{i}` walked by the connect service
    pub connect_range:   Range<u32>,
    /// Предел ожидания SEND_UNBLOCKED в echo / Echo bound on SEND_UNBLOCKED waits
    pub send_timeout:    Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_path:       String::from(SRV_PATH_BASE),
            closer_delay:    Duration::from_millis(100),
            connect_timeout: Duration::from_millis(1000),
            connect_range:   FIRST_FREE_HANDLE..MAX_USER_HANDLES as u32,
            send_timeout:    Duration::from_millis(1000),
        }
    }
}

impl ServiceConfig {
    pub fn with_base_path(mut self, base: &str) -> Self {
        self.base_path = String::from(base);
        self
    }

    pub fn with_closer_delay(mut self, delay: Duration) -> Self {
        self.closer_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connect_range(mut self, range: Range<u32>) -> Self {
        self.connect_range = range;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// `"{base}.srv.{suffix}"`
    pub fn service_path(&self, suffix: &str) -> String {
        format!("{}.srv.{}", self.base_path, suffix)
    }

    /// `"{base}.port.accept{i}"`
    pub fn accept_path(&self, i: u32) -> String {
        format!("{}.port.accept{}", self.base_path, i)
    }
}

/// Длительность в наносекундах для `nanosleep` / Duration as nanoseconds for `nanosleep`
pub fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
