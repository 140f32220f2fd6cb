//! Логгер для `log` / `log` facade backend
//!
//! Пишет строки вида `[tag] LEVEL: message` в любой `fmt::Write`.
//! Writes `[tag] LEVEL: message` lines into any `fmt::Write`.
//!
//! Использование / Usage:
//!   static LOGGER: Logger<Console> = Logger::new("ipc-unittest-srv", Console);
//!   LOGGER.install(LevelFilter::Info)?;

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

pub struct Logger<W> {
    tag: &'static str,
    out: Mutex<W>,
}

impl<W: Write + Send> Logger<W> {
    pub const fn new(tag: &'static str, out: W) -> Self {
        Self { tag, out: Mutex::new(out) }
    }

    /// Зарегистрировать глобально / Install as the global logger
    pub fn install(&'static self, level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(level);
        Ok(())
    }

    /// Доступ к приёмнику (для тестов и сброса буфера).
    /// Access the sink (for tests and buffer flushing).
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.out.lock())
    }

    fn write_record(&self, out: &mut W, record: &Record<'_>) -> fmt::Result {
        writeln!(out, "[{}] {}: {}", self.tag, record.level(), record.args())
    }
}

impl<W: Write + Send> Log for Logger<W> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut out = self.out.lock();
        // Ошибку консоли некуда сообщить / Nowhere to report a console error
        self.write_record(&mut out, record).ok();
    }

    fn flush(&self) {}
}
