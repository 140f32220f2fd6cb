//! Диспетчер событий / Event dispatcher
//!
//! Один блокирующий `wait_any` на все handle'ы задачи; событие уходит
//! обработчику по cookie и обрабатывается до конца, прежде чем будет взято
//! следующее.
//! One blocking `wait_any` over every handle of the task; each event goes to
//! its handler by cookie and runs to completion before the next is taken.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use libcuprum::ipc::{Event, Ipc};
use libcuprum::time::Timeout;
use libcuprum::{Error, Result};
use log::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::registry::{ChannelFlow, Descriptor, Registry};
use crate::services;

/// Итог одной итерации / Outcome of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Событие передано обработчику / Event handed to a handler
    Dispatched,
    /// Пустая маска / Empty mask
    Empty,
    /// Невалидный handle / Invalid handle
    Invalid,
    /// Handle без обработчика закрыт / Handle without a handler was closed
    Orphan,
    WaitFailed(Error),
}

pub struct Dispatcher<I: Ipc> {
    registry: Registry<I>,
    stop:     Arc<AtomicBool>,
}

impl<I: Ipc> Dispatcher<I> {
    /// Поднять все сервисы. Всё или ничего.
    /// Bring every service up. All or nothing.
    pub fn start(ipc: I, config: ServiceConfig, services: &'static [Descriptor]) -> Result<Self> {
        debug!("init {} services", services.len());
        let mut registry = Registry::new(ipc, config, services);
        registry.create_all()?;
        Ok(Self { registry, stop: Arc::new(AtomicBool::new(false)) })
    }

    pub fn registry(&self) -> &Registry<I> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry<I> {
        &mut self.registry
    }

    /// Флаг остановки, проверяется между итерациями.
    /// Stop flag, checked between iterations.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Крутить цикл до флага остановки, затем закрыть всё.
    /// Spin the loop until the stop flag is raised, then close everything.
    pub fn run(&mut self) {
        while !self.stop.load(Ordering::Acquire) {
            self.step(Timeout::Infinite);
        }
        self.registry.destroy_all();
    }

    /// Одна итерация / One iteration
    pub fn step(&mut self, timeout: Timeout) -> Step {
        let ev = match self.registry.ipc().wait_any(timeout) {
            Ok(ev) => ev,
            Err(e) => {
                // не фатально: ждём дальше / not fatal: keep waiting
                if e != Error::TimedOut {
                    info!("wait_any failed ({})", e);
                }
                return Step::WaitFailed(e);
            }
        };
        self.dispatch(&ev)
    }

    fn dispatch(&mut self, ev: &Event) -> Step {
        if ev.mask.is_empty() {
            info!("no event for handle {}", ev.handle);
            return Step::Empty;
        }
        if !ev.handle.is_valid() {
            info!("invalid handle {} in event", ev.handle);
            return Step::Invalid;
        }

        let Some(cookie) = ev.cookie else {
            return self.orphan(ev);
        };

        if let Some(slot) = self.registry.port_slot(cookie, ev.handle) {
            services::handle_port(&mut self.registry, slot, ev);
            return Step::Dispatched;
        }

        let Some(mut handler) = self.registry.take_channel(cookie, ev.handle) else {
            return self.orphan(ev);
        };
        match services::handle_channel(&self.registry, &mut handler, ev) {
            ChannelFlow::Keep => self.registry.restore_channel(cookie, ev.handle, handler),
            // состояние освобождается раньше, чем закрывается handle
            // the state is freed before the handle is closed
            ChannelFlow::Close => {
                drop(handler);
                self.registry.close_handle(ev.handle);
            }
        }
        Step::Dispatched
    }

    fn orphan(&mut self, ev: &Event) -> Step {
        warn!("no handler for handle {} (event {:#x}), closing it", ev.handle, ev.mask.bits());
        self.registry.close_handle(ev.handle);
        Step::Orphan
    }
}
