//! Реестр портов и жизненный цикл / Port registry and lifecycle
//!
//! Неизменяемая таблица дескрипторов + параллельная таблица живых слотов.
//! Immutable descriptor table + a parallel table of live slots.
//!
//! Каждому handle'у, за которым следит диспетчер, соответствует ровно одна
//! запись `Binding` под стабильным `Cookie`. Ядро возвращает cookie вместе
//! с событием; указателей в ядро не уходит.
//! Every handle the dispatcher tracks has exactly one `Binding` under a stable
//! `Cookie`. The kernel hands the cookie back with each event; no pointers ever
//! cross into the kernel.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use libcuprum::ipc::{Ipc, PortFlags};
use libcuprum::{Cookie, Error, Handle, Result};
use log::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::services::closer::Pool;
use crate::services::echo::EchoState;

// ── Дескрипторы / Descriptors ────────────────────────────────────────────────

/// Поведение сервиса / Service behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Closer1,
    Closer2,
    Closer3,
    Connect,
    Datasink,
    Echo,
    Uuid,
}

impl ServiceKind {
    /// Приватное состояние порта при создании / Port private state at creation
    fn initial_state(self) -> PortState {
        match self {
            Self::Closer1 => PortState::Closer1 { conn_cnt: 0 },
            Self::Closer2 => PortState::Closer2 { conn_cnt: 0 },
            Self::Closer3 => PortState::Closer3 { pool: Pool::default() },
            Self::Connect | Self::Datasink | Self::Echo | Self::Uuid => PortState::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Суффикс имени после `{base}.srv.` / Name suffix after `{base}.srv.`
    pub name:     &'static str,
    pub msg_num:  u32,
    pub msg_size: usize,
    pub policy:   PortFlags,
    pub kind:     ServiceKind,
}

// ── Живое состояние / Live state ─────────────────────────────────────────────

#[derive(Debug)]
pub enum PortState {
    None,
    Closer1 { conn_cnt: u32 },
    Closer2 { conn_cnt: u32 },
    Closer3 { pool: Pool },
}

#[derive(Debug)]
pub struct Live {
    pub port:   Handle,
    pub cookie: Cookie,
    pub state:  PortState,
}

/// `None` — порт не открыт: ни handle'а, ни cookie, ни состояния.
/// `None` — port not open: no handle, no cookie, no state.
pub type Slot = Option<Live>;

/// Обработчик канала и его состояние / Channel handler with its state
#[derive(Debug)]
pub enum ChannelHandler {
    Datasink,
    Echo(Box<EchoState>),
}

/// Что делать с каналом после обработки события.
/// What to do with a channel after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFlow {
    Keep,
    Close,
}

#[derive(Debug)]
pub enum Binding {
    Port { handle: Handle, slot: usize },
    Channel { handle: Handle, handler: ChannelHandler },
}

impl Binding {
    pub fn handle(&self) -> Handle {
        match self {
            Self::Port { handle, .. } | Self::Channel { handle, .. } => *handle,
        }
    }
}

// ── Реестр / Registry ────────────────────────────────────────────────────────

pub struct Registry<I: Ipc> {
    ipc:         I,
    config:      ServiceConfig,
    descriptors: &'static [Descriptor],
    slots:       Vec<Slot>,
    bindings:    BTreeMap<Cookie, Binding>,
    next_cookie: u64,
}

impl<I: Ipc> Registry<I> {
    /// Пустой реестр: ни один порт ещё не открыт.
    /// Empty registry: no port is open yet.
    pub fn new(ipc: I, config: ServiceConfig, descriptors: &'static [Descriptor]) -> Self {
        let mut slots = Vec::with_capacity(descriptors.len());
        slots.resize_with(descriptors.len(), || None);
        Self {
            ipc,
            config,
            descriptors,
            slots,
            bindings: BTreeMap::new(),
            next_cookie: 1,
        }
    }

    pub fn ipc(&self) -> &I {
        &self.ipc
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn descriptor(&self, slot: usize) -> Option<&'static Descriptor> {
        self.descriptors.get(slot)
    }

    /// Слот по суффиксу имени / Slot by name suffix
    pub fn find(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.name == name)
    }

    pub fn live(&self, slot: usize) -> Option<&Live> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn port(&self, slot: usize) -> Option<Handle> {
        self.live(slot).map(|live| live.port)
    }

    pub fn state_mut(&mut self, slot: usize) -> Option<&mut PortState> {
        self.slots.get_mut(slot).and_then(Option::as_mut).map(|live| &mut live.state)
    }

    /// Привязанных каналов / Bound channels
    pub fn channel_count(&self) -> usize {
        self.bindings.values().filter(|b| matches!(b, Binding::Channel { .. })).count()
    }

    pub fn is_bound(&self, cookie: Cookie) -> bool {
        self.bindings.contains_key(&cookie)
    }

    fn mint(&mut self) -> Cookie {
        let cookie = Cookie(self.next_cookie);
        self.next_cookie += 1;
        cookie
    }

    // ── Жизненный цикл / Lifecycle ───────────────────────────────────────────

    /// Открыть порт слота и привязать к нему обработчик.
    /// Open the slot's port and bind its handler.
    ///
    /// При ошибке после создания порта всё созданное закрывается.
    /// On failure after the port exists everything made so far is released.
    pub fn create(&mut self, slot: usize) -> Result<()> {
        let desc = *self.descriptors.get(slot).ok_or(Error::InvalidArg)?;
        if self.slots[slot].is_some() {
            self.destroy(slot);
        }

        let path = self.config.service_path(desc.name);
        let port = self
            .ipc
            .port_create(&path, desc.msg_num, desc.msg_size, desc.policy)
            .map_err(|e| {
                info!("failed ({}) to create port {}", e, path);
                e
            })?;

        let cookie = self.mint();
        self.bindings.insert(cookie, Binding::Port { handle: port, slot });
        if let Err(e) = self.ipc.set_cookie(port, cookie) {
            info!("failed ({}) to set cookie on port {}", e, port);
            self.bindings.remove(&cookie);
            if let Err(e) = self.ipc.close(port) {
                warn!("failed ({}) to close port {}", e, port);
            }
            return Err(e);
        }

        self.slots[slot] = Some(Live { port, cookie, state: desc.kind.initial_state() });
        debug!("service {} up on port {}", desc.name, port);
        Ok(())
    }

    /// Закрыть порт слота. Повторный вызов безвреден.
    /// Tear the slot's port down. Calling it again is harmless.
    pub fn destroy(&mut self, slot: usize) {
        let Some(live) = self.slots.get_mut(slot).and_then(Option::take) else {
            debug!("slot {} already down", slot);
            return;
        };

        if let PortState::Closer3 { mut pool } = live.state {
            for (_, cookie) in pool.take() {
                self.close_channel(cookie);
            }
        }

        if let Err(e) = self.ipc.close(live.port) {
            info!("failed ({}) to close port {}", e, live.port);
        }
        self.bindings.remove(&live.cookie);
    }

    /// destroy + create из того же дескриптора / destroy + create from the same descriptor
    pub fn restart(&mut self, slot: usize) -> Result<()> {
        self.destroy(slot);
        self.create(slot)
    }

    /// Поднять все сервисы; при первой ошибке откатить уже поднятые.
    /// Bring every service up; on the first failure roll back those already up.
    pub fn create_all(&mut self) -> Result<()> {
        for slot in 0..self.slots.len() {
            if let Err(e) = self.create(slot) {
                error!("failed ({}) to create service {}", e, self.descriptors[slot].name);
                for done in (0..slot).rev() {
                    self.destroy(done);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Закрыть все порты и все оставшиеся каналы.
    /// Close every port and every remaining channel.
    pub fn destroy_all(&mut self) {
        debug!("terminating services");
        for slot in 0..self.slots.len() {
            self.destroy(slot);
        }
        let channels: Vec<Cookie> = self.bindings.keys().copied().collect();
        for cookie in channels {
            self.close_channel(cookie);
        }
    }

    // ── Каналы / Channels ────────────────────────────────────────────────────

    /// Передать канал обработчику. При ошибке канал закрывается.
    /// Hand a channel over to a handler. On failure the channel is closed.
    pub fn bind_channel(&mut self, handle: Handle, handler: ChannelHandler) -> Result<Cookie> {
        let cookie = self.mint();
        if let Err(e) = self.ipc.set_cookie(handle, cookie) {
            info!("failed ({}) to set cookie on chan {}", e, handle);
            drop(handler);
            self.close_handle(handle);
            return Err(e);
        }
        self.bindings.insert(cookie, Binding::Channel { handle, handler });
        Ok(cookie)
    }

    /// Закрыть канал, если он ещё привязан под этим cookie.
    /// Close a channel if it is still bound under this cookie.
    pub fn close_channel(&mut self, cookie: Cookie) -> bool {
        match self.bindings.remove(&cookie) {
            Some(Binding::Channel { handle, handler }) => {
                drop(handler);
                self.close_handle(handle);
                true
            }
            Some(port @ Binding::Port { .. }) => {
                self.bindings.insert(cookie, port);
                false
            }
            None => false,
        }
    }

    pub(crate) fn close_handle(&self, handle: Handle) {
        if let Err(e) = self.ipc.close(handle) {
            info!("failed ({}) to close handle {}", e, handle);
        }
    }

    // ── Доставка событий / Event delivery ────────────────────────────────────

    /// Найти порт по cookie события; handle обязан совпасть.
    /// Resolve a port binding for an event; the handle must match.
    pub(crate) fn port_slot(&self, cookie: Cookie, handle: Handle) -> Option<usize> {
        match self.bindings.get(&cookie) {
            Some(Binding::Port { handle: h, slot }) if *h == handle => Some(*slot),
            _ => None,
        }
    }

    /// Забрать привязку канала на время обработки.
    /// Take a channel binding out for the duration of a dispatch.
    pub(crate) fn take_channel(&mut self, cookie: Cookie, handle: Handle) -> Option<ChannelHandler> {
        match self.bindings.get(&cookie) {
            Some(Binding::Channel { handle: h, .. }) if *h == handle => {}
            _ => return None,
        }
        match self.bindings.remove(&cookie) {
            Some(Binding::Channel { handler, .. }) => Some(handler),
            _ => None,
        }
    }

    /// Вернуть привязку канала после обработки / Put a channel binding back after dispatch
    pub(crate) fn restore_channel(&mut self, cookie: Cookie, handle: Handle, handler: ChannelHandler) {
        self.bindings.insert(cookie, Binding::Channel { handle, handler });
    }
}
