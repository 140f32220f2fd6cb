//! IPC — Inter-Process Communication API
//!
//! Обёртки над ipc_* syscall'ами.
//! Wrappers over ipc_* syscalls.
//!
//! Примитивы / Primitives:
//!   Port    — именованная точка рандеву, превращает connect в канал
//!             named rendezvous point, turns connect requests into channels
//!   Channel — двунаправленный канал дискретных сообщений
//!             bidirectional discrete-message connection
//!   Wait    — единственный блокирующий вызов / the one blocking call

use bitflags::bitflags;

use crate::time::Timeout;
use crate::{Cookie, Handle, Result, Uuid};

/// Максимум handle'ов в одном сообщении.
/// Max handles carried by one message.
pub const MAX_MSG_HANDLES: usize = 8;

/// Максимум handle'ов на задачу / Max handles per task
pub const MAX_USER_HANDLES: usize = 64;

/// Максимальная длина имени порта / Max port path length
pub const MAX_PORT_PATH_LEN: usize = 64;

/// Лимиты буферов порта / Per-port buffer limits
pub const MAX_PORT_BUF_NUM: u32 = 32;
pub const MAX_PORT_BUF_SIZE: usize = 4096;

bitflags! {
    /// Маска событий handle'а / Handle event mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventMask: u32 {
        /// Порт: есть входящее соединение. Канал: соединение установлено.
        /// Port: connection pending. Channel: connection established.
        const READY          = 0x01;
        const ERROR          = 0x02;
        /// Другая сторона закрыла канал / Peer closed the channel
        const HUP            = 0x04;
        const MSG            = 0x08;
        /// Очередь получателя освободилась после NotEnoughBuffer.
        /// Peer queue drained after a NotEnoughBuffer send.
        const SEND_UNBLOCKED = 0x10;
    }
}

bitflags! {
    /// Кто может подключаться к порту / Who may connect to a port
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortFlags: u32 {
        /// Недоверенные клиенты из обычного мира / Untrusted system callers
        const ALLOW_NS_CONNECT = 0x1;
        /// Доверенные приложения / Trusted applications
        const ALLOW_TA_CONNECT = 0x2;
        const ALLOW_ALL = Self::ALLOW_NS_CONNECT.bits() | Self::ALLOW_TA_CONNECT.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConnectFlags: u32 {
        /// Не ждать accept, сообщить READY событием.
        /// Don't wait for accept, report READY as an event.
        const ASYNC         = 0x1;
        /// Ждать появления порта вместо NotFound.
        /// Wait for the port to appear instead of failing with NotFound.
        const WAIT_FOR_PORT = 0x2;
    }
}

/// Класс подключающейся стороны / Class of the connecting peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerClass {
    NonSecure,
    TrustedApp,
}

impl PeerClass {
    /// Разрешает ли политика порта подключение этого класса.
    /// Whether a port policy admits this class.
    pub fn admitted_by(self, policy: PortFlags) -> bool {
        match self {
            Self::NonSecure => policy.contains(PortFlags::ALLOW_NS_CONNECT),
            Self::TrustedApp => policy.contains(PortFlags::ALLOW_TA_CONNECT),
        }
    }
}

/// Событие из wait / Event delivered by wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub handle: Handle,
    pub mask: EventMask,
    pub cookie: Option<Cookie>,
}

impl Event {
    pub const NONE: Event = Event {
        handle: Handle::INVALID,
        mask: EventMask::empty(),
        cookie: None,
    };
}

/// Идентификатор сообщения в очереди канала.
/// Message id within a channel queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsgId(pub u32);

/// Метаданные очередного сообщения / Next message metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgInfo {
    pub id: MsgId,
    pub len: usize,
    pub num_handles: usize,
}

/// Исходящее сообщение / Outgoing message
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub payload: &'a [u8],
    pub handles: &'a [Handle],
}

impl<'a> Message<'a> {
    pub const fn new(payload: &'a [u8]) -> Self {
        Self { payload, handles: &[] }
    }

    pub const fn with_handles(payload: &'a [u8], handles: &'a [Handle]) -> Self {
        Self { payload, handles }
    }
}

/// Поверхность ядра, которую видит задача.
/// The kernel surface a task sees.
///
/// Все вызовы неблокирующие, кроме `wait`, `wait_any` и `nanosleep`.
/// Every call is non-blocking except `wait`, `wait_any` and `nanosleep`.
pub trait Ipc {
    /// Создать порт / Create a port
    fn port_create(&self, path: &str, num_bufs: u32, buf_size: usize, flags: PortFlags)
        -> Result<Handle>;

    fn connect(&self, path: &str, flags: ConnectFlags) -> Result<Handle>;

    /// Принять соединение: канал + UUID клиента.
    /// Accept a connection: channel + peer UUID.
    fn accept(&self, port: Handle) -> Result<(Handle, Uuid)>;

    fn close(&self, handle: Handle) -> Result<()>;

    fn set_cookie(&self, handle: Handle, cookie: Cookie) -> Result<()>;

    /// Ждать событие на одном handle'е / Wait for an event on one handle
    fn wait(&self, handle: Handle, timeout: Timeout) -> Result<Event>;

    /// Ждать событие на любом handle'е задачи.
    /// Wait for an event on any handle of the task.
    fn wait_any(&self, timeout: Timeout) -> Result<Event>;

    /// Отправить; `NotEnoughBuffer`, если очередь получателя полна.
    /// Send; `NotEnoughBuffer` when the receiver queue is full.
    fn send_msg(&self, chan: Handle, msg: &Message<'_>) -> Result<usize>;

    /// Следующее непрочитанное сообщение / Next unread message
    fn get_msg(&self, chan: Handle) -> Result<MsgInfo>;

    /// Скопировать тело и получить переданные handle'ы.
    /// Copy the payload out and take delivery of attached handles.
    fn read_msg(
        &self,
        chan: Handle,
        id: MsgId,
        offset: usize,
        buf: &mut [u8],
        handles: &mut [Handle],
    ) -> Result<usize>;

    /// Освободить сообщение / Retire a message
    fn put_msg(&self, chan: Handle, id: MsgId) -> Result<()>;

    fn nanosleep(&self, ns: u64) -> Result<()>;

    /// Текущее время ядра, нс / Kernel clock, ns
    fn now(&self) -> Result<u64>;
}
