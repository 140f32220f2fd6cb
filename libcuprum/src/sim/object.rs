//! Объекты симулятора / Simulator objects
//!
//! Порты и концы каналов со счётчиком ссылок: ссылку держит каждый handle,
//! очередь ожидающих соединений и каждое сообщение, которое переносит объект.
//! Ref-counted ports and channel ends: a reference is held by every handle,
//! by the pending-connection queue and by every message carrying the object.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;

use crate::ipc::{EventMask, PeerClass, PortFlags, MAX_USER_HANDLES};
use crate::{Cookie, Handle, Uuid};

pub(super) type ObjId = u64;

pub(super) struct Object {
    pub refs: usize,
    pub kind: ObjKind,
}

pub(super) enum ObjKind {
    Port(Port),
    Chan(ChanEnd),
}

pub(super) struct Port {
    pub path: String,
    pub num_bufs: u32,
    pub flags: PortFlags,
    /// Серверные концы, ждущие accept / Server ends waiting for accept
    pub pending: VecDeque<ObjId>,
    pub error: bool,
}

#[derive(Default)]
pub(super) struct ChanEnd {
    pub peer: Option<ObjId>,
    /// Путь порта, которого ждёт connect / Port path a connect is waiting for
    pub waiting_for: Option<String>,
    pub connected: bool,
    pub async_connect: bool,
    pub ready_pending: bool,
    pub hup: bool,
    pub send_blocked: bool,
    pub send_unblocked: bool,
    pub error: bool,
    pub inbound: VecDeque<SimMsg>,
    pub recv_limit: usize,
    /// UUID клиента (на серверном конце) / Client UUID (on the server end)
    pub peer_uuid: Uuid,
}

pub(super) struct SimMsg {
    pub id: u32,
    pub data: Vec<u8>,
    pub handles: Vec<ObjId>,
    pub gotten: bool,
}

pub(super) struct Slot {
    pub obj: ObjId,
    pub cookie: Option<Cookie>,
}

pub(super) struct Task {
    pub uuid: Uuid,
    pub class: PeerClass,
    pub handles: BTreeMap<Handle, Slot>,
    /// Последний handle, отданный wait_any / Last handle returned by wait_any
    pub cursor: Option<Handle>,
    pub handle_limit: usize,
    pub sleeps: Vec<u64>,
}

impl Task {
    pub fn new(uuid: Uuid, class: PeerClass) -> Self {
        Self {
            uuid,
            class,
            handles: BTreeMap::new(),
            cursor: None,
            handle_limit: MAX_USER_HANDLES,
            sleeps: Vec::new(),
        }
    }

    pub fn has_room(&self, extra: usize) -> bool {
        self.handles.len() + extra <= self.handle_limit
    }
}

#[derive(Default)]
pub(super) struct State {
    pub objects: BTreeMap<ObjId, Object>,
    pub ports: BTreeMap<String, ObjId>,
    pub tasks: Vec<Task>,
    pub next_obj: ObjId,
    pub next_handle: i32,
    pub next_msg: u32,
    pub clock: u64,
}

impl State {
    pub fn insert(&mut self, kind: ObjKind, refs: usize) -> ObjId {
        self.next_obj += 1;
        let id = self.next_obj;
        self.objects.insert(id, Object { refs, kind });
        id
    }

    pub fn install(&mut self, task: usize, obj: ObjId) -> Handle {
        let handle = Handle(Handle::USER_BASE + self.next_handle);
        self.next_handle += 1;
        self.tasks[task].handles.insert(handle, Slot { obj, cookie: None });
        handle
    }

    pub fn retain(&mut self, obj: ObjId) {
        if let Some(o) = self.objects.get_mut(&obj) {
            o.refs += 1;
        }
    }

    pub fn chan(&self, obj: ObjId) -> Option<&ChanEnd> {
        match self.objects.get(&obj).map(|o| &o.kind) {
            Some(ObjKind::Chan(end)) => Some(end),
            _ => None,
        }
    }

    pub fn chan_mut(&mut self, obj: ObjId) -> Option<&mut ChanEnd> {
        match self.objects.get_mut(&obj).map(|o| &mut o.kind) {
            Some(ObjKind::Chan(end)) => Some(end),
            _ => None,
        }
    }

    pub fn port_mut(&mut self, obj: ObjId) -> Option<&mut Port> {
        match self.objects.get_mut(&obj).map(|o| &mut o.kind) {
            Some(ObjKind::Port(port)) => Some(port),
            _ => None,
        }
    }

    /// Отпустить ссылку; при нуле — уничтожить объект и всё, что он держал.
    /// Drop a reference; at zero destroy the object and whatever it held.
    pub fn release(&mut self, obj: ObjId) {
        let mut work = alloc::vec![obj];
        while let Some(id) = work.pop() {
            let Some(o) = self.objects.get_mut(&id) else { continue };
            o.refs = o.refs.saturating_sub(1);
            if o.refs > 0 {
                continue;
            }
            let Some(o) = self.objects.remove(&id) else { continue };
            match o.kind {
                ObjKind::Port(port) => {
                    if self.ports.get(&port.path) == Some(&id) {
                        self.ports.remove(&port.path);
                    }
                    work.extend(port.pending);
                }
                ObjKind::Chan(end) => {
                    if let Some(peer) = end.peer.and_then(|p| self.chan_mut(p)) {
                        peer.peer = None;
                        peer.hup = true;
                        peer.send_blocked = false;
                    }
                    for msg in end.inbound {
                        work.extend(msg.handles);
                    }
                }
            }
        }
    }

    /// Создать серверный конец и поставить его в очередь порта.
    /// Create the server end and queue it on the port.
    pub fn link(&mut self, port_obj: ObjId, client: ObjId, client_uuid: Uuid) {
        let Some(port) = self.port_mut(port_obj) else { return };
        let limit = port.num_bufs as usize;
        let server = ChanEnd {
            peer: Some(client),
            recv_limit: limit,
            peer_uuid: client_uuid,
            ..ChanEnd::default()
        };
        let server = self.insert(ObjKind::Chan(server), 1);
        if let Some(port) = self.port_mut(port_obj) {
            port.pending.push_back(server);
        }
        if let Some(end) = self.chan_mut(client) {
            end.peer = Some(server);
            end.waiting_for = None;
            end.recv_limit = limit;
        }
    }

    /// Текущие события объекта / Current events of an object
    pub fn events(&self, obj: ObjId) -> EventMask {
        let mut mask = EventMask::empty();
        match self.objects.get(&obj).map(|o| &o.kind) {
            Some(ObjKind::Port(port)) => {
                mask.set(EventMask::READY, !port.pending.is_empty());
                mask.set(EventMask::ERROR, port.error);
            }
            Some(ObjKind::Chan(end)) => {
                mask.set(EventMask::READY, end.ready_pending);
                mask.set(EventMask::MSG, end.inbound.iter().any(|m| !m.gotten));
                mask.set(EventMask::HUP, end.hup);
                mask.set(EventMask::SEND_UNBLOCKED, end.send_unblocked);
                mask.set(EventMask::ERROR, end.error);
            }
            None => {}
        }
        mask
    }

    /// Сбросить однократные события после доставки.
    /// Clear one-shot events once delivered.
    pub fn consume_edges(&mut self, obj: ObjId) {
        match self.objects.get_mut(&obj).map(|o| &mut o.kind) {
            Some(ObjKind::Port(port)) => port.error = false,
            Some(ObjKind::Chan(end)) => {
                end.ready_pending = false;
                end.send_unblocked = false;
                end.error = false;
            }
            None => {}
        }
    }
}
