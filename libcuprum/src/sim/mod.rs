//! Симулятор ядра в процессе / In-process kernel simulator
//!
//! Детерминированная модель IPC для тестов на хосте: задачи, порты с политикой
//! доступа, пары каналов с ограниченными очередями, передача handle'ов,
//! round-robin `wait_any` и симулированные часы.
//! Deterministic IPC model for host tests: tasks, ports with access policy,
//! channel pairs with bounded queues, handle transfer, round-robin `wait_any`
//! and a simulated clock.
//!
//! Модель однопоточная: если `wait` не находит события, вызывается idle-hook
//! (например, "клиент прочитал ответ"), иначе часы сдвигаются до таймаута и
//! возвращается `TimedOut`. Бесконечное ожидание без событий — тупик,
//! он тоже сообщается как `TimedOut`.
//! The model is single-threaded: when `wait` finds nothing, the idle hook runs
//! (e.g. "the client read its reply"); otherwise the clock jumps to the timeout
//! and `TimedOut` is returned. An infinite wait with nothing pending is a
//! deadlock and is reported as `TimedOut` as well.
//!
//! Размер сообщения при отправке не ограничивается; читатель сам сверяет
//! длину из `get_msg` со своим буфером.
//! Message size is not capped at send; readers check the `get_msg` length
//! against their own buffer.

mod object;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::ipc::{
    ConnectFlags, Event, Ipc, Message, MsgId, MsgInfo, PeerClass, PortFlags, MAX_MSG_HANDLES,
    MAX_PORT_BUF_NUM, MAX_PORT_BUF_SIZE, MAX_PORT_PATH_LEN,
};
use crate::time::{Timeout, MSEC};
use crate::{Cookie, Error, Handle, Result, Uuid};

use object::{ChanEnd, ObjId, ObjKind, Port, SimMsg, State, Task};

/// Цена одного вызова wait в симулированном времени.
/// Simulated time consumed by one wait call.
pub const WAIT_TICK: u64 = MSEC;

/// Задача симулятора / Simulated task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

type IdleHook = Box<dyn FnMut(&SimKernel)>;

#[derive(Default)]
pub struct SimKernel {
    state: RefCell<State>,
    idle_hook: RefCell<Option<IdleHook>>,
}

impl SimKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Создать задачу / Spawn a task
    pub fn spawn(&self, uuid: Uuid, class: PeerClass) -> TaskId {
        let mut st = self.state.borrow_mut();
        st.tasks.push(Task::new(uuid, class));
        TaskId(st.tasks.len() - 1)
    }

    /// Вид ядра со стороны задачи / The kernel as seen by a task
    pub fn task(&self, id: TaskId) -> SimTask<'_> {
        SimTask { kernel: self, id }
    }

    pub fn set_idle_hook(&self, hook: impl FnMut(&SimKernel) + 'static) {
        *self.idle_hook.borrow_mut() = Some(Box::new(hook));
    }

    pub fn clear_idle_hook(&self) {
        self.idle_hook.borrow_mut().take();
    }

    /// Однократно выставить ERROR на handle / Raise a one-shot ERROR on a handle
    pub fn inject_error(&self, task: TaskId, handle: Handle) -> Result<()> {
        let mut st = self.state.borrow_mut();
        let obj = slot_obj(&st, task, handle)?;
        match st.objects.get_mut(&obj).map(|o| &mut o.kind) {
            Some(ObjKind::Port(port)) => port.error = true,
            Some(ObjKind::Chan(end)) => end.error = true,
            None => return Err(Error::BadHandle),
        }
        Ok(())
    }

    /// Ограничить входящую очередь канала / Cap a channel's inbound queue
    pub fn set_recv_limit(&self, task: TaskId, handle: Handle, limit: usize) -> Result<()> {
        let mut st = self.state.borrow_mut();
        let obj = slot_obj(&st, task, handle)?;
        st.chan_mut(obj).ok_or(Error::BadHandle)?.recv_limit = limit;
        Ok(())
    }

    pub fn set_handle_limit(&self, task: TaskId, limit: usize) {
        self.state.borrow_mut().tasks[task.0].handle_limit = limit;
    }

    /// Все вызовы nanosleep задачи, нс / Every nanosleep of the task, ns
    pub fn sleeps(&self, task: TaskId) -> Vec<u64> {
        self.state.borrow().tasks[task.0].sleeps.clone()
    }

    pub fn handles(&self, task: TaskId) -> Vec<Handle> {
        self.state.borrow().tasks[task.0].handles.keys().copied().collect()
    }

    pub fn open_handles(&self, task: TaskId) -> usize {
        self.state.borrow().tasks[task.0].handles.len()
    }

    pub fn port_exists(&self, path: &str) -> bool {
        self.state.borrow().ports.contains_key(path)
    }

    /// Живых объектов (порты и концы каналов) / Live objects (ports and channel ends)
    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    /// Сообщений в очереди канала / Messages queued on a channel
    pub fn queued(&self, task: TaskId, handle: Handle) -> Result<usize> {
        let st = self.state.borrow();
        let obj = slot_obj(&st, task, handle)?;
        Ok(st.chan(obj).ok_or(Error::BadHandle)?.inbound.len())
    }

    pub fn clock(&self) -> u64 {
        self.state.borrow().clock
    }

    fn run_idle_hook(&self) -> bool {
        let hook = self.idle_hook.borrow_mut().take();
        let Some(mut hook) = hook else { return false };
        hook(self);
        let mut slot = self.idle_hook.borrow_mut();
        if slot.is_none() {
            *slot = Some(hook);
        }
        true
    }

    fn expire(&self, timeout: Timeout) -> Error {
        if let Timeout::After(d) = timeout {
            let ns = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
            let mut st = self.state.borrow_mut();
            st.clock = st.clock.saturating_add(ns);
        }
        Error::TimedOut
    }
}

fn slot_obj(st: &State, task: TaskId, handle: Handle) -> Result<ObjId> {
    st.tasks
        .get(task.0)
        .and_then(|t| t.handles.get(&handle))
        .map(|slot| slot.obj)
        .ok_or(Error::BadHandle)
}

/// Событие handle'а, если есть; однократные биты сбрасываются.
/// Event on a handle if any; one-shot bits are consumed.
fn poll(st: &mut State, task: TaskId, handle: Handle) -> Option<Event> {
    let (obj, cookie) = st.tasks[task.0].handles.get(&handle).map(|s| (s.obj, s.cookie))?;
    let mask = st.events(obj);
    if mask.is_empty() {
        return None;
    }
    st.consume_edges(obj);
    Some(Event { handle, mask, cookie })
}

/// Handle ядра для одной задачи / The kernel handle of one task
#[derive(Clone, Copy)]
pub struct SimTask<'k> {
    kernel: &'k SimKernel,
    id: TaskId,
}

impl<'k> SimTask<'k> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.kernel.state.borrow().tasks[self.id.0].uuid
    }

    pub fn kernel(&self) -> &'k SimKernel {
        self.kernel
    }

    fn state(&self) -> core::cell::RefMut<'k, State> {
        self.kernel.state.borrow_mut()
    }

    fn chan_obj(&self, st: &State, chan: Handle) -> Result<ObjId> {
        let obj = slot_obj(st, self.id, chan)?;
        st.chan(obj).map(|_| obj).ok_or(Error::BadHandle)
    }
}

impl Ipc for SimTask<'_> {
    fn port_create(&self, path: &str, num_bufs: u32, buf_size: usize, flags: PortFlags)
        -> Result<Handle>
    {
        if path.is_empty() || path.len() >= MAX_PORT_PATH_LEN {
            return Err(Error::InvalidArg);
        }
        if num_bufs == 0 || num_bufs > MAX_PORT_BUF_NUM || buf_size == 0 || buf_size > MAX_PORT_BUF_SIZE {
            return Err(Error::InvalidArg);
        }
        let mut st = self.state();
        if st.ports.contains_key(path) {
            return Err(Error::AlreadyExists);
        }
        if !st.tasks[self.id.0].has_room(1) {
            return Err(Error::NoResources);
        }
        let port = Port {
            path: String::from(path),
            num_bufs,
            flags,
            pending: Default::default(),
            error: false,
        };
        let obj = st.insert(ObjKind::Port(port), 1);
        st.ports.insert(String::from(path), obj);

        // подключить тех, кто ждал этот порт / attach connects waiting for this port
        let waiting: Vec<ObjId> = st
            .objects
            .iter()
            .filter_map(|(&id, o)| match &o.kind {
                ObjKind::Chan(end) if end.waiting_for.as_deref() == Some(path) => Some(id),
                _ => None,
            })
            .collect();
        for client in waiting {
            let owner = st.tasks.iter().find(|t| t.handles.values().any(|s| s.obj == client));
            let Some((uuid, class)) = owner.map(|t| (t.uuid, t.class)) else { continue };
            if class.admitted_by(flags) {
                st.link(obj, client, uuid);
            } else if let Some(end) = st.chan_mut(client) {
                end.waiting_for = None;
                end.hup = true;
            }
        }

        Ok(st.install(self.id.0, obj))
    }

    fn connect(&self, path: &str, flags: ConnectFlags) -> Result<Handle> {
        let mut st = self.state();
        let task = &st.tasks[self.id.0];
        if !task.has_room(1) {
            return Err(Error::NoResources);
        }
        let (uuid, class) = (task.uuid, task.class);
        let client = ChanEnd {
            async_connect: flags.contains(ConnectFlags::ASYNC),
            ..ChanEnd::default()
        };
        match st.ports.get(path).copied() {
            Some(port_obj) => {
                let allowed = match st.objects.get(&port_obj).map(|o| &o.kind) {
                    Some(ObjKind::Port(port)) => class.admitted_by(port.flags),
                    _ => false,
                };
                if !allowed {
                    return Err(Error::NoPermission);
                }
                let client = st.insert(ObjKind::Chan(client), 1);
                st.link(port_obj, client, uuid);
                Ok(st.install(self.id.0, client))
            }
            None if flags.contains(ConnectFlags::WAIT_FOR_PORT) => {
                let client = ChanEnd { waiting_for: Some(String::from(path)), ..client };
                let client = st.insert(ObjKind::Chan(client), 1);
                Ok(st.install(self.id.0, client))
            }
            None => Err(Error::NotFound),
        }
    }

    fn accept(&self, port: Handle) -> Result<(Handle, Uuid)> {
        let mut st = self.state();
        let port_obj = slot_obj(&st, self.id, port)?;
        if !st.tasks[self.id.0].has_room(1) {
            return Err(Error::NoResources);
        }
        let server = st
            .port_mut(port_obj)
            .ok_or(Error::BadHandle)?
            .pending
            .pop_front()
            .ok_or(Error::NoMsg)?;
        let Some(client) = st.chan(server).and_then(|end| end.peer) else {
            // клиент ушёл до accept / client left before accept
            st.release(server);
            return Err(Error::ChannelClosed);
        };
        if let Some(end) = st.chan_mut(client) {
            end.connected = true;
            end.ready_pending = end.async_connect;
        }
        let end = st.chan_mut(server).ok_or(Error::BadState)?;
        end.connected = true;
        let peer_uuid = end.peer_uuid;
        Ok((st.install(self.id.0, server), peer_uuid))
    }

    fn close(&self, handle: Handle) -> Result<()> {
        let mut st = self.state();
        let task = &mut st.tasks[self.id.0];
        let slot = task.handles.remove(&handle).ok_or(Error::BadHandle)?;
        st.release(slot.obj);
        Ok(())
    }

    fn set_cookie(&self, handle: Handle, cookie: Cookie) -> Result<()> {
        let mut st = self.state();
        let slot = st.tasks[self.id.0].handles.get_mut(&handle).ok_or(Error::BadHandle)?;
        slot.cookie = Some(cookie);
        Ok(())
    }

    fn wait(&self, handle: Handle, timeout: Timeout) -> Result<Event> {
        {
            let mut st = self.state();
            slot_obj(&st, self.id, handle)?;
            st.clock += WAIT_TICK;
            if let Some(ev) = poll(&mut st, self.id, handle) {
                return Ok(ev);
            }
        }
        if self.kernel.run_idle_hook() {
            let mut st = self.state();
            if let Some(ev) = poll(&mut st, self.id, handle) {
                return Ok(ev);
            }
        }
        Err(self.kernel.expire(timeout))
    }

    fn wait_any(&self, timeout: Timeout) -> Result<Event> {
        let scan = |st: &mut State| -> Option<Event> {
            let task = &st.tasks[self.id.0];
            let cursor = task.cursor;
            let order: Vec<Handle> = task
                .handles
                .keys()
                .copied()
                .filter(|&h| cursor.map_or(true, |c| h > c))
                .chain(task.handles.keys().copied().filter(|&h| cursor.map_or(false, |c| h <= c)))
                .collect();
            let ev = order.into_iter().find_map(|h| poll(st, self.id, h))?;
            st.tasks[self.id.0].cursor = Some(ev.handle);
            Some(ev)
        };
        {
            let mut st = self.state();
            if st.tasks[self.id.0].handles.is_empty() {
                return Err(Error::NotFound);
            }
            st.clock += WAIT_TICK;
            if let Some(ev) = scan(&mut st) {
                return Ok(ev);
            }
        }
        if self.kernel.run_idle_hook() {
            if let Some(ev) = scan(&mut self.state()) {
                return Ok(ev);
            }
        }
        Err(self.kernel.expire(timeout))
    }

    fn send_msg(&self, chan: Handle, msg: &Message<'_>) -> Result<usize> {
        if msg.handles.len() > MAX_MSG_HANDLES {
            return Err(Error::InvalidArg);
        }
        let mut st = self.state();
        let obj = self.chan_obj(&st, chan)?;
        let end = st.chan(obj).ok_or(Error::BadHandle)?;
        if end.hup {
            return Err(Error::ChannelClosed);
        }
        let peer = match end.peer {
            Some(peer) if end.connected => peer,
            _ => return Err(Error::BadState),
        };
        let full = st.chan(peer).map_or(true, |p| p.inbound.len() >= p.recv_limit);
        if full {
            if let Some(end) = st.chan_mut(obj) {
                end.send_blocked = true;
            }
            return Err(Error::NotEnoughBuffer);
        }
        let carried = msg
            .handles
            .iter()
            .map(|&h| slot_obj(&st, self.id, h))
            .collect::<Result<Vec<ObjId>>>()?;
        for &o in &carried {
            st.retain(o);
        }
        st.next_msg += 1;
        let id = st.next_msg;
        if let Some(p) = st.chan_mut(peer) {
            p.inbound.push_back(SimMsg {
                id,
                data: msg.payload.to_vec(),
                handles: carried,
                gotten: false,
            });
        }
        Ok(msg.payload.len())
    }

    fn get_msg(&self, chan: Handle) -> Result<MsgInfo> {
        let mut st = self.state();
        let obj = self.chan_obj(&st, chan)?;
        let end = st.chan_mut(obj).ok_or(Error::BadHandle)?;
        let msg = end.inbound.iter_mut().find(|m| !m.gotten).ok_or(Error::NoMsg)?;
        msg.gotten = true;
        Ok(MsgInfo { id: MsgId(msg.id), len: msg.data.len(), num_handles: msg.handles.len() })
    }

    fn read_msg(
        &self,
        chan: Handle,
        id: MsgId,
        offset: usize,
        buf: &mut [u8],
        handles: &mut [Handle],
    ) -> Result<usize> {
        let mut st = self.state();
        let obj = self.chan_obj(&st, chan)?;
        let end = st.chan(obj).ok_or(Error::BadHandle)?;
        let msg = end
            .inbound
            .iter()
            .find(|m| m.id == id.0 && m.gotten)
            .ok_or(Error::InvalidArg)?;
        if offset > msg.data.len() || handles.len() < msg.handles.len() {
            return Err(Error::InvalidArg);
        }
        let n = buf.len().min(msg.data.len() - offset);
        buf[..n].copy_from_slice(&msg.data[offset..offset + n]);
        let carried = msg.handles.clone();
        if !st.tasks[self.id.0].has_room(carried.len()) {
            return Err(Error::NoResources);
        }
        for (slot, o) in handles.iter_mut().zip(carried) {
            st.retain(o);
            *slot = st.install(self.id.0, o);
        }
        Ok(n)
    }

    fn put_msg(&self, chan: Handle, id: MsgId) -> Result<()> {
        let mut st = self.state();
        let obj = self.chan_obj(&st, chan)?;
        let end = st.chan_mut(obj).ok_or(Error::BadHandle)?;
        let pos = end
            .inbound
            .iter()
            .position(|m| m.id == id.0 && m.gotten)
            .ok_or(Error::InvalidArg)?;
        let msg = end.inbound.remove(pos).ok_or(Error::InvalidArg)?;
        let sender = end.peer;
        for o in msg.handles {
            st.release(o);
        }
        if let Some(sender) = sender.and_then(|s| st.chan_mut(s)) {
            if sender.send_blocked {
                sender.send_blocked = false;
                sender.send_unblocked = true;
            }
        }
        Ok(())
    }

    fn nanosleep(&self, ns: u64) -> Result<()> {
        let mut st = self.state();
        st.clock = st.clock.saturating_add(ns);
        st.tasks[self.id.0].sleeps.push(ns);
        Ok(())
    }

    fn now(&self) -> Result<u64> {
        Ok(self.state().clock)
    }
}
