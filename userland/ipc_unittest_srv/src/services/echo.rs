//! echo — возвращает каждое сообщение отправителю
//! echo — sends every message back to its sender
//!
//! За одно событие канал вычитывается не больше чем на `msg_num` сообщений,
//! затем всё прочитанное отправляется обратно в исходном порядке вместе с
//! переданными handle'ами. Если очередь клиента полна, отправка ждёт
//! SEND_UNBLOCKED не дольше `send_timeout`.
//! Per event the channel is drained of at most `msg_num` messages, then
//! everything read is sent back in arrival order with any attached handles.
//! When the client queue is full the send waits for SEND_UNBLOCKED for at
//! most `send_timeout`.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::time::Duration;

use libcuprum::ipc::{Event, EventMask, Ipc, Message, MAX_MSG_HANDLES};
use libcuprum::time::Timeout;
use libcuprum::{Error, Handle, Result};
use log::{debug, info, warn};

use crate::config::{nanos, ServiceConfig};
use crate::registry::{ChannelFlow, ChannelHandler, Descriptor, Registry};

// ── Состояние канала / Channel state ─────────────────────────────────────────

/// Одно сохранённое сообщение / One stored message
#[derive(Debug)]
pub struct EchoMsg {
    buf:        Vec<u8>,
    len:        usize,
    handles:    [Handle; MAX_MSG_HANDLES],
    handle_cnt: usize,
}

impl EchoMsg {
    fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn handles(&self) -> &[Handle] {
        &self.handles[..self.handle_cnt]
    }
}

#[derive(Debug)]
pub struct EchoState {
    msgs: Vec<EchoMsg>,
}

impl EchoState {
    /// `msg_num` слотов по `msg_size` байт; `NoMemory`, если куча не дала.
    /// `msg_num` slots of `msg_size` bytes each; `NoMemory` if the heap refuses.
    pub fn try_new(msg_num: usize, msg_size: usize) -> Result<Self> {
        let mut msgs = Vec::new();
        msgs.try_reserve_exact(msg_num).map_err(|_| Error::NoMemory)?;
        for _ in 0..msg_num {
            let mut buf = Vec::new();
            buf.try_reserve_exact(msg_size).map_err(|_| Error::NoMemory)?;
            buf.resize(msg_size, 0);
            msgs.push(EchoMsg {
                buf,
                len: 0,
                handles: [Handle::INVALID; MAX_MSG_HANDLES],
                handle_cnt: 0,
            });
        }
        Ok(Self { msgs })
    }

    pub fn capacity(&self) -> usize {
        self.msgs.len()
    }
}

// ── Отправка с ожиданием / Send with wait ────────────────────────────────────

/// Состояния отправки / Send states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Sending,
    /// Очередь клиента полна; ждём SEND_UNBLOCKED до `deadline` (нс)
    /// Client queue is full; waiting for SEND_UNBLOCKED until `deadline` (ns)
    WaitingForUnblock { deadline: u64 },
    Done(usize),
    Failed(Error),
}

/// Отправить, дожидаясь места в очереди клиента не дольше `limit`.
/// Send, waiting at most `limit` for room in the client queue.
pub fn send_msg_wait<I: Ipc>(ipc: &I, chan: Handle, msg: &Message<'_>, limit: Duration) -> Result<usize> {
    let mut state = SendState::Sending;
    loop {
        state = match state {
            SendState::Sending => try_send(ipc, chan, msg, limit),
            SendState::WaitingForUnblock { deadline } => wait_unblock(ipc, chan, deadline),
            SendState::Done(n) => return Ok(n),
            SendState::Failed(e) => return Err(e),
        };
    }
}

fn try_send<I: Ipc>(ipc: &I, chan: Handle, msg: &Message<'_>, limit: Duration) -> SendState {
    match ipc.send_msg(chan, msg) {
        Ok(n) => SendState::Done(n),
        Err(Error::NotEnoughBuffer) => match ipc.now() {
            Ok(now) => SendState::WaitingForUnblock { deadline: now.saturating_add(nanos(limit)) },
            Err(e) => SendState::Failed(e),
        },
        Err(e) => SendState::Failed(e),
    }
}

fn wait_unblock<I: Ipc>(ipc: &I, chan: Handle, deadline: u64) -> SendState {
    let now = match ipc.now() {
        Ok(now) => now,
        Err(e) => return SendState::Failed(e),
    };
    let Some(timeout) = Timeout::until(deadline, now) else {
        return SendState::Failed(Error::TimedOut);
    };
    match ipc.wait(chan, timeout) {
        Err(e) => SendState::Failed(e),
        Ok(ev) if ev.mask.contains(EventMask::HUP) => {
            if ev.mask.contains(EventMask::MSG) {
                warn!("client sent a message and hung up; message discarded");
            }
            SendState::Failed(Error::ChannelClosed)
        }
        Ok(ev) if ev.mask.contains(EventMask::SEND_UNBLOCKED) => SendState::Sending,
        // только MSG: продолжаем ждать / MSG only: keep waiting
        Ok(_) => SendState::WaitingForUnblock { deadline },
    }
}

// ── Обработчики / Handlers ───────────────────────────────────────────────────

fn close_all<I: Ipc>(ipc: &I, msgs: &[EchoMsg]) {
    for &h in msgs.iter().flat_map(EchoMsg::handles) {
        if let Err(e) = ipc.close(h) {
            debug!("failed ({}) to close handle {}", e, h);
        }
    }
}

/// Прочитать следующее сообщение в слот / Read the next message into a slot
fn read_one<I: Ipc>(ipc: &I, chan: Handle, slot: &mut EchoMsg) -> Result<Option<()>> {
    let info = match ipc.get_msg(chan) {
        Ok(info) => info,
        Err(Error::NoMsg) => return Ok(None),
        Err(e) => {
            info!("failed ({}) to get_msg for chan ({})", e, chan);
            return Err(e);
        }
    };
    if info.len > slot.buf.len() || info.num_handles > MAX_MSG_HANDLES {
        info!("message of {} bytes and {} handles does not fit on chan ({})",
              info.len, info.num_handles, chan);
        return Err(Error::TooBig);
    }

    let n = ipc
        .read_msg(chan, info.id, 0, &mut slot.buf, &mut slot.handles[..info.num_handles])
        .map_err(|e| {
            info!("failed ({}) to read_msg for chan ({})", e, chan);
            e
        })?;
    slot.len = n;
    slot.handle_cnt = info.num_handles;

    ipc.put_msg(chan, info.id).map_err(|e| {
        info!("failed ({}) to put_msg for chan ({})", e, chan);
        e
    })?;
    Ok(Some(()))
}

fn echo_msgs<I: Ipc>(ipc: &I, cfg: &ServiceConfig, chan: Handle, st: &mut EchoState) -> Result<()> {
    // вычитать / drain
    let mut cnt = 0;
    while cnt < st.msgs.len() {
        st.msgs[cnt].handle_cnt = 0;
        match read_one(ipc, chan, &mut st.msgs[cnt]) {
            Ok(Some(())) => cnt += 1,
            Ok(None) => break,
            Err(e) => {
                // handle'ы частично прочитанного слота тоже наши
                // handles of a partly read slot are ours too
                close_all(ipc, &st.msgs[..=cnt]);
                return Err(e);
            }
        }
    }

    // отправить обратно / send back
    for i in 0..cnt {
        let m = &st.msgs[i];
        let rc = send_msg_wait(ipc, chan, &Message::with_handles(m.payload(), m.handles()), cfg.send_timeout);
        close_all(ipc, core::slice::from_ref(m));
        if let Err(e) = rc {
            info!("failed ({}) to send_msg for chan ({})", e, chan);
            close_all(ipc, &st.msgs[i + 1..cnt]);
            return Err(e);
        }
    }
    Ok(())
}

pub fn handle_chan<I: Ipc>(ipc: &I, cfg: &ServiceConfig, ev: &Event, st: &mut EchoState) -> ChannelFlow {
    if ev.mask.contains(EventMask::ERROR) {
        info!("error event ({:#x}) for chan ({})", ev.mask.bits(), ev.handle);
        return ChannelFlow::Close;
    }

    if ev.mask.intersects(EventMask::MSG | EventMask::SEND_UNBLOCKED) && echo_msgs(ipc, cfg, ev.handle, st).is_err() {
        info!("error event ({:#x}) for chan ({})", ev.mask.bits(), ev.handle);
        return ChannelFlow::Close;
    }

    if ev.mask.contains(EventMask::HUP) {
        return ChannelFlow::Close;
    }

    ChannelFlow::Keep
}

pub fn handle_port<I: Ipc>(reg: &mut Registry<I>, desc: &Descriptor, ev: &Event) {
    if !ev.mask.contains(EventMask::READY) {
        return;
    }

    let chan = match reg.ipc().accept(ev.handle) {
        Ok((chan, _)) => chan,
        Err(e) => {
            info!("failed ({}) to accept on port {}", e, ev.handle);
            return;
        }
    };

    let st = match EchoState::try_new(desc.msg_num as usize, desc.msg_size) {
        Ok(st) => st,
        Err(e) => {
            info!("failed ({}) to allocate state for chan {}", e, chan);
            reg.close_handle(chan);
            return;
        }
    };
    // при ошибке bind_channel сам закрывает канал и освобождает состояние
    // bind_channel closes the channel and drops the state itself on failure
    let _ = reg.bind_channel(chan, ChannelHandler::Echo(Box::new(st)));
}
