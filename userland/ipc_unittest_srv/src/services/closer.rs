//! Closer'ы — агрессивная смена соединений / aggressive connection churn
//!
//! closer1: принять и сразу закрыть.
//! closer2: не принимать, перезапустить свой порт.
//! closer3: копить 4 канала, затем закрыть все разом.
//! closer1: accept and close at once.
//! closer2: never accept, restart its own port.
//! closer3: collect 4 channels, then close them all together.

use libcuprum::ipc::{Event, EventMask, Ipc};
use libcuprum::{Cookie, Handle};
use log::info;

use crate::config::nanos;
use crate::registry::{ChannelHandler, PortState, Registry};

/// Ёмкость пула closer3 / closer3 pool capacity
pub const POOL_LEN: usize = 4;

/// Пул каналов closer3. Cookie рядом с handle'ом отличает канал, который
/// ещё привязан, от уже закрытого datasink'ом.
/// closer3 channel pool. The cookie next to each handle tells a channel that
/// is still bound from one datasink already closed.
#[derive(Debug, Clone, Copy)]
pub struct Pool {
    chans: [(Handle, Cookie); POOL_LEN],
    len:   usize,
}

impl Default for Pool {
    fn default() -> Self {
        Self { chans: [(Handle::INVALID, Cookie(0)); POOL_LEN], len: 0 }
    }
}

impl Pool {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == POOL_LEN
    }

    fn push(&mut self, chan: Handle, cookie: Cookie) {
        if self.len < POOL_LEN {
            self.chans[self.len] = (chan, cookie);
            self.len += 1;
        }
    }

    /// Опустошить пул / Empty the pool
    pub fn take(&mut self) -> impl Iterator<Item = (Handle, Cookie)> {
        let len = core::mem::take(&mut self.len);
        self.chans.into_iter().take(len)
    }
}

fn bump<I: Ipc>(reg: &mut Registry<I>, slot: usize) -> u32 {
    match reg.state_mut(slot) {
        Some(PortState::Closer1 { conn_cnt } | PortState::Closer2 { conn_cnt }) => {
            *conn_cnt += 1;
            *conn_cnt
        }
        _ => 0,
    }
}

fn pause<I: Ipc>(reg: &Registry<I>) {
    if let Err(e) = reg.ipc().nanosleep(nanos(reg.config().closer_delay)) {
        info!("nanosleep failed ({})", e);
    }
}

pub fn closer1_port<I: Ipc>(reg: &mut Registry<I>, slot: usize, ev: &Event) {
    if !ev.mask.contains(EventMask::READY) {
        return;
    }
    let cnt = bump(reg, slot);

    let chan = match reg.ipc().accept(ev.handle) {
        Ok((chan, _)) => chan,
        Err(e) => {
            info!("accept failed ({})", e);
            return;
        }
    };

    if cnt & 1 == 1 {
        pause(reg);
    }
    reg.close_handle(chan);
}

pub fn closer2_port<I: Ipc>(reg: &mut Registry<I>, slot: usize, ev: &Event) {
    if !ev.mask.contains(EventMask::READY) {
        return;
    }
    let cnt = bump(reg, slot);
    if cnt & 1 == 1 {
        pause(reg);
    }

    // закрыть порт, не принимая соединений, и поднять заново
    // close the port without accepting anything and bring it back
    match reg.restart(slot) {
        Ok(()) => {
            // счётчик переживает перезапуск: чередование сна идёт через все рестарты
            // the counter outlives the restart so the sleep alternation spans restarts
            if let Some(PortState::Closer2 { conn_cnt }) = reg.state_mut(slot) {
                *conn_cnt = cnt;
            }
        }
        Err(e) => info!("failed ({}) to restart closer2", e),
    }
}

pub fn closer3_port<I: Ipc>(reg: &mut Registry<I>, slot: usize, ev: &Event) {
    if !ev.mask.contains(EventMask::READY) {
        return;
    }

    let chan = match reg.ipc().accept(ev.handle) {
        Ok((chan, _)) => chan,
        Err(e) => {
            info!("accept failed ({})", e);
            return;
        }
    };

    // datasink на всякий случай / datasink just in case
    let Ok(cookie) = reg.bind_channel(chan, ChannelHandler::Datasink) else { return };

    let flush = match reg.state_mut(slot) {
        Some(PortState::Closer3 { pool }) => {
            pool.push(chan, cookie);
            pool.is_full().then(|| core::mem::take(pool))
        }
        _ => None,
    };
    let Some(mut full) = flush else { return };

    pause(reg);
    for (_, cookie) in full.take() {
        reg.close_channel(cookie);
    }
}
