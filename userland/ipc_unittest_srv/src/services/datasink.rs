//! datasink — принять и выбросить / accept and discard
//!
//! Обработчик канала без состояния; им же пользуется closer3.
//! Stateless channel handler; closer3 reuses it.

use libcuprum::ipc::{Event, EventMask, Ipc};
use libcuprum::{Error, Handle, Result};
use log::info;

use crate::registry::{ChannelFlow, ChannelHandler, Registry};

/// Вычитать все сообщения не читая тела; число снятых.
/// Retire every pending message without reading it; returns how many.
pub fn drain<I: Ipc>(ipc: &I, chan: Handle) -> Result<usize> {
    let mut retired = 0;
    loop {
        let info = match ipc.get_msg(chan) {
            Ok(info) => info,
            Err(Error::NoMsg) => return Ok(retired),
            Err(e) => {
                info!("failed ({}) to get_msg for chan ({})", e, chan);
                return Err(e);
            }
        };
        if let Err(e) = ipc.put_msg(chan, info.id) {
            info!("failed ({}) to put_msg for chan ({})", e, chan);
            return Err(e);
        }
        retired += 1;
    }
}

pub fn handle_chan<I: Ipc>(ipc: &I, ev: &Event) -> ChannelFlow {
    if ev.mask.intersects(EventMask::ERROR | EventMask::SEND_UNBLOCKED) {
        info!("error event ({:#x}) for chan ({})", ev.mask.bits(), ev.handle);
        return ChannelFlow::Close;
    }

    if ev.mask.contains(EventMask::MSG) && drain(ipc, ev.handle).is_err() {
        return ChannelFlow::Close;
    }

    if ev.mask.contains(EventMask::HUP) {
        return ChannelFlow::Close;
    }

    ChannelFlow::Keep
}

pub fn handle_port<I: Ipc>(reg: &mut Registry<I>, ev: &Event) {
    if !ev.mask.contains(EventMask::READY) {
        return;
    }
    match reg.ipc().accept(ev.handle) {
        Ok((chan, _)) => {
            // при ошибке bind_channel сам закрывает канал
            // bind_channel closes the channel itself on failure
            let _ = reg.bind_channel(chan, ChannelHandler::Datasink);
        }
        Err(e) => info!("failed ({}) to accept on port {}", e, ev.handle),
    }
}
