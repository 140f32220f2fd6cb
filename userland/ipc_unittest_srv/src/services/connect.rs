//! connect — поток синхронных connect'ов / a flood of synchronous connects
//!
//! Входящее соединение принимается и сразу закрывается, затем сервис
//! обходит `{base}.port.accept{i}` для всех i из `connect_range`.
//! The incoming connection is accepted and closed at once, then the service
//! walks `{base}.port.accept{i}` for every i in `connect_range`.

use libcuprum::ipc::{ConnectFlags, Event, EventMask, Ipc};
use libcuprum::time::Timeout;
use libcuprum::{Error, Handle, Result};
use log::{debug, info};

use crate::registry::Registry;

/// Синхронный connect поверх асинхронного + один wait.
/// Synchronous connect built from an async connect + a single wait.
///
/// READY на этом канале — готово; HUP — `ChannelClosed`; что угодно ещё —
/// `BadState`. На любой ошибке канал закрывается.
/// READY on the channel means done; HUP gives `ChannelClosed`; anything else
/// gives `BadState`. The channel is closed on every error.
pub fn sync_connect<I: Ipc>(ipc: &I, path: &str, timeout: Timeout) -> Result<Handle> {
    let chan = ipc.connect(path, ConnectFlags::ASYNC | ConnectFlags::WAIT_FOR_PORT)?;
    let err = match ipc.wait(chan, timeout) {
        Ok(ev) if ev.handle == chan && ev.mask.contains(EventMask::READY) => return Ok(chan),
        Ok(ev) if ev.handle == chan && ev.mask.contains(EventMask::HUP) => Error::ChannelClosed,
        Ok(_) => Error::BadState,
        Err(e) => e,
    };
    if let Err(e) = ipc.close(chan) {
        debug!("failed ({}) to close chan {}", e, chan);
    }
    Err(err)
}

pub fn handle_port<I: Ipc>(reg: &mut Registry<I>, ev: &Event) {
    if !ev.mask.contains(EventMask::READY) {
        return;
    }

    match reg.ipc().accept(ev.handle) {
        Ok((chan, _)) => reg.close_handle(chan),
        Err(Error::ChannelClosed) => {}
        Err(e) => {
            info!("accept failed ({})", e);
            return;
        }
    }

    let cfg = reg.config();
    let timeout = Timeout::After(cfg.connect_timeout);
    for i in cfg.connect_range.clone() {
        let path = cfg.accept_path(i);
        match sync_connect(reg.ipc(), &path, timeout) {
            Ok(chan) => reg.close_handle(chan),
            Err(e) => debug!("sync connect to {} failed ({})", path, e),
        }
    }
}
