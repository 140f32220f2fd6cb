//! uuid — отвечает UUID'ом клиента и закрывает канал
//! uuid — replies with the client's UUID and closes the channel

use libcuprum::ipc::{Event, EventMask, Ipc, Message};
use log::info;

use crate::registry::Registry;

pub fn handle_port<I: Ipc>(reg: &mut Registry<I>, ev: &Event) {
    if !ev.mask.contains(EventMask::READY) {
        return;
    }

    let (chan, peer) = match reg.ipc().accept(ev.handle) {
        Ok(accepted) => accepted,
        Err(e) => {
            info!("failed ({}) to accept on port {}", e, ev.handle);
            return;
        }
    };

    let bytes = peer.to_bytes();
    if let Err(e) = reg.ipc().send_msg(chan, &Message::new(&bytes)) {
        info!("failed ({}) to send uuid {} on chan {}", e, peer, chan);
    }
    reg.close_handle(chan);
}
