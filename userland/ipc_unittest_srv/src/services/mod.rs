//! Сервисы / Services
//!
//! Таблица сервисов и маршрутизация событий по виду сервиса.
//! Service table and per-kind event routing.

pub mod closer;
pub mod connect;
pub mod datasink;
pub mod echo;
pub mod uuid;

use libcuprum::ipc::{Event, EventMask, Ipc, PortFlags, MAX_PORT_BUF_SIZE};
use log::{error, info};

use crate::registry::{ChannelFlow, ChannelHandler, Descriptor, Registry, ServiceKind};

// ── Таблица сервисов / Service table ─────────────────────────────────────────

pub static SERVICES: &[Descriptor] = &[
    Descriptor { name: "closer1",  msg_num: 2, msg_size: 64, policy: PortFlags::ALLOW_ALL,        kind: ServiceKind::Closer1 },
    Descriptor { name: "closer2",  msg_num: 2, msg_size: 64, policy: PortFlags::ALLOW_ALL,        kind: ServiceKind::Closer2 },
    Descriptor { name: "closer3",  msg_num: 2, msg_size: 64, policy: PortFlags::ALLOW_ALL,        kind: ServiceKind::Closer3 },
    Descriptor { name: "connect",  msg_num: 2, msg_size: 64, policy: PortFlags::ALLOW_TA_CONNECT, kind: ServiceKind::Connect },
    // datasink: одно поведение, три политики / one behaviour, three policies
    Descriptor { name: "datasink", msg_num: 2, msg_size: 64, policy: PortFlags::ALLOW_ALL,        kind: ServiceKind::Datasink },
    Descriptor { name: "ns_only",  msg_num: 8, msg_size: 64, policy: PortFlags::ALLOW_NS_CONNECT, kind: ServiceKind::Datasink },
    Descriptor { name: "ta_only",  msg_num: 8, msg_size: 64, policy: PortFlags::ALLOW_TA_CONNECT, kind: ServiceKind::Datasink },
    Descriptor { name: "echo",     msg_num: 8, msg_size: MAX_PORT_BUF_SIZE, policy: PortFlags::ALLOW_ALL, kind: ServiceKind::Echo },
    Descriptor { name: "uuid",     msg_num: 2, msg_size: 64, policy: PortFlags::ALLOW_ALL,        kind: ServiceKind::Uuid },
];

// ── Маршрутизация / Routing ──────────────────────────────────────────────────

/// Событие на порту слота / Event on a slot's port
pub fn handle_port<I: Ipc>(reg: &mut Registry<I>, slot: usize, ev: &Event) {
    if port_errors(reg, slot, ev) {
        return;
    }
    let Some(desc) = reg.descriptor(slot) else { return };
    match desc.kind {
        ServiceKind::Closer1 => closer::closer1_port(reg, slot, ev),
        ServiceKind::Closer2 => closer::closer2_port(reg, slot, ev),
        ServiceKind::Closer3 => closer::closer3_port(reg, slot, ev),
        ServiceKind::Connect => connect::handle_port(reg, ev),
        ServiceKind::Datasink => datasink::handle_port(reg, ev),
        ServiceKind::Echo => echo::handle_port(reg, desc, ev),
        ServiceKind::Uuid => uuid::handle_port(reg, ev),
    }
}

/// Событие на канале / Event on a channel
pub fn handle_channel<I: Ipc>(
    reg: &Registry<I>,
    handler: &mut ChannelHandler,
    ev: &Event,
) -> ChannelFlow {
    match handler {
        ChannelHandler::Datasink => datasink::handle_chan(reg.ipc(), ev),
        ChannelHandler::Echo(state) => echo::handle_chan(reg.ipc(), reg.config(), ev, state),
    }
}

/// Общая политика ошибок порта: ERROR, HUP, MSG или SEND_UNBLOCKED на порту
/// означают сломанный порт; сервис перезапускается, событие дальше не идёт.
/// Common port-error policy: ERROR, HUP, MSG or SEND_UNBLOCKED on a port mean
/// a broken port; the service is restarted and the event goes no further.
pub fn port_errors<I: Ipc>(reg: &mut Registry<I>, slot: usize, ev: &Event) -> bool {
    let bad = EventMask::ERROR | EventMask::HUP | EventMask::MSG | EventMask::SEND_UNBLOCKED;
    if !ev.mask.intersects(bad) {
        return false;
    }
    info!("error event ({:#x}) for port ({})", ev.mask.bits(), ev.handle);
    if let Err(e) = reg.restart(slot) {
        error!("failed ({}) to restart service in slot {}", e, slot);
    }
    true
}
