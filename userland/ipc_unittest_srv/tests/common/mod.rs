//! Общая обвязка тестов / Shared test harness

#![allow(dead_code)]

use ipc_unittest_srv::{Dispatcher, ServiceConfig, Step, SERVICES};
use libcuprum::ipc::{Ipc, PeerClass, MAX_MSG_HANDLES};
use libcuprum::sim::{SimKernel, SimTask, TaskId};
use libcuprum::time::Timeout;
use libcuprum::{Error, Handle, Uuid};

pub const SRV_UUID: Uuid = Uuid::new(0x766d_2d73, 0x7276, 0x0001, [0xa0; 8]);
pub const TA_UUID: Uuid = Uuid::new(0x7461_2d63, 0x6c69, 0x0002, [0xb1; 8]);
pub const NS_UUID: Uuid = Uuid::new(0x6e73_2d63, 0x6c69, 0x0003, [0xc2; 8]);

pub fn config() -> ServiceConfig {
    ServiceConfig::default()
}

pub fn path(name: &str) -> String {
    config().service_path(name)
}

/// Задача сервиса + поднятый диспетчер / Service task + a started dispatcher
pub fn start(sim: &SimKernel) -> (TaskId, Dispatcher<SimTask<'_>>) {
    start_with(sim, config())
}

pub fn start_with(sim: &SimKernel, cfg: ServiceConfig) -> (TaskId, Dispatcher<SimTask<'_>>) {
    let id = sim.spawn(SRV_UUID, PeerClass::TrustedApp);
    let d = Dispatcher::start(sim.task(id), cfg, SERVICES).expect("services start");
    (id, d)
}

/// Обрабатывать события, пока они есть; число обработанных.
/// Handle events while there are any; returns how many were handled.
pub fn settle(d: &mut Dispatcher<SimTask<'_>>) -> usize {
    let mut handled = 0;
    for _ in 0..10_000 {
        match d.step(Timeout::millis(1)) {
            Step::WaitFailed(Error::TimedOut) => return handled,
            Step::WaitFailed(e) => panic!("wait failed: {e}"),
            _ => handled += 1,
        }
    }
    panic!("dispatcher never went idle");
}

/// Прочитать одно сообщение: тело и число handle'ов (handle'ы закрываются).
/// Read one message: payload and handle count (the handles are closed).
pub fn recv(t: &SimTask<'_>, chan: Handle) -> Option<(Vec<u8>, usize)> {
    let info = match t.get_msg(chan) {
        Ok(info) => info,
        Err(Error::NoMsg) => return None,
        Err(e) => panic!("get_msg: {e}"),
    };
    let mut buf = vec![0u8; info.len];
    let mut handles = [Handle::INVALID; MAX_MSG_HANDLES];
    let n = t
        .read_msg(chan, info.id, 0, &mut buf, &mut handles[..info.num_handles])
        .unwrap();
    t.put_msg(chan, info.id).unwrap();
    for &h in &handles[..info.num_handles] {
        t.close(h).unwrap();
    }
    buf.truncate(n);
    Some((buf, info.num_handles))
}
