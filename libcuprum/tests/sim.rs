//! Сценарии симулятора через публичный API / Simulator scenarios through the public API

use libcuprum::ipc::{ConnectFlags, EventMask, Ipc, Message, PeerClass, PortFlags};
use libcuprum::sim::SimKernel;
use libcuprum::time::{Timeout, MSEC};
use libcuprum::{Cookie, Error, Handle, Uuid};

const SRV: Uuid = Uuid::new(0x5e4e_0001, 1, 1, [1; 8]);
const CLI: Uuid = Uuid::new(0xc11e_0002, 2, 2, [2; 8]);

#[test]
fn handle_limit_reports_no_resources() {
    let sim = SimKernel::new();
    let id = sim.spawn(SRV, PeerClass::TrustedApp);
    let t = sim.task(id);
    sim.set_handle_limit(id, 2);
    t.port_create("lim.a", 1, 16, PortFlags::ALLOW_ALL).unwrap();
    t.port_create("lim.b", 1, 16, PortFlags::ALLOW_ALL).unwrap();
    assert_eq!(
        t.port_create("lim.c", 1, 16, PortFlags::ALLOW_ALL),
        Err(Error::NoResources)
    );
    assert_eq!(t.connect("lim.a", ConnectFlags::empty()), Err(Error::NoResources));
    assert!(!sim.port_exists("lim.c"));
}

#[test]
fn port_arguments_are_validated() {
    let sim = SimKernel::new();
    let t = sim.task(sim.spawn(SRV, PeerClass::TrustedApp));
    assert_eq!(t.port_create("", 1, 16, PortFlags::ALLOW_ALL), Err(Error::InvalidArg));
    assert_eq!(t.port_create("p", 0, 16, PortFlags::ALLOW_ALL), Err(Error::InvalidArg));
    assert_eq!(t.port_create("p", 33, 16, PortFlags::ALLOW_ALL), Err(Error::InvalidArg));
    assert_eq!(t.port_create("p", 1, 4097, PortFlags::ALLOW_ALL), Err(Error::InvalidArg));
    let long = "x".repeat(64);
    assert_eq!(t.port_create(&long, 1, 16, PortFlags::ALLOW_ALL), Err(Error::InvalidArg));
    t.port_create("p", 1, 16, PortFlags::ALLOW_ALL).unwrap();
    assert_eq!(t.port_create("p", 1, 16, PortFlags::ALLOW_ALL), Err(Error::AlreadyExists));
}

#[test]
fn closing_a_port_hangs_up_pending_clients() {
    let sim = SimKernel::new();
    let srv = sim.task(sim.spawn(SRV, PeerClass::TrustedApp));
    let cli = sim.task(sim.spawn(CLI, PeerClass::NonSecure));
    let port = srv.port_create("gone", 2, 16, PortFlags::ALLOW_ALL).unwrap();
    let c = cli.connect("gone", ConnectFlags::empty()).unwrap();
    srv.close(port).unwrap();
    assert!(!sim.port_exists("gone"));
    let ev = cli.wait(c, Timeout::millis(1)).unwrap();
    assert!(ev.mask.contains(EventMask::HUP));
    assert_eq!(cli.send_msg(c, &Message::new(b"x")), Err(Error::ChannelClosed));
    cli.close(c).unwrap();
    assert_eq!(sim.live_objects(), 0);
}

#[test]
fn send_before_accept_is_bad_state() {
    let sim = SimKernel::new();
    let srv = sim.task(sim.spawn(SRV, PeerClass::TrustedApp));
    let cli = sim.task(sim.spawn(CLI, PeerClass::NonSecure));
    srv.port_create("early", 2, 16, PortFlags::ALLOW_ALL).unwrap();
    let c = cli.connect("early", ConnectFlags::ASYNC).unwrap();
    assert_eq!(cli.send_msg(c, &Message::new(b"x")), Err(Error::BadState));
}

#[test]
fn waiting_connect_is_refused_by_late_policy() {
    let sim = SimKernel::new();
    let srv = sim.task(sim.spawn(SRV, PeerClass::TrustedApp));
    let cli = sim.task(sim.spawn(CLI, PeerClass::NonSecure));
    let c = cli
        .connect("ta.late", ConnectFlags::ASYNC | ConnectFlags::WAIT_FOR_PORT)
        .unwrap();
    srv.port_create("ta.late", 2, 16, PortFlags::ALLOW_TA_CONNECT).unwrap();
    assert_eq!(cli.wait(c, Timeout::millis(1)).unwrap().mask, EventMask::HUP);
}

#[test]
fn injected_error_fires_once_with_cookie() {
    let sim = SimKernel::new();
    let id = sim.spawn(SRV, PeerClass::TrustedApp);
    let srv = sim.task(id);
    let port = srv.port_create("err", 2, 16, PortFlags::ALLOW_ALL).unwrap();
    srv.set_cookie(port, Cookie(7)).unwrap();
    sim.inject_error(id, port).unwrap();

    let ev = srv.wait_any(Timeout::millis(1)).unwrap();
    assert_eq!(ev.mask, EventMask::ERROR);
    assert_eq!(ev.cookie, Some(Cookie(7)));
    assert_eq!(srv.wait_any(Timeout::millis(1)), Err(Error::TimedOut));
}

#[test]
fn timed_out_wait_advances_clock() {
    let sim = SimKernel::new();
    let srv = sim.task(sim.spawn(SRV, PeerClass::TrustedApp));
    srv.port_create("idle", 2, 16, PortFlags::ALLOW_ALL).unwrap();
    let before = srv.now().unwrap();
    assert_eq!(srv.wait_any(Timeout::millis(250)), Err(Error::TimedOut));
    assert!(srv.now().unwrap() >= before + 250 * MSEC);
}

#[test]
fn wait_any_without_handles_is_not_found() {
    let sim = SimKernel::new();
    let t = sim.task(sim.spawn(SRV, PeerClass::TrustedApp));
    assert_eq!(t.wait_any(Timeout::Infinite), Err(Error::NotFound));
    assert_eq!(t.wait(Handle(1234), Timeout::Infinite), Err(Error::BadHandle));
}

#[test]
fn recv_limit_caps_inbound_queue() {
    let sim = SimKernel::new();
    let sid = sim.spawn(SRV, PeerClass::TrustedApp);
    let srv = sim.task(sid);
    let cli = sim.task(sim.spawn(CLI, PeerClass::NonSecure));
    let port = srv.port_create("cap", 8, 16, PortFlags::ALLOW_ALL).unwrap();
    let c = cli.connect("cap", ConnectFlags::empty()).unwrap();
    let (s, peer) = srv.accept(port).unwrap();
    assert_eq!(peer, CLI);
    sim.set_recv_limit(sid, s, 1).unwrap();

    cli.send_msg(c, &Message::new(b"1")).unwrap();
    assert_eq!(cli.send_msg(c, &Message::new(b"2")), Err(Error::NotEnoughBuffer));
    assert_eq!(sim.queued(sid, s).unwrap(), 1);
}
