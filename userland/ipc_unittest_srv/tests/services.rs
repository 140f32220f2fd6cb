//! datasink, uuid, connect против симулятора / against the simulator

mod common;

use std::time::Duration;

use common::{config, path, recv, settle, start, start_with, NS_UUID, SRV_UUID, TA_UUID};
use libcuprum::ipc::{ConnectFlags, EventMask, Ipc, Message, PeerClass, PortFlags};
use libcuprum::sim::SimKernel;
use libcuprum::time::Timeout;
use libcuprum::{Error, Uuid};

// ── datasink ─────────────────────────────────────────────────────────────────

#[test]
fn datasink_retires_everything_then_closes_on_hangup() {
    let sim = SimKernel::new();
    let (srv, mut d) = start(&sim);
    let cli = sim.task(sim.spawn(TA_UUID, PeerClass::TrustedApp));
    let baseline = sim.open_handles(srv);

    let c = cli.connect(&path("ta_only"), ConnectFlags::empty()).unwrap();
    settle(&mut d);
    for i in 0..8u8 {
        cli.send_msg(c, &Message::new(&[i; 32])).unwrap();
    }
    let srv_chan = *sim.handles(srv).last().unwrap();
    assert_eq!(sim.queued(srv, srv_chan), Ok(8));

    settle(&mut d);
    assert_eq!(sim.queued(srv, srv_chan), Ok(0));
    assert_eq!(d.registry().channel_count(), 1);

    cli.close(c).unwrap();
    assert_eq!(settle(&mut d), 1);
    assert_eq!(d.registry().channel_count(), 0);
    assert_eq!(sim.open_handles(srv), baseline);
}

#[test]
fn datasink_keeps_up_with_a_small_queue() {
    let sim = SimKernel::new();
    let (_, mut d) = start(&sim);
    let cli = sim.task(sim.spawn(NS_UUID, PeerClass::NonSecure));
    let c = cli.connect(&path("datasink"), ConnectFlags::empty()).unwrap();
    settle(&mut d);

    let mut sent = 0;
    while sent < 10 {
        match cli.send_msg(c, &Message::new(b"data")) {
            Ok(_) => sent += 1,
            Err(Error::NotEnoughBuffer) => {
                settle(&mut d);
            }
            Err(e) => panic!("send: {e}"),
        }
    }
    // SEND_UNBLOCKED пришёл клиенту, канал открыт
    // SEND_UNBLOCKED reached the client, the channel stays open
    assert!(cli.wait(c, Timeout::millis(1)).unwrap().mask.contains(EventMask::SEND_UNBLOCKED));
    assert_eq!(d.registry().channel_count(), 1);
}

#[test]
fn datasink_policies_follow_peer_class() {
    let sim = SimKernel::new();
    let (_, _d) = start(&sim);
    let ns = sim.task(sim.spawn(NS_UUID, PeerClass::NonSecure));
    let ta = sim.task(sim.spawn(TA_UUID, PeerClass::TrustedApp));

    assert!(ns.connect(&path("ns_only"), ConnectFlags::empty()).is_ok());
    assert_eq!(ns.connect(&path("ta_only"), ConnectFlags::empty()), Err(Error::NoPermission));
    assert!(ta.connect(&path("ta_only"), ConnectFlags::empty()).is_ok());
    assert_eq!(ta.connect(&path("ns_only"), ConnectFlags::empty()), Err(Error::NoPermission));
    assert!(ns.connect(&path("datasink"), ConnectFlags::empty()).is_ok());
    assert!(ta.connect(&path("datasink"), ConnectFlags::empty()).is_ok());
}

#[test]
fn datasink_closes_channel_on_error() {
    let sim = SimKernel::new();
    let (srv, mut d) = start(&sim);
    let cli = sim.task(sim.spawn(NS_UUID, PeerClass::NonSecure));
    let c = cli.connect(&path("datasink"), ConnectFlags::empty()).unwrap();
    settle(&mut d);

    let srv_chan = *sim.handles(srv).last().unwrap();
    sim.inject_error(srv, srv_chan).unwrap();
    settle(&mut d);
    assert_eq!(d.registry().channel_count(), 0);
    assert!(cli.wait(c, Timeout::millis(1)).unwrap().mask.contains(EventMask::HUP));
}

// ── uuid ─────────────────────────────────────────────────────────────────────

#[test]
fn uuid_replies_with_the_peer_identity() {
    let sim = SimKernel::new();
    let (srv, mut d) = start(&sim);
    let baseline = sim.open_handles(srv);

    for (uuid, class) in [(NS_UUID, PeerClass::NonSecure), (TA_UUID, PeerClass::TrustedApp)] {
        let cli = sim.task(sim.spawn(uuid, class));
        let c = cli.connect(&path("uuid"), ConnectFlags::empty()).unwrap();
        settle(&mut d);

        let (bytes, handles) = recv(&cli, c).unwrap();
        assert_eq!(handles, 0);
        let got = Uuid::from_bytes(&bytes.try_into().unwrap());
        assert_eq!(got, uuid);
        assert!(cli.wait(c, Timeout::millis(1)).unwrap().mask.contains(EventMask::HUP));
    }
    assert_eq!(sim.open_handles(srv), baseline);
}

// ── connect ──────────────────────────────────────────────────────────────────

#[test]
fn connect_refuses_untrusted_callers() {
    let sim = SimKernel::new();
    let (_, _d) = start(&sim);
    let ns = sim.task(sim.spawn(NS_UUID, PeerClass::NonSecure));
    assert_eq!(ns.connect(&path("connect"), ConnectFlags::empty()), Err(Error::NoPermission));
}

#[test]
fn connect_floods_the_accept_ports() {
    let sim = SimKernel::new();
    let cfg = config()
        .with_connect_range(3..8)
        .with_connect_timeout(Duration::from_millis(10));
    let (srv, mut d) = start_with(&sim, cfg.clone());
    let baseline = sim.open_handles(srv);

    // acceptor держит порты accept3 и accept5 и принимает всё, что пришло
    // the acceptor owns accept3 and accept5 and takes whatever arrives
    let acc_id = sim.spawn(Uuid::new(0xacc, 0, 0, [0; 8]), PeerClass::TrustedApp);
    let acc = sim.task(acc_id);
    let ports = [
        acc.port_create(&cfg.accept_path(3), 4, 64, PortFlags::ALLOW_TA_CONNECT).unwrap(),
        acc.port_create(&cfg.accept_path(5), 4, 64, PortFlags::ALLOW_TA_CONNECT).unwrap(),
    ];
    sim.set_idle_hook(move |k| {
        let acc = k.task(acc_id);
        for port in ports {
            while let Ok((chan, peer)) = acc.accept(port) {
                assert_eq!(peer, SRV_UUID);
                let _ = acc.close(chan);
            }
        }
    });

    let cli = sim.task(sim.spawn(TA_UUID, PeerClass::TrustedApp));
    let c = cli.connect(&cfg.service_path("connect"), ConnectFlags::empty()).unwrap();
    let before = sim.clock();
    settle(&mut d);
    sim.clear_idle_hook();

    assert!(cli.wait(c, Timeout::millis(1)).unwrap().mask.contains(EventMask::HUP));
    assert_eq!(sim.open_handles(srv), baseline);
    assert_eq!(sim.open_handles(acc_id), 2);
    // три пути без порта ждут таймаут / three paths without a port wait out the timeout
    assert!(sim.clock() - before >= 30 * 1_000_000);
}

#[test]
fn sync_connect_reports_each_outcome() {
    use ipc_unittest_srv::services::connect::sync_connect;

    let sim = SimKernel::new();
    let srv = sim.task(sim.spawn(SRV_UUID, PeerClass::TrustedApp));
    let cli_id = sim.spawn(TA_UUID, PeerClass::TrustedApp);
    let cli = sim.task(cli_id);
    let port = srv.port_create("sc.ok", 2, 64, PortFlags::ALLOW_TA_CONNECT).unwrap();

    // никто не принимает / nobody accepts
    assert_eq!(sync_connect(&cli, "sc.ok", Timeout::millis(5)), Err(Error::TimedOut));
    assert_eq!(sim.open_handles(cli_id), 0);

    // принимает во время ожидания / accepted during the wait
    let srv_id = srv.id();
    sim.set_idle_hook(move |k| {
        // первым в очереди лежит брошенный конец / an abandoned end is queued first
        while let Err(Error::ChannelClosed) = k.task(srv_id).accept(port) {}
    });
    let chan = sync_connect(&cli, "sc.ok", Timeout::millis(5)).unwrap();
    assert!(chan.is_valid());

    // порт закрывается во время ожидания / the port closes during the wait
    sim.set_idle_hook(move |k| {
        let _ = k.task(srv_id).close(port);
    });
    assert_eq!(sync_connect(&cli, "sc.ok", Timeout::millis(5)), Err(Error::ChannelClosed));
    assert_eq!(sim.open_handles(cli_id), 1);
}
