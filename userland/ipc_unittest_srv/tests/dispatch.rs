//! Диспетчер против ядра по сценарию / Dispatcher against a scripted kernel
//!
//! Симулятор не выдаёт пустых масок и невалидных handle'ов, поэтому здесь
//! события подаются списком.
//! The simulator never yields empty masks or invalid handles, so events are
//! fed from a list here.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ipc_unittest_srv::{Dispatcher, ServiceConfig, Step, SERVICES};
use libcuprum::ipc::{ConnectFlags, Event, EventMask, Ipc, Message, MsgId, MsgInfo, PortFlags};
use libcuprum::time::Timeout;
use libcuprum::{Cookie, Error, Handle, Result, Uuid};

// ── Учёт кучи / Heap accounting ──────────────────────────────────────────────

struct Counting;

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

fn live_bytes() -> isize {
    LIVE.with(Cell::get)
}

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = LIVE.try_with(|l| l.set(l.get() + layout.size() as isize));
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = LIVE.try_with(|l| l.set(l.get() - layout.size() as isize));
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static HEAP: Counting = Counting;

// ── Ядро по сценарию / Scripted kernel ───────────────────────────────────────

enum Scripted {
    /// Отдать как есть / Hand out verbatim
    Raw(Result<Event>),
    /// Событие на handle'е с его текущим cookie / Event on a handle with its current cookie
    On(Handle, EventMask),
}

#[derive(Default)]
struct Script {
    events:   RefCell<VecDeque<Scripted>>,
    next:     Cell<i32>,
    cookies:  RefCell<BTreeMap<Handle, Cookie>>,
    accepted: RefCell<Vec<Handle>>,
    /// (handle, байт кучи в момент close) / (handle, heap bytes at close)
    closed:   RefCell<Vec<(Handle, isize)>>,
    stop:     RefCell<Option<Arc<AtomicBool>>>,
}

#[derive(Clone, Default)]
struct ScriptIpc(Rc<Script>);

impl ScriptIpc {
    fn push(&self, ev: Scripted) {
        self.0.events.borrow_mut().push_back(ev);
    }

    fn fresh(&self) -> Handle {
        let h = Handle(Handle::USER_BASE + self.0.next.get());
        self.0.next.set(self.0.next.get() + 1);
        h
    }

    fn closed(&self) -> Vec<(Handle, isize)> {
        self.0.closed.borrow().clone()
    }

    fn was_closed(&self, h: Handle) -> bool {
        self.0.closed.borrow().iter().any(|&(c, _)| c == h)
    }
}

impl Ipc for ScriptIpc {
    fn port_create(&self, _: &str, _: u32, _: usize, _: PortFlags) -> Result<Handle> {
        Ok(self.fresh())
    }

    fn connect(&self, _: &str, _: ConnectFlags) -> Result<Handle> {
        Err(Error::NotFound)
    }

    fn accept(&self, _: Handle) -> Result<(Handle, Uuid)> {
        let chan = self.fresh();
        self.0.accepted.borrow_mut().push(chan);
        Ok((chan, Uuid::NIL))
    }

    fn close(&self, handle: Handle) -> Result<()> {
        let at = live_bytes();
        self.0.closed.borrow_mut().push((handle, at));
        self.0.cookies.borrow_mut().remove(&handle);
        Ok(())
    }

    fn set_cookie(&self, handle: Handle, cookie: Cookie) -> Result<()> {
        self.0.cookies.borrow_mut().insert(handle, cookie);
        Ok(())
    }

    fn wait(&self, _: Handle, _: Timeout) -> Result<Event> {
        Err(Error::TimedOut)
    }

    fn wait_any(&self, _: Timeout) -> Result<Event> {
        let next = self.0.events.borrow_mut().pop_front();
        match next {
            Some(Scripted::Raw(res)) => res,
            Some(Scripted::On(handle, mask)) => {
                let cookie = self.0.cookies.borrow().get(&handle).copied();
                Ok(Event { handle, mask, cookie })
            }
            None => {
                // сценарий исчерпан / script exhausted
                if let Some(stop) = self.0.stop.borrow().as_ref() {
                    stop.store(true, Ordering::Release);
                }
                Err(Error::TimedOut)
            }
        }
    }

    fn send_msg(&self, _: Handle, _: &Message<'_>) -> Result<usize> {
        Err(Error::BadState)
    }

    fn get_msg(&self, _: Handle) -> Result<MsgInfo> {
        Err(Error::NoMsg)
    }

    fn read_msg(&self, _: Handle, _: MsgId, _: usize, _: &mut [u8], _: &mut [Handle]) -> Result<usize> {
        Err(Error::BadState)
    }

    fn put_msg(&self, _: Handle, _: MsgId) -> Result<()> {
        Err(Error::BadState)
    }

    fn nanosleep(&self, _: u64) -> Result<()> {
        Ok(())
    }

    fn now(&self) -> Result<u64> {
        Ok(0)
    }
}

fn start() -> (ScriptIpc, Dispatcher<ScriptIpc>) {
    let ipc = ScriptIpc::default();
    let d = Dispatcher::start(ipc.clone(), ServiceConfig::default(), SERVICES).expect("services start");
    (ipc, d)
}

// ── Тесты / Tests ────────────────────────────────────────────────────────────

#[test]
fn odd_events_are_reported_and_skipped() {
    let (ipc, mut d) = start();
    let stray = Handle(4242);
    ipc.push(Scripted::Raw(Ok(Event { handle: Handle(1001), mask: EventMask::empty(), cookie: None })));
    ipc.push(Scripted::Raw(Ok(Event { handle: Handle::INVALID, mask: EventMask::READY, cookie: None })));
    ipc.push(Scripted::Raw(Err(Error::BadState)));
    ipc.push(Scripted::Raw(Ok(Event { handle: stray, mask: EventMask::MSG, cookie: Some(Cookie(u64::MAX)) })));

    let steps: Vec<Step> = (0..4).map(|_| d.step(Timeout::Infinite)).collect();
    assert_eq!(steps, [Step::Empty, Step::Invalid, Step::WaitFailed(Error::BadState), Step::Orphan]);

    // закрыт только handle без обработчика / only the handle without a handler was closed
    assert_eq!(ipc.closed().iter().map(|&(h, _)| h).collect::<Vec<_>>(), [stray]);
    assert!(!ipc.was_closed(Handle(1001)));
}

#[test]
fn run_keeps_going_after_wait_errors() {
    let (ipc, mut d) = start();
    let slot = d.registry().find("datasink").unwrap();
    let port = d.registry().port(slot).unwrap();
    *ipc.0.stop.borrow_mut() = Some(d.stop_flag());

    ipc.push(Scripted::Raw(Err(Error::BadState)));
    ipc.push(Scripted::Raw(Err(Error::NoMemory)));
    ipc.push(Scripted::Raw(Ok(Event { handle: Handle(1001), mask: EventMask::empty(), cookie: None })));
    ipc.push(Scripted::On(port, EventMask::READY));
    d.run();

    // соединение после ошибок было принято / the connection after the errors was accepted
    let accepted = ipc.0.accepted.borrow().clone();
    assert_eq!(accepted.len(), 1);

    // остановка закрыла все порты и канал / stopping closed every port and the channel
    assert_eq!(ipc.closed().len(), SERVICES.len() + 1);
    assert!(ipc.was_closed(port));
    assert!(ipc.was_closed(accepted[0]));
    assert_eq!(d.registry().channel_count(), 0);
}

#[test]
fn echo_state_is_freed_before_its_channel_is_closed() {
    let (ipc, mut d) = start();
    let slot = d.registry().find("echo").unwrap();
    let desc = d.registry().descriptor(slot).unwrap();
    let port = d.registry().port(slot).unwrap();

    ipc.push(Scripted::On(port, EventMask::READY));
    assert_eq!(d.step(Timeout::Infinite), Step::Dispatched);
    let chan = ipc.0.accepted.borrow()[0];
    assert_eq!(d.registry().channel_count(), 1);

    ipc.push(Scripted::On(chan, EventMask::HUP));
    let before = live_bytes();
    assert_eq!(d.step(Timeout::Infinite), Step::Dispatched);
    assert_eq!(d.registry().channel_count(), 0);

    let &(closed, at_close) = ipc.closed().last().unwrap();
    assert_eq!(closed, chan);
    // к моменту close буферы echo уже возвращены в кучу
    // by the time of close the echo buffers are already back in the heap
    let state = (desc.msg_num as usize * desc.msg_size) as isize;
    assert!(before - at_close >= state, "freed {} of {} bytes before close", before - at_close, state);
}
