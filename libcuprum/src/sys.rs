//! Syscall ABI
//!
//! Номера / Numbers:
//!   13 time_now()                         — текущее время (нс)
//!   14 time_sleep(ns)                     — заснуть
//!   15 port_create(path, len, num, size, flags)
//!   16 connect(path, len, flags)
//!   17 accept(port, *uuid)
//!   18 close(handle)
//!   19 set_cookie(handle, cookie)
//!   20 wait(handle, *event, timeout_ns)
//!   21 wait_any(*event, timeout_ns)
//!   22 send_msg(chan, *msg)
//!   23 get_msg(chan, *info)
//!   24 read_msg(chan, id, offset, *msg)
//!   25 put_msg(chan, id)
//!   26 debug_write(ptr, len)              — вывод в консоль ядра
//!
//! Возврат ≥ 0 — успех, < 0 — код [`Error`](crate::Error).
//! Return ≥ 0 is success, < 0 is an [`Error`](crate::Error) code.

use core::fmt;

use crate::ipc::{ConnectFlags, Event, EventMask, Ipc, Message, MsgId, MsgInfo, PortFlags};
use crate::time::Timeout;
use crate::{Cookie, Error, Handle, Result, Uuid};

pub mod nr {
    pub const TIME_NOW: usize = 13;
    pub const TIME_SLEEP: usize = 14;
    pub const PORT_CREATE: usize = 15;
    pub const CONNECT: usize = 16;
    pub const ACCEPT: usize = 17;
    pub const CLOSE: usize = 18;
    pub const SET_COOKIE: usize = 19;
    pub const WAIT: usize = 20;
    pub const WAIT_ANY: usize = 21;
    pub const SEND_MSG: usize = 22;
    pub const GET_MSG: usize = 23;
    pub const READ_MSG: usize = 24;
    pub const PUT_MSG: usize = 25;
    pub const DEBUG_WRITE: usize = 26;
}

/// ENOSYS — на этой архитектуре нет syscall'ов.
/// ENOSYS — no syscalls on this architecture.
const ENOSYS: isize = -38;

#[cfg(target_arch = "x86_64")]
unsafe fn syscall(number: usize, args: [usize; 5]) -> isize {
    let ret: isize;
    // SAFETY: вызывающий гарантирует валидность указателей в args.
    // SAFETY: the caller guarantees pointers in args are valid.
    unsafe {
        core::arch::asm!(
            "syscall",
            inlateout("rax") number as isize => ret,
            in("rdi") args[0],
            in("rsi") args[1],
            in("rdx") args[2],
            in("r10") args[3],
            in("r8") args[4],
            lateout("rcx") _,
            lateout("r11") _,
            options(nostack),
        );
    }
    ret
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn syscall(_number: usize, _args: [usize; 5]) -> isize {
    ENOSYS
}

fn check(ret: isize) -> Result<usize> {
    if ret < 0 {
        Err(Error::from_raw(ret))
    } else {
        Ok(ret as usize)
    }
}

fn handle_of(ret: usize) -> Result<Handle> {
    i32::try_from(ret).map(Handle).map_err(|_| Error::Unknown(ENOSYS))
}

// ── Раскладки, разделяемые с ядром / Layouts shared with the kernel ──────────

#[repr(C)]
#[derive(Default)]
struct RawEvent {
    handle: i32,
    event: u32,
    cookie: u64,
}

impl RawEvent {
    fn into_event(self) -> Event {
        Event {
            handle: Handle(self.handle),
            mask: EventMask::from_bits_truncate(self.event),
            // 0 — cookie не задан / 0 means no cookie set
            cookie: (self.cookie != 0).then_some(Cookie(self.cookie)),
        }
    }
}

#[repr(C)]
struct RawMsg {
    payload: *const u8,
    payload_len: usize,
    handles: *const i32,
    num_handles: usize,
}

#[repr(C)]
struct RawMsgMut {
    payload: *mut u8,
    payload_len: usize,
    handles: *mut i32,
    num_handles: usize,
}

#[repr(C)]
#[derive(Default)]
struct RawMsgInfo {
    len: usize,
    id: u32,
    num_handles: u32,
}

/// Реальное ядро через инструкцию syscall.
/// The real kernel, reached through the syscall instruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Syscalls;

impl Ipc for Syscalls {
    fn port_create(&self, path: &str, num_bufs: u32, buf_size: usize, flags: PortFlags)
        -> Result<Handle>
    {
        let args = [path.as_ptr() as usize, path.len(), num_bufs as usize, buf_size, flags.bits() as usize];
        handle_of(check(unsafe { syscall(nr::PORT_CREATE, args) })?)
    }

    fn connect(&self, path: &str, flags: ConnectFlags) -> Result<Handle> {
        let args = [path.as_ptr() as usize, path.len(), flags.bits() as usize, 0, 0];
        handle_of(check(unsafe { syscall(nr::CONNECT, args) })?)
    }

    fn accept(&self, port: Handle) -> Result<(Handle, Uuid)> {
        let mut peer = [0u8; Uuid::LEN];
        let args = [port.raw() as usize, peer.as_mut_ptr() as usize, 0, 0, 0];
        let chan = handle_of(check(unsafe { syscall(nr::ACCEPT, args) })?)?;
        Ok((chan, Uuid::from_bytes(&peer)))
    }

    fn close(&self, handle: Handle) -> Result<()> {
        check(unsafe { syscall(nr::CLOSE, [handle.raw() as usize, 0, 0, 0, 0]) }).map(drop)
    }

    fn set_cookie(&self, handle: Handle, cookie: Cookie) -> Result<()> {
        let args = [handle.raw() as usize, cookie.0 as usize, 0, 0, 0];
        check(unsafe { syscall(nr::SET_COOKIE, args) }).map(drop)
    }

    fn wait(&self, handle: Handle, timeout: Timeout) -> Result<Event> {
        let mut raw = RawEvent::default();
        let args = [
            handle.raw() as usize,
            &mut raw as *mut RawEvent as usize,
            timeout.as_nanos() as usize,
            0,
            0,
        ];
        check(unsafe { syscall(nr::WAIT, args) })?;
        Ok(raw.into_event())
    }

    fn wait_any(&self, timeout: Timeout) -> Result<Event> {
        let mut raw = RawEvent::default();
        let args = [&mut raw as *mut RawEvent as usize, timeout.as_nanos() as usize, 0, 0, 0];
        check(unsafe { syscall(nr::WAIT_ANY, args) })?;
        Ok(raw.into_event())
    }

    fn send_msg(&self, chan: Handle, msg: &Message<'_>) -> Result<usize> {
        let raw = RawMsg {
            payload: msg.payload.as_ptr(),
            payload_len: msg.payload.len(),
            handles: msg.handles.as_ptr() as *const i32,
            num_handles: msg.handles.len(),
        };
        let args = [chan.raw() as usize, &raw as *const RawMsg as usize, 0, 0, 0];
        check(unsafe { syscall(nr::SEND_MSG, args) })
    }

    fn get_msg(&self, chan: Handle) -> Result<MsgInfo> {
        let mut raw = RawMsgInfo::default();
        let args = [chan.raw() as usize, &mut raw as *mut RawMsgInfo as usize, 0, 0, 0];
        check(unsafe { syscall(nr::GET_MSG, args) })?;
        Ok(MsgInfo { id: MsgId(raw.id), len: raw.len, num_handles: raw.num_handles as usize })
    }

    fn read_msg(
        &self,
        chan: Handle,
        id: MsgId,
        offset: usize,
        buf: &mut [u8],
        handles: &mut [Handle],
    ) -> Result<usize> {
        let raw = RawMsgMut {
            payload: buf.as_mut_ptr(),
            payload_len: buf.len(),
            handles: handles.as_mut_ptr() as *mut i32,
            num_handles: handles.len(),
        };
        let args = [chan.raw() as usize, id.0 as usize, offset, &raw as *const RawMsgMut as usize, 0];
        check(unsafe { syscall(nr::READ_MSG, args) })
    }

    fn put_msg(&self, chan: Handle, id: MsgId) -> Result<()> {
        check(unsafe { syscall(nr::PUT_MSG, [chan.raw() as usize, id.0 as usize, 0, 0, 0]) }).map(drop)
    }

    fn nanosleep(&self, ns: u64) -> Result<()> {
        check(unsafe { syscall(nr::TIME_SLEEP, [ns as usize, 0, 0, 0, 0]) }).map(drop)
    }

    fn now(&self) -> Result<u64> {
        check(unsafe { syscall(nr::TIME_NOW, [0; 5]) }).map(|ns| ns as u64)
    }
}

/// Консоль ядра для логов / Kernel debug console for logs
#[derive(Debug, Default)]
pub struct Console;

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let args = [s.as_ptr() as usize, s.len(), 0, 0, 0];
        check(unsafe { syscall(nr::DEBUG_WRITE, args) }).map(drop).map_err(|_| fmt::Error)
    }
}
