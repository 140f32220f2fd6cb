//! IPC unit-test server — точка входа / entry point

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use ipc_unittest_srv::{Dispatcher, ServiceConfig, SERVICES};
use libcuprum::logger::Logger;
use libcuprum::mem::SlabHeap;
use libcuprum::sys::{Console, Syscalls};
use log::{error, info, LevelFilter};

/// Куча задачи: 8 echo-каналов × 8 × 4 KiB помещаются с запасом.
/// Task heap: 8 echo channels × 8 × 4 KiB fit with room to spare.
#[global_allocator]
static HEAP: SlabHeap<{ 512 * 1024 }> = SlabHeap::new();

static LOGGER: Logger<Console> = Logger::new("ipc-unittest-srv", Console);

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let _ = LOGGER.install(LevelFilter::Info);

    match Dispatcher::start(Syscalls, ServiceConfig::default(), SERVICES) {
        Ok(mut dispatcher) => {
            info!("unittest services ready");
            dispatcher.run();
        }
        Err(e) => error!("failed ({}) to init services", e),
    }

    loop { core::hint::spin_loop(); }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    error!("panic: {}", info);
    loop { core::hint::spin_loop(); }
}
