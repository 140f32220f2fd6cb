//! IPC unit-test server — эталонные сервисы для тестов IPC
//! IPC unit-test server — reference services for IPC tests
//!
//! Один поток, один `wait_any`: реестр портов, диспетчер событий и
//! набор сервисов (closer1/2/3, connect, datasink, echo, uuid), которые
//! гоняют порт и канал через все ветки жизненного цикла.
//! One thread, one `wait_any`: a port registry, an event dispatcher and a
//! set of services (closer1/2/3, connect, datasink, echo, uuid) that drive
//! ports and channels through every lifecycle branch.
//!
//! Использование / Usage:
//!   let mut d = Dispatcher::start(Syscalls, ServiceConfig::default(), SERVICES)?;
//!   d.run();

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod services;

pub use config::ServiceConfig;
pub use dispatcher::{Dispatcher, Step};
pub use registry::{Descriptor, Registry, ServiceKind};
pub use services::SERVICES;
