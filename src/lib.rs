//! A single-threaded, callback-driven I/O reactor.
//!
//! [`Reactor`] multiplexes non-blocking sockets and one-shot timers on one
//! thread, using epoll on Linux, kqueue on the BSD family (including
//! macOS), and IOCP on Windows. [`AsyncSocket`] and [`Timer`] report
//! progress through a [`Callbacks`] bundle rather than futures or async
//! fn; [`Handle`] lets other threads inject work onto the reactor's
//! thread or ask it to stop.
//!
//! ```no_run
//! use reactor_net::{Callbacks, Reactor};
//!
//! let mut reactor = Reactor::new()?;
//! let handle = reactor.handle();
//!
//! std::thread::spawn(move || {
//!     handle.exec(|| println!("running on the reactor thread"));
//! });
//!
//! reactor.run_once(Some(std::time::Duration::from_millis(100)))?;
//! # Ok::<(), reactor_net::Error>(())
//! ```

mod addr;
mod callbacks;
mod config;
mod error;
mod reactor;
mod socket;
mod sys;
mod timer;

pub use callbacks::Callbacks;
pub use config::{ReactorConfig, SocketConfig};
pub use error::{Error, ErrorKind, Result};
pub use reactor::{Handle, Reactor};
pub use socket::{AsyncSocket, Family};
pub use timer::Timer;
