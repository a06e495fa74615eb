//! Non-blocking MQTT 3.1.1 session reactor: the state machine that turns socket readiness edges,
//! scheduler ticks, and application calls into wire traffic on top of [`mqtt_core`]'s codec.
//!
//! This crate owns everything downstream of the codec: the [`Socket`](socket::Socket) contract,
//! the [`Scheduler`](scheduler::Scheduler), the [`Callbacks`](callbacks::Callbacks) capability
//! set, construction-time [`Config`](config::Config), and the [`Reactor`](reactor::Reactor)
//! itself. It does not include the concrete poll/select loop, TLS/WebSocket transports, or DNS
//! resolution — those are thin external adapters around this core.

mod callbacks;
mod config;
mod error;
mod reactor;
mod scheduler;
mod socket;

pub use callbacks::{Callbacks, NullCallbacks};
pub use config::{AddressFamily, Config, ConfigError};
pub use error::{CallError, ReactorError};
pub use reactor::{Reactor, ReactorState, Ticket};
pub use scheduler::{Scheduler, Token};
pub use socket::{ConnectStatus, RecvStatus, SendStatus, Socket, SocketError};
