//! # pulse-sockets
//!
//! Manages a set of named WebSocket connections for a dashboard client.
//!
//! - [`ConnectionRegistry`]: configure, connect, disconnect, reconnect, send
//! - [`ReconnectScheduler`]: fixed-interval retries with an attempt cap
//! - [`MessageRouter`]: `{type, ...}` frames published per `(connection, type)`
//! - [`Connector`]: transport seam, with [`WsConnector`] for real sockets and
//!   [`testing::MockConnector`] for tests
//! - [`ConnectionHandler`]: lifecycle callbacks

#![deny(unsafe_code)]

pub mod handler;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod testing;
pub mod transport;
pub mod ws;

pub use handler::{ConnectionHandler, LoggingHandler, NoopHandler};
pub use registry::{ConnectionRegistry, RegistryOptions};
pub use router::{MessageRouter, Route, RouteKey, Subscription};
pub use scheduler::{ReconnectPolicy, ReconnectScheduler};
pub use transport::{Connector, OpenedTransport, OutboundFrame, TransportEvent};
pub use ws::WsConnector;
