//! Real-time side of the server: the session registry, event fan-out, and
//! the WebSocket connection loop.

pub mod connection;
pub mod dispatcher;
pub mod fanout;

pub use dispatcher::Dispatcher;
