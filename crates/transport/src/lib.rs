pub mod connection;
pub mod dispatcher;
mod error;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::FrameDispatcher;
pub use error::ConnectionError;
pub use transport::{Transport, WebSocketTransport};
