//! Root of the `parley-core` library.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the appropriate abstraction (e.g.,
// the CLI's event printer).
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use config::Config;
pub use config::ConfigOverrides;
pub use error::ParleyErr;
pub use session::ChatKey;
pub use session::ChatSession;
pub use session::ConnectionStatus;
pub use session::DeltaKind;
pub use session::SessionEvent;
pub use session::SessionPhase;
pub use transport::ChatTransport;
pub use transport::ConnectParams;
pub use transport::Connector;
pub use transport::DuplexSocket;
pub use transport::ReadyState;
pub use transport::TransportEvent;
pub use transport::TransportEventKind;
pub use transport::WebSocketConnector;
pub use transport::WireFrame;
