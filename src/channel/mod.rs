pub mod pending;
pub mod state;
pub mod telemetry;
pub mod transport;
pub mod wire;

pub use pending::PendingCommands;
pub use state::ConnectionStateMachine;
pub use telemetry::TelemetryChannel;
pub use transport::{Connector, Duplex, FrameSink, FrameStream, WsConnector};
pub use wire::{MetricsRequest, OptimizeTarget};
