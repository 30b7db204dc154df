pub mod bridge;
pub mod metrics;
pub mod protocol;

pub use bridge::{
    handle_line, run_bridge, BridgeConfig, BridgeError, InboundError, InboundState, LineFramer,
    LineTooLong, MAX_LINE_BYTES,
};
pub use metrics::{init_metrics, serve_metrics};
pub use protocol::{
    CommandMsg, CommandValue, EstopMsg, EstopStateMsg, HelloMsg, IncomingMessage, ProtocolError,
    StatsMsg,
};
