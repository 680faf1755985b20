//! ifacewire: correlated request/response and interface lifecycle protocol
//! over a single unordered message channel between a child context and its manager.

mod caller;
mod correlation;
mod dispatcher;
mod error;
mod lifecycle;
mod routing;
mod wire;

pub mod bridge;

pub use bridge::protocol::{
    Envelope, InterfaceClose, InterfaceId, InterfaceInit, InterfaceInitCall,
    InterfaceInitResponse, InterfaceResponse, PeerId, RpcCall, RpcErrorBody, RpcResponse,
    WireCall, WireId, WireResponse, WireSend, WireSendResponse,
};
pub use bridge::transport::{FramedOutbound, Outbound, framed};
pub use caller::RpcCaller;
pub use correlation::{CorrelationStore, PendingResponse};
pub use dispatcher::{
    CallExecutor, Dispatcher, Disposition, DropReason, InboundMessage, IncomingCall, PeerFilter,
};
pub use error::{CallError, ExecutorError, RpcError, WireError};
pub use lifecycle::{CloseFuture, InterfaceHandle, InterfaceState, InterfaceTracker, PendingInterface};
pub use routing::{Destination, stamp_origin};
pub use wire::{Wire, WireConfig};
