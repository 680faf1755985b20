//! Channel bridge between a child context and its manager.
//!
//! # Architecture
//!
//! - **protocol**: Envelope types (`rpc.*`, `iface.*`) and identifiers
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **transport**: Outbound posting seam and the framed stream adapter

pub mod codec;
pub mod protocol;
pub mod transport;
