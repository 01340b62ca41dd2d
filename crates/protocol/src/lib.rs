//! Wire types shared by the tabmux runtime and its bridge.
//!
//! Two protocols live here:
//!
//! - [`wire`]: the controller protocol, one JSON text frame per [`Message`], carried over the single
//!   outbound connection.
//! - [`bridge`]: the in-host protocol spoken by page agents and the host (browser extension)
//!   over the local bridge server.
//!
//! [`PageLocator`] is shared by both.

pub mod bridge;
pub mod locator;
pub mod wire;

pub use locator::PageLocator;
pub use wire::{Body, ErrorBody, ErrorCode, Event, Message, PROTOCOL_VERSION, Request, Response, now_ms};
