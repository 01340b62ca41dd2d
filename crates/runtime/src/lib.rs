//! tabmux runtime - controller connection, session registry, and orchestration
//!
//! This crate multiplexes one outbound controller connection over many in-browser automation
//! sessions:
//!
//! - **Transport**: reconnecting WebSocket to the controller with exponential backoff
//! - **Session registry**: live sessions keyed by id, queryable by target kind and page
//! - **Provisioning**: at most one page opened per target kind at a time
//! - **Resolver**: explicit page, then reuse, then provision
//! - **Orchestrator**: wire requests in, agent calls out, lifecycle events back
//!
//! # Architecture
//!
//! ```text
//!   controller
//!       │ ws
//! ┌─────▼──────┐   AgentEvent    ┌──────────────┐
//! │ Transport  │◄──────────────► │ Orchestrator │◄──── agents (AgentLink)
//! └────────────┘  TransportEvent └──────┬───────┘
//!                                       │
//!                          ┌────────────▼───────────┐
//!                          │ SessionResolver        │
//!                          │  ├ SessionRegistry     │
//!                          │  └ Provisioner ──────────► HostPages::open_page
//!                          └────────────────────────┘
//! ```
//!
//! # Collaborator traits
//!
//! Agents and the host are reached only through [`AgentChannel`] and [`HostPages`], so the
//! runtime never depends on how pages are opened or how agents are wired.

pub mod channel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod testing;
pub mod transport;

pub use channel::{AgentChannel, AgentEvent, AgentLink, BoxFuture, HostPages, Registered, Registration, SessionCall};
pub use config::Config;
pub use error::{ActionError, Error, ResolveError, Result};
pub use orchestrator::{EventSequencer, Orchestrator, WireSink};
pub use session::{Provisioner, Session, SessionId, SessionRegistry, SessionResolver};
pub use transport::{Backoff, ConnectionState, Transport, TransportEvent, TransportHandle};
