//! tabmux command line.
//!
//! `tabmux serve` wires the runtime together: the controller [`Transport`], the [`Orchestrator`],
//! and the local [`bridge`] server through which the host opens pages and agents register.
//!
//! [`Transport`]: tabmux_runtime::Transport
//! [`Orchestrator`]: tabmux_runtime::Orchestrator

pub mod bridge;
pub mod cli;
pub mod commands;
pub mod logging;
pub mod settings;
