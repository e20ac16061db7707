//! Network coordinator for a federation of block-explorer servers.
//!
//! The coordinator maintains a pool of concurrent server connections
//! and designates one of them as the *main* interface, through which
//! user-visible state (headers, addresses, transactions) is tracked.
//! Peers are discovered from the federation itself, and when the main
//! interface lags behind the local chain tip or disconnects, another
//! connected server is promoted in its place, preserving the illusion
//! of a single converged view of a replicated data source.
//!
//! Per-connection transport, header verification and configuration
//! persistence are external collaborators, reached through the
//! [`Interface`], [`Blockchain`] and [`common::config::Store`] traits.
#![warn(missing_docs)]
pub use crossbeam_channel as chan;

pub mod chain;
pub mod client;
pub mod error;
pub mod event;
pub mod handle;
pub mod interface;
pub mod pool;
pub mod subscriptions;

#[cfg(test)]
mod tests;

pub use chain::Blockchain;
pub use client::Client;
pub use error::Error;
pub use event::{Command, ConnectionStatus, Event, Parameters, ServerTip};
pub use handle::Handle;
pub use interface::{Conn, Dialer, Interface, Observer, Request};
pub use subscriptions::Topic;
pub use tumbaga_common as common;
