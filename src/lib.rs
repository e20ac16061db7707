//! Tumbaga is a light-client network layer for wallets that track a
//! federation of remote block-explorer servers.
//!
//! The [`client`] crate holds the network coordinator: a pool of
//! concurrent server connections with a single *main* connection through
//! which user-visible state is tracked, peer discovery from the
//! federation itself, and transparent fail-over when the main connection
//! lags or disconnects. The [`common`] crate holds the shared leaf
//! types: server identities, the server directory, and configuration.

#[cfg(feature = "tumbaga-client")]
pub use tumbaga_client as client;
#[cfg(feature = "tumbaga-common")]
pub use tumbaga_common as common;
