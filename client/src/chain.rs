//! Header-chain collaborator contract.
use serde_json::Value;

use tumbaga_common::Height;

use crate::interface::Conn;

/// The local header-chain verifier.
///
/// The coordinator does not verify headers itself; it hands every
/// header notification over and reads back only the local tip. The
/// hand-off is one-directional: the collaborator gets the notification
/// and the reporting connection, never a reference to the coordinator.
pub trait Blockchain {
    /// Start the collaborator. Called once, before the coordinator
    /// begins dialing.
    fn start(&mut self);

    /// The local tip height.
    fn height(&self) -> Height;

    /// Read a verified header at the given height.
    fn read_header(&self, height: Height) -> Option<Value>;

    /// Enqueue a header notification received from a server, paired
    /// with the connection that reported it.
    fn submit(&mut self, conn: Conn, header: Value);
}
