//! External handle to a running coordinator.
use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel as chan;
use serde_json::Value;

use tumbaga_common::server::{ServerId, ServerRecord};
use tumbaga_common::Height;

use crate::client::Shared;
use crate::error::Error;
use crate::event::{Command, ConnectionStatus, Event, Parameters, ServerTip};
use crate::interface::{Conn, Observer, Request};
use crate::subscriptions::Topic;

/// Handle to the coordinator, usable from any thread.
///
/// Registry changes happen directly under the coordinator lock; state
/// changes are commands processed by the event loop; reads are
/// eventually-consistent views of what the loop last published.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
    commands: chan::Sender<Event>,
}

impl Handle {
    pub(crate) fn new(shared: Arc<Shared>, commands: chan::Sender<Event>) -> Self {
        Self { shared, commands }
    }

    fn main(&self) -> Option<Conn> {
        self.shared.main.lock().unwrap().clone()
    }

    fn command(&self, command: Command) -> Result<(), Error> {
        self.commands.send(Event::Command(command))?;

        Ok(())
    }

    /// Register subscriptions for an observer. They are forwarded to
    /// the main interface right away when one is connected, and
    /// replayed over every main interface promoted afterwards.
    pub fn subscribe(&self, messages: Vec<Request>, observer: Observer) {
        self.shared
            .registry
            .lock()
            .unwrap()
            .subscriptions
            .insert(observer.clone(), messages.clone());

        if let Some(conn) = self.main().filter(|conn| conn.is_connected()) {
            conn.send(&messages, observer);
        }
    }

    /// One-shot send over the main interface. Returns whether a main
    /// interface was connected to take the messages.
    pub fn send(&self, messages: Vec<Request>, observer: Observer) -> bool {
        match self.main().filter(|conn| conn.is_connected()) {
            Some(conn) => {
                conn.send(&messages, observer);
                true
            }
            None => false,
        }
    }

    /// Blocking request/response round-trip over the main interface.
    /// Blocks the calling thread, never the event loop.
    pub fn synchronous_get(&self, requests: &[Request]) -> Result<Vec<Value>, Error> {
        match self.main().filter(|conn| conn.is_connected()) {
            Some(conn) => conn.synchronous_get(requests),
            None => Err(Error::NotConnected),
        }
    }

    /// Register a callback for an event.
    pub fn register_callback<F: Fn() + Send + Sync + 'static>(&self, topic: Topic, callback: F) {
        self.shared
            .registry
            .lock()
            .unwrap()
            .callbacks
            .register(topic, Arc::new(callback));
    }

    /// Select the main server. A no-op when it is already the connected
    /// main, or when its protocol differs from the current one (change
    /// protocols through [`Handle::set_parameters`] first).
    pub fn set_server(&self, server: ServerId) -> Result<(), Error> {
        self.command(Command::SetServer(server))
    }

    /// Apply user connection parameters. A protocol or proxy change
    /// restarts the whole pool.
    pub fn set_parameters(&self, parameters: Parameters) -> Result<(), Error> {
        self.command(Command::SetParameters(parameters))
    }

    /// The current connection parameters.
    pub fn get_parameters(&self) -> Result<Parameters, Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::GetParameters(reply))?;

        Ok(receiver.recv()?)
    }

    /// The tip state the main server last reported, or `None` when it
    /// has not reported one yet.
    pub fn get_server_tip(&self) -> Result<Option<ServerTip>, Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::GetServerTip(reply))?;

        Ok(receiver.recv()?)
    }

    /// The merged server directory.
    pub fn get_servers(&self) -> Result<HashMap<String, ServerRecord>, Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::GetServers(reply))?;

        Ok(receiver.recv()?)
    }

    /// Servers with a live connection.
    pub fn get_interfaces(&self) -> Result<Vec<ServerId>, Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::GetInterfaces(reply))?;

        Ok(receiver.recv()?)
    }

    /// Read a verified header from the local chain.
    pub fn get_header(&self, height: Height) -> Result<Option<Value>, Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::GetHeader(height, reply))?;

        Ok(receiver.recv()?)
    }

    /// The local chain tip height.
    pub fn local_height(&self) -> Result<Height, Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::GetHeight(reply))?;

        Ok(receiver.recv()?)
    }

    /// The coordinator's connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Whether a main interface is connected.
    pub fn is_connected(&self) -> bool {
        self.main().map_or(false, |conn| conn.is_connected())
    }

    /// Whether the main interface has answered everything sent to it.
    pub fn is_up_to_date(&self) -> bool {
        self.main()
            .map_or(false, |conn| conn.is_connected() && conn.is_up_to_date())
    }

    /// Banner advertised by the main server.
    pub fn banner(&self) -> String {
        self.shared.banner.lock().unwrap().clone()
    }

    /// The server designated as main, even while its connection is
    /// still being established.
    pub fn default_server(&self) -> ServerId {
        self.shared.default_server.lock().unwrap().clone()
    }

    /// Ask the event loop to shut down. The loop notices within its
    /// poll timeout and stops every interface on the way out.
    pub fn stop(&self) {
        self.shared.registry.lock().unwrap().running = false;
    }
}
