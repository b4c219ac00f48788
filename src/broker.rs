/*! The broker fans provide-port updates from one connection out to every
other connection subscribed to that (node, port) pair (§4.9).

# Example

```ignore
use apx::broker::Broker;
use apx::connection::Role;

let mut broker = Broker::new();
let a = broker.add(Role::Server, my_transport_a, &config);
let b = broker.add(Role::Server, my_transport_b, &config);
broker.subscribe(b, "TestNode1");
broker.route_provide_update(a, "TestNode1", &[1, 2, 3, 4])?;
```
*/

use std::collections::HashMap;

use log::{debug, trace};

use crate::config::Config;
use crate::connection::{ConnectionBase, ConnectionEvent, Role};
use crate::error::{Error, Result};
use crate::file_manager::TransmitHandler;

/// Opaque handle to one connection registered with a [`Broker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(usize);

/// Routes provide-port data between a set of connections, the way a
/// central APX server process sits between many producer/consumer peers.
pub struct Broker<T: TransmitHandler> {
    connections: HashMap<ConnectionHandle, ConnectionBase<T>>,
    // node name -> connections whose peer has a require port wired to it.
    subscribers: HashMap<String, Vec<ConnectionHandle>>,
    next_handle: usize,
}

impl<T: TransmitHandler> Broker<T> {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Broker {
            connections: HashMap::new(),
            subscribers: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Register a new connection and return a handle to it.
    pub fn add(&mut self, role: Role, transmit: T, config: &Config) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;
        self.connections
            .insert(handle, ConnectionBase::new(role, transmit, config));
        handle
    }

    /// Drop a connection and every subscription it held.
    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<ConnectionBase<T>> {
        for subs in self.subscribers.values_mut() {
            subs.retain(|&h| h != handle);
        }
        self.connections.remove(&handle)
    }

    /// Borrow a connection.
    #[must_use]
    pub fn connection(&self, handle: ConnectionHandle) -> Option<&ConnectionBase<T>> {
        self.connections.get(&handle)
    }

    /// Mutably borrow a connection.
    pub fn connection_mut(&mut self, handle: ConnectionHandle) -> Option<&mut ConnectionBase<T>> {
        self.connections.get_mut(&handle)
    }

    /// Mark `handle`'s peer as wanting every update to `node_name`'s
    /// provide-port data forwarded to it as a require-port write.
    pub fn subscribe(&mut self, handle: ConnectionHandle, node_name: impl Into<String>) {
        self.subscribers
            .entry(node_name.into())
            .or_default()
            .push(handle);
    }

    /// Stop forwarding `node_name` updates to `handle`.
    pub fn unsubscribe(&mut self, handle: ConnectionHandle, node_name: &str) {
        if let Some(subs) = self.subscribers.get_mut(node_name) {
            subs.retain(|&h| h != handle);
        }
    }

    /// Feed bytes received on `handle`'s transport, returning the events
    /// they produced (the caller is responsible for reacting to
    /// `DataWritten` events that affect a published provide port by
    /// calling [`Broker::route_provide_update`]).
    pub fn on_bytes_received(
        &mut self,
        handle: ConnectionHandle,
        bytes: &[u8],
    ) -> Result<Vec<ConnectionEvent>> {
        let conn = self
            .connections
            .get_mut(&handle)
            .ok_or_else(|| Error::Connection(format!("no such connection: {handle:?}")))?;
        conn.on_bytes_received(bytes)
    }

    /// Forward `data` (a node's full provide-port buffer) from `from` to
    /// every connection subscribed to `node_name`, as a require-port
    /// write addressed to each peer's published `{node_name}.in` file.
    pub fn route_provide_update(
        &mut self,
        from: ConnectionHandle,
        node_name: &str,
        data: &[u8],
    ) -> Result<()> {
        let Some(subs) = self.subscribers.get(node_name) else {
            trace!("no subscribers for {node_name}, dropping update");
            return Ok(());
        };
        let remote_file = format!("{node_name}.in");
        for &to in subs {
            if to == from {
                continue;
            }
            let Some(conn) = self.connections.get(&to) else {
                continue;
            };
            match conn.forward_write(&remote_file, data) {
                Ok(()) => debug!("routed {node_name} update from {from:?} to {to:?}"),
                Err(e) => debug!("could not route {node_name} to {to:?}: {e}"),
            }
        }
        Ok(())
    }

    /// Drain every connection's outbox. Returns the total number of
    /// messages sent across all connections.
    pub fn drain_all(&self) -> Result<usize> {
        let mut total = 0;
        for conn in self.connections.values() {
            total += conn.drain_outgoing()?;
        }
        Ok(total)
    }
}

impl<T: TransmitHandler> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Loopback {
        inbox: Arc<Mutex<Vec<u8>>>,
    }

    impl TransmitHandler for Loopback {
        fn transmit(&self, bytes: &[u8]) -> Result<()> {
            self.inbox.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn unsubscribed_update_is_a_no_op() {
        let mut broker: Broker<Loopback> = Broker::new();
        let a = broker.add(Role::Server, Loopback::default(), &Config::default());
        broker.route_provide_update(a, "Ghost", &[1, 2]).unwrap();
        assert_eq!(broker.drain_all().unwrap(), 0);
    }

    #[test]
    fn remove_drops_subscriptions() {
        let mut broker: Broker<Loopback> = Broker::new();
        let a = broker.add(Role::Server, Loopback::default(), &Config::default());
        let b = broker.add(Role::Server, Loopback::default(), &Config::default());
        broker.subscribe(b, "TestNode1");
        broker.remove(b);
        // Should not panic even though b no longer exists.
        broker.route_provide_update(a, "TestNode1", &[1]).unwrap();
    }
}
