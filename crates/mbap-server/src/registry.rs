//! Generational arena of poll-driven connections.

use mbap_core::transport::ByteStream;
use tracing::debug;

use crate::connection::{PollSummary, ServerConnection};
use crate::dispatch::Dispatcher;

/// Stable handle to a registered connection.
///
/// A handle outlives pruning of other connections; once its own slot is
/// reused the generation no longer matches and lookups return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    index: usize,
    generation: u32,
}

impl ConnectionId {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    connection: Option<ServerConnection<T>>,
}

#[derive(Debug)]
pub struct ConnectionRegistry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T: ByteStream> ConnectionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, stream: T) -> ConnectionId {
        let connection = Some(ServerConnection::new(stream));
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.generation = slot.generation.wrapping_add(1);
            slot.connection = connection;
            return ConnectionId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            connection,
        });
        ConnectionId {
            index: self.slots.len() - 1,
            generation: 0,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ServerConnection<T>> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.connection.as_ref())
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ServerConnection<T>> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.connection.as_mut())
    }

    /// Removes a connection, discarding its buffer.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ServerConnection<T>> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?;
        let connection = slot.connection.take()?;
        self.free.push(id.index);
        self.len -= 1;
        Some(connection)
    }

    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.connection.as_ref().map(|_| ConnectionId {
                index,
                generation: slot.generation,
            })
        })
    }

    /// Polls every live connection once, in slot order.
    pub fn poll_all(&mut self, dispatcher: &Dispatcher) -> PollSummary {
        let mut total = PollSummary::default();
        for connection in self.slots.iter_mut().filter_map(|slot| slot.connection.as_mut()) {
            let summary = connection.poll(dispatcher);
            total.frames += summary.frames;
            total.responses += summary.responses;
            total.dropped += summary.dropped;
        }
        total
    }

    /// Drops every connection whose transport reports disconnected.
    pub fn prune_disconnected(&mut self) -> usize {
        let mut pruned = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let closed = slot
                .connection
                .as_ref()
                .is_some_and(|connection| !connection.is_connected());
            if closed {
                slot.connection = None;
                self.free.push(index);
                pruned += 1;
            }
        }
        self.len -= pruned;
        if pruned > 0 {
            debug!(pruned, remaining = self.len, "pruned closed modbus connections");
        }
        pruned
    }
}
