use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub type Outbox = UnboundedSender<WsMessage>;

#[derive(Default)]
struct Namespace {
    members: HashSet<String>,
    rooms: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<String, Outbox>,
    namespaces: HashMap<String, Namespace>,
}

/// In-memory socket topology: one namespace per listing, one room per
/// chatroom inside it, plus the outbox handle of every connection. Shared
/// between the gateway and the HTTP layer (listing deletion tears the
/// namespace down). Never held across a database await.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

impl Registry {
    pub async fn connect(&self, socket_id: &str, outbox: Outbox) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(socket_id.to_string(), outbox);
    }

    /// Removes the socket from the connection table and from every
    /// namespace and room it joined.
    pub async fn disconnect(&self, socket_id: &str) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(socket_id);
        for namespace in inner.namespaces.values_mut() {
            namespace.members.remove(socket_id);
            for room in namespace.rooms.values_mut() {
                room.remove(socket_id);
            }
        }
    }

    /// Joins the socket to the listing's namespace, creating it on first
    /// reference. Returns whether this call created the namespace, so the
    /// gateway can broadcast the creation exactly once.
    pub async fn create_namespace(&self, listing: &str, socket_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let created = !inner.namespaces.contains_key(listing);
        let namespace = inner.namespaces.entry(listing.to_string()).or_default();
        namespace.members.insert(socket_id.to_string());
        created
    }

    /// Joins the socket to a room, vivifying namespace and room as needed.
    /// Purely local and idempotent.
    pub async fn join_room(&self, listing: &str, room: &str, socket_id: &str) {
        let mut inner = self.inner.write().await;
        let namespace = inner.namespaces.entry(listing.to_string()).or_default();
        namespace.members.insert(socket_id.to_string());
        namespace
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(socket_id.to_string());
    }

    /// Drops the whole namespace. Called when its listing is deleted.
    pub async fn remove_namespace(&self, listing: &str) {
        let mut inner = self.inner.write().await;
        if inner.namespaces.remove(listing).is_some() {
            log::info!("namespace {} removed", listing);
        }
    }

    pub async fn send_to(&self, socket_id: &str, message: WsMessage) {
        let inner = self.inner.read().await;
        deliver(&inner.connections, socket_id, &message);
    }

    pub async fn broadcast_namespace(
        &self,
        listing: &str,
        except: Option<&str>,
        message: WsMessage,
    ) {
        let inner = self.inner.read().await;
        if let Some(namespace) = inner.namespaces.get(listing) {
            for member in &namespace.members {
                if except != Some(member.as_str()) {
                    deliver(&inner.connections, member, &message);
                }
            }
        }
    }

    pub async fn broadcast_room(
        &self,
        listing: &str,
        room: &str,
        except: Option<&str>,
        message: WsMessage,
    ) {
        let inner = self.inner.read().await;
        if let Some(members) = inner
            .namespaces
            .get(listing)
            .and_then(|namespace| namespace.rooms.get(room))
        {
            for member in members {
                if except != Some(member.as_str()) {
                    deliver(&inner.connections, member, &message);
                }
            }
        }
    }
}

fn deliver(connections: &HashMap<String, Outbox>, socket_id: &str, message: &WsMessage) {
    if let Some(outbox) = connections.get(socket_id) {
        // A failed send means the writer task is gone; disconnect cleanup
        // removes the entry shortly after.
        if outbox.send(message.clone()).is_err() {
            log::warn!("dropping message for dead socket {}", socket_id);
        }
    }
}
