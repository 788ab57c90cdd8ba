pub mod registry;

use futures::{SinkExt, StreamExt};
use log::{error, info};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::doc;
use mongodb::Client;
use nanoid::nanoid;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

use crate::errors::ApiError;
use crate::models::{Chatroom, Listing, Message};
use crate::{
    MONGOCOLLECTIONCHATROOMS, MONGOCOLLECTIONLISTINGS, MONGOCOLLECTIONMESSAGES, MONGO_DB,
};
use registry::Registry;

// Wire-level event vocabulary, shared with unconverted clients.
pub const CREATE_NAMESPACE: &str = "Create namespace";
pub const NAMESPACE_CREATED: &str = "Namespace created";
pub const JOIN_ROOM: &str = "Join room";
pub const CREATE_ROOM: &str = "Create room";
pub const NEW_ROOM_CREATED: &str = "New room created";
pub const TYPING: &str = "Typing";
pub const STOP_TYPING: &str = "StopTyping";
pub const MESSAGE: &str = "Message";
pub const MESSAGE_SENT: &str = "Message sent";
pub const MESSAGE_RECEIVED: &str = "Message received";
pub const MESSAGE_SEEN: &str = "Message seen";
pub const ERROR: &str = "Error";

pub fn envelope(event: &str, data: Value) -> WsMessage {
    WsMessage::Text(json!({"event": event, "data": data}).to_string())
}

/// Accept loop of the socket gateway. Runs on its own port next to the
/// HTTP server, sharing the Mongo client and the namespace registry.
pub async fn run(addr: String, registry: Registry, db: Client) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("socket gateway listening on {}", addr);
    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(handle_connection(stream, registry.clone(), db.clone()));
    }
}

async fn handle_connection(stream: TcpStream, registry: Registry, db: Client) {
    let socket_id = nanoid!();
    let ws_stream = match accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            error!("websocket handshake failed: {}", e);
            return;
        }
    };
    info!("socket {} connected", socket_id);

    let (mut sink, mut source) = ws_stream.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<WsMessage>();
    registry.connect(&socket_id, outbox).await;

    let writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    registry
        .send_to(
            &socket_id,
            envelope("connection", json!({"socketId": socket_id})),
        )
        .await;

    while let Some(frame) = source.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let ack = match serde_json::from_str::<Value>(&text) {
                    Ok(event) => dispatch(&socket_id, &event, &registry, &db).await,
                    Err(_) => Err(ApiError::bad_request("malformed event payload")),
                };
                // Failures answer the originating socket instead of being
                // dropped on the floor.
                if let Err(err) = ack {
                    registry
                        .send_to(
                            &socket_id,
                            envelope(ERROR, json!({"message": err.to_string()})),
                        )
                        .await;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                error!("socket {} stream error: {}", socket_id, e);
                break;
            }
        }
    }

    registry.disconnect(&socket_id).await;
    writer.abort();
    info!("socket {} disconnected", socket_id);
}

async fn dispatch(
    socket_id: &str,
    event: &Value,
    registry: &Registry,
    db: &Client,
) -> Result<(), ApiError> {
    let name = event["event"].as_str().unwrap_or_default();
    let data = &event["data"];
    match name {
        CREATE_NAMESPACE => on_create_namespace(socket_id, data, registry, db).await,
        JOIN_ROOM => on_join_room(socket_id, data, registry).await,
        CREATE_ROOM => on_create_room(socket_id, data, registry, db).await,
        MESSAGE => on_message(socket_id, data, registry, db).await,
        MESSAGE_SEEN => on_message_seen(socket_id, data, registry, db).await,
        TYPING | STOP_TYPING => on_typing(name, socket_id, data, registry).await,
        other => Err(ApiError::BadRequest(format!("unknown event `{}`", other))),
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> Result<&'a str, ApiError> {
    data[key]
        .as_str()
        .ok_or_else(|| ApiError::BadRequest(format!("missing field `{}`", key)))
}

fn id_field(data: &Value, key: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(str_field(data, key)?)
        .map_err(|_| ApiError::BadRequest(format!("malformed id in `{}`", key)))
}

fn room_descriptor(room: &Chatroom) -> Value {
    json!({
        "roomId": room.id.to_hex(),
        "listingId": room.listing.to_hex(),
        "buyerId": room.buyer.to_hex(),
        "sellerId": room.seller.to_hex(),
        "createdAt": room.created_at.timestamp_millis(),
    })
}

fn message_payload(message: &Message) -> Value {
    json!({
        "messageId": message.id.to_hex(),
        "roomId": message.room.to_hex(),
        "senderId": message.sender.to_hex(),
        "content": message.content,
        "status": message.status,
        "createdAt": message.created_at.timestamp_millis(),
    })
}

/// Provisions the listing's namespace. Idempotent: the second request for
/// the same listing joins the caller but neither recreates the namespace
/// nor broadcasts a second `Namespace created`.
async fn on_create_namespace(
    socket_id: &str,
    data: &Value,
    registry: &Registry,
    db: &Client,
) -> Result<(), ApiError> {
    let listing_id = id_field(data, "listingId")?;
    db.database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS)
        .find_one(Some(doc! {"_id": listing_id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;

    let namespace = listing_id.to_hex();
    if registry.create_namespace(&namespace, socket_id).await {
        registry
            .broadcast_namespace(
                &namespace,
                None,
                envelope(NAMESPACE_CREATED, json!({"listingId": namespace})),
            )
            .await;
        info!("namespace {} created", namespace);
    }
    Ok(())
}

/// Local registration only; a client that already knows its chatroom does
/// not touch the database to rejoin it.
async fn on_join_room(socket_id: &str, data: &Value, registry: &Registry) -> Result<(), ApiError> {
    let listing_id = id_field(data, "listingId")?;
    let room_id = id_field(data, "roomId")?;
    registry
        .join_room(&listing_id.to_hex(), &room_id.to_hex(), socket_id)
        .await;
    Ok(())
}

/// First contact between a buyer and a listing's seller. Resolves or
/// lazily creates the chatroom for the (listing, buyer, seller) triple,
/// then announces it to the namespace so the seller's clients can join.
async fn on_create_room(
    socket_id: &str,
    data: &Value,
    registry: &Registry,
    db: &Client,
) -> Result<(), ApiError> {
    let listing_id = id_field(data, "listingId")?;
    let buyer = id_field(data, "buyerId")?;

    let listing = db
        .database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS)
        .find_one(Some(doc! {"_id": listing_id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;
    let seller = listing.owner;
    if buyer == seller {
        return Err(ApiError::bad_request("cannot open a chatroom on your own listing"));
    }

    let rooms = db
        .database(MONGO_DB)
        .collection::<Chatroom>(MONGOCOLLECTIONCHATROOMS);
    let room = match rooms
        .find_one(
            Some(doc! {"listing": listing_id, "buyer": buyer, "seller": seller}),
            None,
        )
        .await?
    {
        Some(room) => {
            // A buyer coming back to a conversation they had deleted sees
            // it again.
            if room.deleted_by_buyer {
                rooms
                    .update_one(
                        doc! {"_id": room.id},
                        doc! {"$set": {"deletedByBuyer": false}},
                        None,
                    )
                    .await?;
            }
            room
        }
        None => {
            let room = Chatroom::new(listing_id, buyer, seller);
            rooms.insert_one(&room, None).await?;
            info!("chatroom {} created for listing {}", room.id, listing_id);
            room
        }
    };

    let namespace = listing_id.to_hex();
    registry
        .join_room(&namespace, &room.id.to_hex(), socket_id)
        .await;
    registry
        .broadcast_namespace(&namespace, None, envelope(NEW_ROOM_CREATED, room_descriptor(&room)))
        .await;
    Ok(())
}

/// Persists the message with status Sent, acknowledges the sender, and
/// fans out to the rest of the room. Clients order by the persisted
/// `createdAt`, not by receipt order.
async fn on_message(
    socket_id: &str,
    data: &Value,
    registry: &Registry,
    db: &Client,
) -> Result<(), ApiError> {
    let room_id = id_field(data, "roomId")?;
    let sender = id_field(data, "senderId")?;
    let content = str_field(data, "content")?;
    if content.trim().is_empty() {
        return Err(ApiError::bad_request("empty message"));
    }

    let room = db
        .database(MONGO_DB)
        .collection::<Chatroom>(MONGOCOLLECTIONCHATROOMS)
        .find_one(Some(doc! {"_id": room_id}), None)
        .await?
        .ok_or(ApiError::NotFound("chatroom"))?;
    if sender != room.buyer && sender != room.seller {
        return Err(ApiError::unauthorized("not a participant of this chatroom"));
    }

    let message = Message::new(room_id, sender, content.to_string());
    db.database(MONGO_DB)
        .collection::<Message>(MONGOCOLLECTIONMESSAGES)
        .insert_one(&message, None)
        .await?;

    let namespace = room.listing.to_hex();
    let room_key = room_id.to_hex();
    registry.join_room(&namespace, &room_key, socket_id).await;

    let payload = message_payload(&message);
    registry
        .send_to(socket_id, envelope(MESSAGE_SENT, payload.clone()))
        .await;
    registry
        .broadcast_room(
            &namespace,
            &room_key,
            Some(socket_id),
            envelope(MESSAGE_RECEIVED, payload),
        )
        .await;
    Ok(())
}

/// Seen is server-authoritative: every message in the room not sent by
/// the viewer flips to Seen, then the room is notified.
async fn on_message_seen(
    socket_id: &str,
    data: &Value,
    registry: &Registry,
    db: &Client,
) -> Result<(), ApiError> {
    let room_id = id_field(data, "roomId")?;
    let viewer = id_field(data, "userId")?;

    let room = db
        .database(MONGO_DB)
        .collection::<Chatroom>(MONGOCOLLECTIONCHATROOMS)
        .find_one(Some(doc! {"_id": room_id}), None)
        .await?
        .ok_or(ApiError::NotFound("chatroom"))?;
    if viewer != room.buyer && viewer != room.seller {
        return Err(ApiError::unauthorized("not a participant of this chatroom"));
    }

    db.database(MONGO_DB)
        .collection::<Message>(MONGOCOLLECTIONMESSAGES)
        .update_many(
            doc! {"room": room_id, "sender": {"$ne": viewer}, "status": {"$ne": "seen"}},
            doc! {"$set": {"status": "seen"}},
            None,
        )
        .await?;

    registry
        .broadcast_room(
            &room.listing.to_hex(),
            &room_id.to_hex(),
            Some(socket_id),
            envelope(
                MESSAGE_SEEN,
                json!({"roomId": room_id.to_hex(), "userId": viewer.to_hex()}),
            ),
        )
        .await;
    Ok(())
}

/// Typing indicators are ephemeral: relayed to the rest of the room,
/// never persisted.
async fn on_typing(
    event: &str,
    socket_id: &str,
    data: &Value,
    registry: &Registry,
) -> Result<(), ApiError> {
    let listing_id = id_field(data, "listingId")?;
    let room_id = id_field(data, "roomId")?;
    registry
        .broadcast_room(
            &listing_id.to_hex(),
            &room_id.to_hex(),
            Some(socket_id),
            envelope(event, data.clone()),
        )
        .await;
    Ok(())
}
