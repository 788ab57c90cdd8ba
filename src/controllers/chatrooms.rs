use actix_web::http::Method;
use actix_web::{web, HttpResponse};
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Document};
use mongodb::Client;

use super::{collection, parse_id};
use crate::errors::ApiError;
use crate::middleware::AuthUser;
use crate::models::Chatroom;
use crate::router::{Mw, RouteDef};
use crate::{
    MONGOCOLLECTIONCHATROOMS, MONGOCOLLECTIONLISTINGS, MONGOCOLLECTIONMESSAGES,
    MONGOCOLLECTIONUSERS, MONGO_DB,
};

pub fn routes() -> Vec<RouteDef> {
    vec![
        RouteDef {
            method: Method::GET,
            path: "/",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(list),
        },
        RouteDef {
            method: Method::DELETE,
            path: "/{id}",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(remove),
        },
    ]
}

/// The conversation-list pipeline: match the rooms the user participates
/// in and has not soft-deleted, join each room's messages in time order,
/// take the last one, denormalize listing and both participants, and sort
/// newest conversation first. Rooms with no messages keep a null
/// `lastMessage` and sort last; hiding them is the client's choice.
pub fn user_chatrooms_pipeline(user: ObjectId) -> Vec<Document> {
    vec![
        doc! {"$match": {"$or": [
            {"seller": user, "deletedBySeller": {"$ne": true}},
            {"buyer": user, "deletedByBuyer": {"$ne": true}},
        ]}},
        doc! {"$lookup": {
            "from": MONGOCOLLECTIONMESSAGES,
            "let": {"room": "$_id"},
            "pipeline": [
                {"$match": {"$expr": {"$eq": ["$room", "$$room"]}}},
                {"$sort": {"createdAt": 1}},
            ],
            "as": "messages",
        }},
        doc! {"$addFields": {"lastMessage": {"$arrayElemAt": ["$messages", -1]}}},
        doc! {"$lookup": {
            "from": MONGOCOLLECTIONLISTINGS,
            "localField": "listing",
            "foreignField": "_id",
            "as": "listing",
        }},
        doc! {"$unwind": {"path": "$listing", "preserveNullAndEmptyArrays": true}},
        doc! {"$lookup": {
            "from": MONGOCOLLECTIONUSERS,
            "localField": "buyer",
            "foreignField": "_id",
            "as": "buyer",
        }},
        doc! {"$unwind": {"path": "$buyer", "preserveNullAndEmptyArrays": true}},
        doc! {"$lookup": {
            "from": MONGOCOLLECTIONUSERS,
            "localField": "seller",
            "foreignField": "_id",
            "as": "seller",
        }},
        doc! {"$unwind": {"path": "$seller", "preserveNullAndEmptyArrays": true}},
        doc! {"$project": {
            "listing": {"_id": 1, "photos": 1, "title": 1, "price": 1, "location": 1},
            "buyer": {"_id": 1, "name": 1, "photo": 1, "location": 1},
            "seller": {"_id": 1, "name": 1, "photo": 1, "location": 1},
            "lastMessage": 1,
            "deletedByBuyer": 1,
            "deletedBySeller": 1,
            "createdAt": 1,
        }},
        doc! {"$sort": {"lastMessage.createdAt": -1}},
    ]
}

async fn list(db: web::Data<Client>, user: AuthUser) -> Result<HttpResponse, ApiError> {
    let rooms = db
        .database(MONGO_DB)
        .collection::<Chatroom>(MONGOCOLLECTIONCHATROOMS);
    let mut cursor = rooms.aggregate(user_chatrooms_pipeline(user.id), None).await?;
    let mut results = Vec::new();
    while let Some(document) = cursor.next().await {
        results.push(document?);
    }
    Ok(collection(results))
}

/// Which soft-delete flag the acting user may flip, if any.
pub fn participant_delete_flag(room: &Chatroom, user: &ObjectId) -> Option<&'static str> {
    if room.buyer == *user {
        Some("deletedByBuyer")
    } else if room.seller == *user {
        Some("deletedBySeller")
    } else {
        None
    }
}

/// Soft delete for the acting participant only. The record stays; when
/// both flags are set the room is merely invisible to both sides.
async fn remove(
    db: web::Data<Client>,
    user: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path)?;
    let rooms = db
        .database(MONGO_DB)
        .collection::<Chatroom>(MONGOCOLLECTIONCHATROOMS);
    let room = rooms
        .find_one(Some(doc! {"_id": id}), None)
        .await?
        .ok_or(ApiError::NotFound("chatroom"))?;
    let flag = participant_delete_flag(&room, &user.id)
        .ok_or_else(|| ApiError::unauthorized("not a participant of this chatroom"))?;

    let mut set = Document::new();
    set.insert(flag, true);
    rooms
        .update_one(doc! {"_id": id}, doc! {"$set": set}, None)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
