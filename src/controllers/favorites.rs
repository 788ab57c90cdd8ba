use actix_web::http::Method;
use actix_web::{web, HttpResponse};
use futures::StreamExt;
use mongodb::bson::doc;
use mongodb::Client;

use super::{collection, created, parse_id};
use crate::errors::{is_duplicate_key, ApiError};
use crate::middleware::AuthUser;
use crate::models::{Favorite, Listing};
use crate::router::{Mw, RouteDef};
use crate::{MONGOCOLLECTIONFAVORITES, MONGOCOLLECTIONLISTINGS, MONGO_DB};

pub fn routes() -> Vec<RouteDef> {
    vec![
        RouteDef {
            method: Method::GET,
            path: "/",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(list),
        },
        RouteDef {
            method: Method::POST,
            path: "/{listing_id}",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(add),
        },
        RouteDef {
            method: Method::DELETE,
            path: "/{listing_id}",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(remove),
        },
    ]
}

/// Favoriting pairs an insert with an atomic counter bump on the listing.
/// The two writes are not transactional; the counter is best-effort.
async fn add(
    db: web::Data<Client>,
    user: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let listing_id = parse_id(&path)?;
    let listings = db
        .database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS);
    listings
        .find_one(Some(doc! {"_id": listing_id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;

    let favorites = db
        .database(MONGO_DB)
        .collection::<Favorite>(MONGOCOLLECTIONFAVORITES);
    let existing = favorites
        .find_one(Some(doc! {"user": user.id, "listing": listing_id}), None)
        .await?;
    if existing.is_some() {
        return Err(ApiError::bad_request("already favorited"));
    }

    let favorite = Favorite::new(user.id, listing_id);
    if let Err(err) = favorites.insert_one(&favorite, None).await {
        if is_duplicate_key(&err) {
            return Err(ApiError::bad_request("already favorited"));
        }
        return Err(err.into());
    }
    listings
        .update_one(
            doc! {"_id": listing_id},
            doc! {"$inc": {"favorites": 1}},
            None,
        )
        .await?;
    Ok(created(favorite))
}

/// The counter is only decremented when a record was actually removed, so
/// repeated deletes cannot drive it negative.
async fn remove(
    db: web::Data<Client>,
    user: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let listing_id = parse_id(&path)?;
    let favorites = db
        .database(MONGO_DB)
        .collection::<Favorite>(MONGOCOLLECTIONFAVORITES);
    let result = favorites
        .delete_one(doc! {"user": user.id, "listing": listing_id}, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("favorite"));
    }

    db.database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS)
        .update_one(
            doc! {"_id": listing_id},
            doc! {"$inc": {"favorites": -1}},
            None,
        )
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn list(db: web::Data<Client>, user: AuthUser) -> Result<HttpResponse, ApiError> {
    let favorites = db
        .database(MONGO_DB)
        .collection::<Favorite>(MONGOCOLLECTIONFAVORITES);
    let mut cursor = favorites.find(Some(doc! {"user": user.id}), None).await?;
    let mut listing_ids = Vec::new();
    while let Some(favorite) = cursor.next().await {
        listing_ids.push(favorite?.listing);
    }

    let listings = db
        .database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS);
    let mut cursor = listings
        .find(Some(doc! {"_id": {"$in": listing_ids}}), None)
        .await?;
    let mut results = Vec::new();
    while let Some(listing) = cursor.next().await {
        results.push(listing?);
    }
    Ok(collection(results))
}
