use std::collections::{BTreeMap, HashMap};

use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse};
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, DateTime, Document};
use mongodb::Client;
use serde::Deserialize;

use super::{collection, created, parse_id, single};
use crate::chat::registry::Registry;
use crate::errors::ApiError;
use crate::middleware::{optional_user, AuthUser};
use crate::models::{Category, GeoLocation, Listing};
use crate::query::ApiFeatures;
use crate::router::{Mw, RouteDef};
use crate::{MONGOCOLLECTIONLISTINGS, MONGO_DB};

pub fn routes() -> Vec<RouteDef> {
    vec![
        RouteDef {
            method: Method::GET,
            path: "/",
            middleware: &[],
            service: |m| web::method(m).to(browse),
        },
        RouteDef {
            method: Method::POST,
            path: "/",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(create),
        },
        RouteDef {
            method: Method::GET,
            path: "/{id}",
            middleware: &[],
            service: |m| web::method(m).to(fetch_one),
        },
        RouteDef {
            method: Method::PATCH,
            path: "/{id}",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(update),
        },
        RouteDef {
            method: Method::PATCH,
            path: "/{id}/sold",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(mark_sold),
        },
        RouteDef {
            method: Method::PATCH,
            path: "/{id}/renew",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(renew),
        },
        RouteDef {
            method: Method::DELETE,
            path: "/{id}",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(remove),
        },
    ]
}

/// Public browse endpoint. Query parameters go through the feature engine;
/// the result is always constrained to active listings.
async fn browse(
    db: web::Data<Client>,
    qs: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let listings = db
        .database(MONGO_DB)
        .collection::<Document>(MONGOCOLLECTIONLISTINGS);
    let (mut filter, options) = ApiFeatures::new(&qs)
        .filter()
        .sort()
        .select_fields()
        .paginate()
        .into_parts();
    filter.insert("active", true);

    let mut cursor = listings.find(Some(filter), Some(options)).await?;
    let mut results = Vec::new();
    while let Some(document) = cursor.next().await {
        results.push(document?);
    }
    Ok(collection(results))
}

async fn fetch_one(
    db: web::Data<Client>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path)?;
    let listings = db
        .database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS);
    let mut listing = listings
        .find_one(Some(doc! {"_id": id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;

    // Views by anyone but the owner count as a visit.
    if optional_user(&req) != Some(listing.owner) {
        listings
            .update_one(doc! {"_id": id}, doc! {"$inc": {"visits": 1}}, None)
            .await?;
        listing.visits += 1;
    }
    Ok(single(listing))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListing {
    pub title: String,
    pub description: Option<String>,
    pub price: f64,
    pub category: String,
    pub subcategory: String,
    #[serde(default)]
    pub photos: Vec<String>,
    pub location: Option<GeoLocation>,
}

fn validate_new_listing(data: &CreateListing) -> Result<Category, ApiError> {
    let mut errors = BTreeMap::new();
    let category = Category::parse(&data.category);
    match category {
        None => {
            errors.insert("category".to_string(), "unknown category".to_string());
        }
        Some(category) => {
            if !category.subcategories().contains(&data.subcategory.as_str()) {
                errors.insert(
                    "subcategory".to_string(),
                    "does not belong to the selected category".to_string(),
                );
            }
        }
    }
    if data.title.trim().is_empty() {
        errors.insert("title".to_string(), "must not be empty".to_string());
    }
    if data.price < 0.0 {
        errors.insert("price".to_string(), "must not be negative".to_string());
    }
    match category {
        Some(category) if errors.is_empty() => Ok(category),
        _ => Err(ApiError::Validation(errors)),
    }
}

async fn create(
    db: web::Data<Client>,
    user: AuthUser,
    data: web::Json<CreateListing>,
) -> Result<HttpResponse, ApiError> {
    let category = validate_new_listing(&data)?;
    let now = DateTime::now();
    let listing = Listing {
        id: ObjectId::new(),
        owner: user.id,
        title: data.title.clone(),
        description: data.description.clone(),
        price: data.price,
        category,
        subcategory: data.subcategory.clone(),
        photos: data.photos.clone(),
        location: data.location.clone(),
        visits: 0,
        favorites: 0,
        active: true,
        sold: false,
        created_at: now,
        updated_at: now,
    };
    db.database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS)
        .insert_one(&listing, None)
        .await?;
    log::info!("listing {} created by {}", listing.id, user.id);
    Ok(created(listing))
}

const RESTRICTED_FIELDS: [&str; 8] = [
    "_id",
    "owner",
    "visits",
    "favorites",
    "sold",
    "active",
    "createdAt",
    "updatedAt",
];
const EDITABLE_FIELDS: [&str; 7] = [
    "title",
    "description",
    "price",
    "category",
    "subcategory",
    "photos",
    "location",
];

/// Builds the `$set` document for a listing edit. Restricted fields have
/// their own endpoints and are rejected outright; the category and
/// subcategory pairing is checked against the state the edit would leave
/// behind.
fn build_listing_update(
    data: &serde_json::Map<String, serde_json::Value>,
    current: &Listing,
) -> Result<Document, ApiError> {
    for key in data.keys() {
        if RESTRICTED_FIELDS.contains(&key.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "field `{}` cannot be changed through this endpoint",
                key
            )));
        }
        if !EDITABLE_FIELDS.contains(&key.as_str()) {
            return Err(ApiError::BadRequest(format!("unknown field `{}`", key)));
        }
    }

    let category = match data.get("category") {
        Some(value) => value
            .as_str()
            .and_then(Category::parse)
            .ok_or_else(|| ApiError::field("category", "unknown category"))?,
        None => current.category,
    };
    let subcategory = match data.get("subcategory") {
        Some(value) => value
            .as_str()
            .ok_or_else(|| ApiError::field("subcategory", "must be a string"))?,
        None => current.subcategory.as_str(),
    };
    crate::models::validate_subcategory(category, subcategory)?;

    if let Some(price) = data.get("price") {
        match price.as_f64() {
            Some(price) if price >= 0.0 => {}
            _ => return Err(ApiError::field("price", "must be a non-negative number")),
        }
    }

    let mut set = Document::new();
    for (key, value) in data {
        let value: Bson = mongodb::bson::to_bson(value)
            .map_err(|_| ApiError::BadRequest(format!("unusable value for `{}`", key)))?;
        set.insert(key, value);
    }
    set.insert("updatedAt", DateTime::now());
    Ok(set)
}

async fn update(
    db: web::Data<Client>,
    user: AuthUser,
    path: web::Path<String>,
    data: web::Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path)?;
    let listings = db
        .database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS);
    let listing = listings
        .find_one(Some(doc! {"_id": id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;
    if listing.owner != user.id && !user.is_admin() {
        return Err(ApiError::unauthorized("not the owner of this listing"));
    }

    let set = build_listing_update(&data, &listing)?;
    listings
        .update_one(doc! {"_id": id}, doc! {"$set": set}, None)
        .await?;
    let updated = listings
        .find_one(Some(doc! {"_id": id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;
    Ok(single(updated))
}

async fn transition(
    db: &Client,
    user: &AuthUser,
    id: ObjectId,
    set: Document,
) -> Result<HttpResponse, ApiError> {
    let listings = db
        .database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS);
    let listing = listings
        .find_one(Some(doc! {"_id": id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;
    if listing.owner != user.id {
        return Err(ApiError::unauthorized("not the owner of this listing"));
    }
    listings
        .update_one(doc! {"_id": id}, doc! {"$set": set}, None)
        .await?;
    let updated = listings
        .find_one(Some(doc! {"_id": id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;
    Ok(single(updated))
}

async fn mark_sold(
    db: web::Data<Client>,
    user: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path)?;
    transition(
        &db,
        &user,
        id,
        doc! {"sold": true, "updatedAt": DateTime::now()},
    )
    .await
}

async fn renew(
    db: web::Data<Client>,
    user: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path)?;
    transition(
        &db,
        &user,
        id,
        doc! {"sold": false, "active": true, "updatedAt": DateTime::now()},
    )
    .await
}

/// Deleting a listing also tears down its socket namespace, so the
/// gateway's registry does not grow without bound.
async fn remove(
    db: web::Data<Client>,
    registry: web::Data<Registry>,
    user: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path)?;
    let listings = db
        .database(MONGO_DB)
        .collection::<Listing>(MONGOCOLLECTIONLISTINGS);
    let listing = listings
        .find_one(Some(doc! {"_id": id}), None)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;
    if listing.owner != user.id && !user.is_admin() {
        return Err(ApiError::unauthorized("not the owner of this listing"));
    }

    listings.delete_one(doc! {"_id": id}, None).await?;
    registry.remove_namespace(&id.to_hex()).await;
    log::info!("listing {} deleted by {}", id, user.id);
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CreateListing {
        CreateListing {
            title: "Cordless drill".to_string(),
            description: None,
            price: 35.0,
            category: "Tools".to_string(),
            subcategory: "Power Tools".to_string(),
            photos: vec![],
            location: None,
        }
    }

    fn current() -> Listing {
        let now = DateTime::now();
        Listing {
            id: ObjectId::new(),
            owner: ObjectId::new(),
            title: "Cordless drill".to_string(),
            description: None,
            price: 35.0,
            category: Category::Tools,
            subcategory: "Power Tools".to_string(),
            photos: vec![],
            location: None,
            visits: 0,
            favorites: 0,
            active: true,
            sold: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn valid_listings_pass_validation() {
        assert_eq!(validate_new_listing(&sample()).unwrap(), Category::Tools);
    }

    #[test]
    fn validation_aggregates_every_field_failure() {
        let mut data = sample();
        data.title = "  ".to_string();
        data.price = -1.0;
        data.subcategory = "Phones".to_string();
        match validate_new_listing(&data) {
            Err(ApiError::Validation(errors)) => {
                assert!(errors.contains_key("title"));
                assert!(errors.contains_key("price"));
                assert!(errors.contains_key("subcategory"));
            }
            other => panic!("expected aggregated validation errors, got {:?}", other),
        }
    }

    #[test]
    fn unknown_categories_are_field_errors() {
        let mut data = sample();
        data.category = "Spaceships".to_string();
        match validate_new_listing(&data) {
            Err(ApiError::Validation(errors)) => assert!(errors.contains_key("category")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    fn body(json: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match json {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn edits_to_restricted_fields_are_rejected() {
        for field in ["owner", "visits", "favorites", "sold", "active"] {
            let data = body(serde_json::json!({ field: 1 }));
            assert!(
                build_listing_update(&data, &current()).is_err(),
                "{} should be rejected",
                field
            );
        }
    }

    #[test]
    fn edits_to_unknown_fields_are_rejected() {
        let data = body(serde_json::json!({"bednum": 3}));
        assert!(build_listing_update(&data, &current()).is_err());
    }

    #[test]
    fn allowed_edits_become_a_set_document_with_a_fresh_timestamp() {
        let data = body(serde_json::json!({"title": "Hammer drill", "price": 42.5}));
        let set = build_listing_update(&data, &current()).unwrap();
        assert_eq!(set.get_str("title").unwrap(), "Hammer drill");
        assert_eq!(set.get_f64("price").unwrap(), 42.5);
        assert!(set.get_datetime("updatedAt").is_ok());
    }

    #[test]
    fn category_change_is_checked_against_the_resulting_pair() {
        // Changing only the category leaves the old subcategory behind,
        // which no longer matches.
        let data = body(serde_json::json!({"category": "Electronics"}));
        assert!(build_listing_update(&data, &current()).is_err());

        let data = body(serde_json::json!({"category": "Electronics", "subcategory": "Phones"}));
        assert!(build_listing_update(&data, &current()).is_ok());
    }

    #[test]
    fn negative_price_edits_are_rejected() {
        let data = body(serde_json::json!({"price": -5}));
        assert!(build_listing_update(&data, &current()).is_err());
    }
}
