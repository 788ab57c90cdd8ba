use std::collections::HashMap;

use actix_web::http::Method;
use actix_web::{web, HttpResponse};
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, DateTime, Document};
use mongodb::options::FindOneOptions;
use mongodb::Client;
use serde::{Deserialize, Serialize};

use super::{collection, parse_id, single};
use crate::auth::{hash_password, issue_token, prune_tokens};
use crate::errors::{is_duplicate_key, ApiError};
use crate::middleware::AuthUser;
use crate::models::{AccountStatus, GeoLocation, Role, User};
use crate::query::ApiFeatures;
use crate::router::{Mw, RouteDef};
use crate::{MONGOCOLLECTIONUSERS, MONGO_DB};

pub fn routes() -> Vec<RouteDef> {
    vec![
        RouteDef {
            method: Method::POST,
            path: "/signup",
            middleware: &[],
            service: |m| web::method(m).to(signup),
        },
        RouteDef {
            method: Method::POST,
            path: "/login",
            middleware: &[],
            service: |m| web::method(m).to(login),
        },
        RouteDef {
            method: Method::GET,
            path: "/me",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(me),
        },
        RouteDef {
            method: Method::PATCH,
            path: "/me",
            middleware: &[Mw::Protect],
            service: |m| web::method(m).to(update_me),
        },
        RouteDef {
            method: Method::GET,
            path: "/",
            middleware: &[Mw::Protect, Mw::RestrictToAdmin],
            service: |m| web::method(m).to(list),
        },
        RouteDef {
            method: Method::PATCH,
            path: "/{id}/status",
            middleware: &[Mw::Protect, Mw::RestrictToAdmin],
            service: |m| web::method(m).to(set_status),
        },
    ]
}

#[derive(Serialize)]
struct TokenBody {
    status: &'static str,
    token: String,
    data: User,
}

fn presentable(mut user: User) -> User {
    user.password = None;
    user.tokens = Vec::new();
    user
}

#[derive(Debug, Deserialize)]
pub struct SignupData {
    pub name: String,
    pub email: String,
    pub password: String,
    pub photo: Option<String>,
    pub location: Option<GeoLocation>,
}

async fn signup(
    db: web::Data<Client>,
    data: web::Json<SignupData>,
) -> Result<HttpResponse, ApiError> {
    if data.name.trim().is_empty() {
        return Err(ApiError::field("name", "must not be empty"));
    }
    if !data.email.contains('@') {
        return Err(ApiError::field("email", "must be an email address"));
    }
    if data.password.len() < 6 {
        return Err(ApiError::field("password", "must be at least 6 characters"));
    }

    let users = db
        .database(MONGO_DB)
        .collection::<User>(MONGOCOLLECTIONUSERS);
    let user = User {
        id: ObjectId::new(),
        name: data.name.clone(),
        email: data.email.clone(),
        password: Some(hash_password(&data.password)),
        role: Role::User,
        status: AccountStatus::Active,
        photo: data.photo.clone(),
        location: data.location.clone(),
        tokens: Vec::new(),
        created_at: DateTime::now(),
    };

    if let Err(err) = users.insert_one(&user, None).await {
        if is_duplicate_key(&err) {
            return Err(ApiError::field("email", "already in use"));
        }
        return Err(err.into());
    }

    let token = issue_token(&user.id)?;
    users
        .update_one(
            doc! {"_id": user.id},
            doc! {"$push": {"tokens": token.clone()}},
            None,
        )
        .await?;
    log::info!("user {} signed up", user.id);
    Ok(HttpResponse::Created().json(TokenBody {
        status: "success",
        token,
        data: presentable(user),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

async fn login(db: web::Data<Client>, data: web::Json<LoginData>) -> Result<HttpResponse, ApiError> {
    let users = db
        .database(MONGO_DB)
        .collection::<User>(MONGOCOLLECTIONUSERS);
    let user = users
        .find_one(Some(doc! {"email": data.email.clone()}), None)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid credentials"))?;

    let matches = user
        .password
        .as_deref()
        .map(|hash| hash == hash_password(&data.password))
        .unwrap_or(false);
    if !matches {
        return Err(ApiError::unauthorized("invalid credentials"));
    }
    if user.status == AccountStatus::Suspended {
        return Err(ApiError::unauthorized("account suspended"));
    }

    // Expired tokens are swept out here, on the one write path every
    // client passes through.
    let token = issue_token(&user.id)?;
    let mut tokens = prune_tokens(&user.tokens);
    tokens.push(token.clone());
    users
        .update_one(
            doc! {"_id": user.id},
            doc! {"$set": {"tokens": tokens}},
            None,
        )
        .await?;

    Ok(HttpResponse::Ok().json(TokenBody {
        status: "success",
        token,
        data: presentable(user),
    }))
}

async fn me(db: web::Data<Client>, user: AuthUser) -> Result<HttpResponse, ApiError> {
    let users = db
        .database(MONGO_DB)
        .collection::<User>(MONGOCOLLECTIONUSERS);
    let mut find_one_options = FindOneOptions::default();
    find_one_options.projection = Some(doc! {"password": 0});
    let profile = users
        .find_one(Some(doc! {"_id": user.id}), Some(find_one_options))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(single(profile))
}

const PROFILE_FIELDS: [&str; 3] = ["name", "photo", "location"];

/// Profile edits may touch name, photo and location only. Credentials and
/// role have their own flows and are refused here.
fn build_profile_update(
    data: &serde_json::Map<String, serde_json::Value>,
) -> Result<Document, ApiError> {
    for key in data.keys() {
        if !PROFILE_FIELDS.contains(&key.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "field `{}` cannot be changed through this endpoint",
                key
            )));
        }
    }
    if let Some(name) = data.get("name") {
        match name.as_str() {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err(ApiError::field("name", "must not be empty")),
        }
    }
    let mut set = Document::new();
    for (key, value) in data {
        let value: Bson = mongodb::bson::to_bson(value)
            .map_err(|_| ApiError::BadRequest(format!("unusable value for `{}`", key)))?;
        set.insert(key, value);
    }
    if set.is_empty() {
        return Err(ApiError::bad_request("nothing to update"));
    }
    Ok(set)
}

async fn update_me(
    db: web::Data<Client>,
    user: AuthUser,
    data: web::Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<HttpResponse, ApiError> {
    let set = build_profile_update(&data)?;
    let users = db
        .database(MONGO_DB)
        .collection::<User>(MONGOCOLLECTIONUSERS);
    users
        .update_one(doc! {"_id": user.id}, doc! {"$set": set}, None)
        .await?;

    let mut find_one_options = FindOneOptions::default();
    find_one_options.projection = Some(doc! {"password": 0});
    let profile = users
        .find_one(Some(doc! {"_id": user.id}), Some(find_one_options))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(single(profile))
}

/// Admin listing through the same feature engine the public browse uses.
async fn list(
    db: web::Data<Client>,
    qs: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let users = db
        .database(MONGO_DB)
        .collection::<Document>(MONGOCOLLECTIONUSERS);
    let (filter, options) = ApiFeatures::new(&qs)
        .filter()
        .sort()
        .select_fields()
        .paginate()
        .into_parts();

    let mut cursor = users.find(Some(filter), Some(options)).await?;
    let mut results = Vec::new();
    while let Some(document) = cursor.next().await {
        let mut document = document?;
        document.remove("password");
        document.remove("tokens");
        results.push(document);
    }
    Ok(collection(results))
}

#[derive(Debug, Deserialize)]
pub struct StatusData {
    pub status: AccountStatus,
}

async fn set_status(
    db: web::Data<Client>,
    path: web::Path<String>,
    data: web::Json<StatusData>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path)?;
    let users = db
        .database(MONGO_DB)
        .collection::<User>(MONGOCOLLECTIONUSERS);
    let status = mongodb::bson::to_bson(&data.status)
        .map_err(|_| ApiError::Internal("unserializable status".to_string()))?;
    let result = users
        .update_one(doc! {"_id": id}, doc! {"$set": {"status": status}}, None)
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::NotFound("user"));
    }

    let mut find_one_options = FindOneOptions::default();
    find_one_options.projection = Some(doc! {"password": 0});
    let profile = users
        .find_one(Some(doc! {"_id": id}), Some(find_one_options))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    log::info!("user {} status set to {:?}", id, data.status);
    Ok(single(profile))
}
