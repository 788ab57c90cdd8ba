pub mod chatrooms;
pub mod favorites;
pub mod listings;
pub mod users;

use actix_web::HttpResponse;
use mongodb::bson::oid::ObjectId;
use serde::Serialize;

use crate::errors::ApiError;

#[derive(Serialize)]
struct CollectionBody<T> {
    status: &'static str,
    length: usize,
    data: Vec<T>,
}

#[derive(Serialize)]
struct SingleBody<T> {
    status: &'static str,
    data: T,
}

pub(crate) fn collection<T: Serialize>(data: Vec<T>) -> HttpResponse {
    HttpResponse::Ok().json(CollectionBody {
        status: "success",
        length: data.len(),
        data,
    })
}

pub(crate) fn single<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(SingleBody {
        status: "success",
        data,
    })
}

pub(crate) fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(SingleBody {
        status: "success",
        data,
    })
}

pub(crate) fn parse_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::bad_request("malformed id"))
}
