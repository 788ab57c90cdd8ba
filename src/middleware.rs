use actix_web::body::MessageBody;
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{web, FromRequest, HttpMessage, HttpRequest};
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use mongodb::Client;

use crate::auth::decode_token;
use crate::errors::ApiError;
use crate::models::{AccountStatus, Role, User};
use crate::{MONGOCOLLECTIONUSERS, MONGO_DB};

/// Identity placed into request extensions by `protect`. Handlers take it
/// as an extractor argument; extraction fails if the route was registered
/// without the middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: ObjectId,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = std::future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        std::future::ready(req.extensions().get::<AuthUser>().cloned().ok_or_else(|| {
            ApiError::Internal("handler used outside a protected route".to_string())
        }))
    }
}

fn bearer_token(req: &HttpRequest) -> Result<String, ApiError> {
    Ok(req
        .headers()
        .get("Authorization")
        .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("invalid authorization header"))?
        .replace("Bearer ", ""))
}

/// Decodes the bearer token, loads the account, and stores an [`AuthUser`]
/// in request extensions. Suspended accounts are refused here so no
/// protected handler ever sees one.
pub async fn protect(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let token = bearer_token(req.request())?;
    let claim = decode_token(&token)?;
    let user_id = ObjectId::parse_str(&claim.sub)
        .map_err(|_| ApiError::unauthorized("malformed token subject"))?;

    let client = req
        .app_data::<web::Data<Client>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("database handle missing".to_string()))?;
    let user = client
        .database(MONGO_DB)
        .collection::<User>(MONGOCOLLECTIONUSERS)
        .find_one(Some(doc! {"_id": user_id}), None)
        .await
        .map_err(ApiError::Database)?
        .ok_or(ApiError::NotFound("user"))?;

    if user.status == AccountStatus::Suspended {
        return Err(ApiError::unauthorized("account suspended").into());
    }

    req.extensions_mut().insert(AuthUser {
        id: user.id,
        role: user.role,
    });
    next.call(req).await
}

/// Requires the identity `protect` stored earlier; the route registry
/// guarantees `protect` runs first.
pub async fn restrict_to_admin(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let is_admin = req
        .extensions()
        .get::<AuthUser>()
        .map(AuthUser::is_admin)
        .unwrap_or(false);
    if !is_admin {
        return Err(ApiError::unauthorized("admin access required").into());
    }
    next.call(req).await
}

/// Best-effort identity for public endpoints that behave differently for
/// the owner, like the visit counter. Never errors.
pub fn optional_user(req: &HttpRequest) -> Option<ObjectId> {
    let token = bearer_token(req).ok()?;
    let claim = decode_token(&token).ok()?;
    ObjectId::parse_str(&claim.sub).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use actix_web::test::TestRequest;

    #[test]
    fn extractor_reads_the_identity_protect_stored() {
        let req = TestRequest::default().to_http_request();
        let id = ObjectId::new();
        req.extensions_mut().insert(AuthUser {
            id,
            role: Role::User,
        });
        let user = AuthUser::from_request(&req, &mut Payload::None)
            .into_inner()
            .unwrap();
        assert_eq!(user.id, id);
        assert!(!user.is_admin());
    }

    #[test]
    fn extractor_fails_outside_protected_routes() {
        let req = TestRequest::default().to_http_request();
        assert!(AuthUser::from_request(&req, &mut Payload::None)
            .into_inner()
            .is_err());
    }

    #[test]
    fn bearer_tokens_are_read_from_the_authorization_header() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc.def.ghi"))
            .to_http_request();
        assert_eq!(bearer_token(&req).unwrap(), "abc.def.ghi");

        let bare = TestRequest::default().to_http_request();
        assert!(bearer_token(&bare).is_err());
    }

    #[test]
    fn optional_user_resolves_valid_tokens_and_swallows_bad_ones() {
        let id = ObjectId::new();
        let token = issue_token(&id).unwrap();
        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_http_request();
        assert_eq!(optional_user(&req), Some(id));

        let junk = TestRequest::default()
            .insert_header(("Authorization", "Bearer junk"))
            .to_http_request();
        assert_eq!(optional_user(&junk), None);
    }
}
