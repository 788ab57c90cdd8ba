use mongodb::bson::oid::ObjectId;
use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocation {
    #[serde(rename = "type")]
    pub geo_type: String,
    pub coordinates: [f64; 2],
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl GeoLocation {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        GeoLocation {
            geo_type: "Point".to_string(),
            coordinates: [longitude, latitude],
            city: None,
            state: None,
            country: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Tools,
    BabyAndKids,
    Electronics,
    Entertainment,
    Furniture,
    Clothing,
    Vehicles,
    Other,
}

impl Category {
    pub fn subcategories(self) -> &'static [&'static str] {
        match self {
            Category::Tools => &["Hand Tools", "Power Tools", "Garden"],
            Category::BabyAndKids => &["Toys", "Clothing", "Gear"],
            Category::Electronics => &["Phones", "Computers", "TV & Audio", "Cameras"],
            Category::Entertainment => &["Books", "Music", "Games", "Instruments"],
            Category::Furniture => &["Living Room", "Bedroom", "Office"],
            Category::Clothing => &["Women", "Men", "Shoes", "Accessories"],
            Category::Vehicles => &["Cars", "Motorcycles", "Bicycles", "Parts"],
            Category::Other => &["Other"],
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

/// Invariant: a listing's subcategory must belong to its category.
pub fn validate_subcategory(category: Category, subcategory: &str) -> Result<(), ApiError> {
    if category.subcategories().contains(&subcategory) {
        Ok(())
    } else {
        Err(ApiError::field(
            "subcategory",
            "does not belong to the selected category",
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub owner: ObjectId,
    pub title: String,
    pub description: Option<String>,
    pub price: f64,
    pub category: Category,
    pub subcategory: String,
    #[serde(default)]
    pub photos: Vec<String>,
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub visits: i64,
    #[serde(default)]
    pub favorites: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub sold: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    pub photo: Option<String>,
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub tokens: Vec<String>,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chatroom {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub listing: ObjectId,
    pub buyer: ObjectId,
    pub seller: ObjectId,
    #[serde(default)]
    pub deleted_by_buyer: bool,
    #[serde(default)]
    pub deleted_by_seller: bool,
    pub created_at: DateTime,
}

impl Chatroom {
    pub fn new(listing: ObjectId, buyer: ObjectId, seller: ObjectId) -> Self {
        Chatroom {
            id: ObjectId::new(),
            listing,
            buyer,
            seller,
            deleted_by_buyer: false,
            deleted_by_seller: false,
            created_at: DateTime::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub room: ObjectId,
    pub sender: ObjectId,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime,
}

impl Message {
    pub fn new(room: ObjectId, sender: ObjectId, content: String) -> Self {
        Message {
            id: ObjectId::new(),
            room,
            sender,
            content,
            status: MessageStatus::Sent,
            created_at: DateTime::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    pub listing: ObjectId,
    pub created_at: DateTime,
}

impl Favorite {
    pub fn new(user: ObjectId, listing: ObjectId) -> Self {
        Favorite {
            id: ObjectId::new(),
            user,
            listing,
            created_at: DateTime::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JWTClaim {
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub nbf: usize,
    pub sub: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcategory_must_belong_to_category() {
        assert!(validate_subcategory(Category::Electronics, "Phones").is_ok());
        assert!(validate_subcategory(Category::Electronics, "Garden").is_err());
        assert!(validate_subcategory(Category::Tools, "Garden").is_ok());
    }

    #[test]
    fn category_parses_from_its_wire_name() {
        assert_eq!(Category::parse("Electronics"), Some(Category::Electronics));
        assert_eq!(Category::parse("BabyAndKids"), Some(Category::BabyAndKids));
        assert_eq!(Category::parse("NotACategory"), None);
    }

    #[test]
    fn listing_serializes_with_camel_case_keys() {
        let now = DateTime::now();
        let listing = Listing {
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
        };
        let value = serde_json::to_value(&listing).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert_eq!(value["category"], "Tools");
    }

    #[test]
    fn message_status_uses_lowercase_wire_values() {
        assert_eq!(
            serde_json::to_value(MessageStatus::Sent).unwrap(),
            serde_json::Value::String("sent".to_string())
        );
        assert_eq!(
            serde_json::to_value(MessageStatus::Seen).unwrap(),
            serde_json::Value::String("seen".to_string())
        );
    }

    #[test]
    fn chatroom_defaults_to_not_deleted() {
        let room: Chatroom = serde_json::from_value(serde_json::json!({
            "_id": {"$oid": ObjectId::new().to_hex()},
            "listing": {"$oid": ObjectId::new().to_hex()},
            "buyer": {"$oid": ObjectId::new().to_hex()},
            "seller": {"$oid": ObjectId::new().to_hex()},
            "createdAt": {"$date": {"$numberLong": "1700000000000"}},
        }))
        .unwrap();
        assert!(!room.deleted_by_buyer);
        assert!(!room.deleted_by_seller);
    }
}
