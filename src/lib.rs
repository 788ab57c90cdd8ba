pub mod auth;
pub mod chat;
pub mod config;
pub mod controllers;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod query;
pub mod router;

pub const MONGO_DB: &str = "souq";
pub const MONGOCOLLECTIONLISTINGS: &str = "listings";
pub const MONGOCOLLECTIONUSERS: &str = "users";
pub const MONGOCOLLECTIONCHATROOMS: &str = "chatrooms";
pub const MONGOCOLLECTIONMESSAGES: &str = "messages";
pub const MONGOCOLLECTIONFAVORITES: &str = "favorites";

pub const JWT_SECRET: &str = "souqrust-dev-secret-change-me";
pub const TOKEN_TTL_SECONDS: i64 = 2000;
