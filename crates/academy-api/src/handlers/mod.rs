//! API request handlers

pub mod auth;
pub mod categories;
pub mod health;
pub mod users;
