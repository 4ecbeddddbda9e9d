//! Application services: the user operations and the seams they consume.

pub mod auth;
pub mod error;
pub mod repos;
pub mod users;
