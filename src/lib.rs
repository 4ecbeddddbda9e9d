//! Cache-aside users service: user records served from PostgreSQL through a
//! read-through, write-invalidated cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
