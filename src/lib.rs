//! Bucket-triggered thumbnail generator.
//!
//! Storage change notifications go in; WebP thumbnails of the created
//! images and PDF documents come out in a sibling bucket under the same key,
//! and removed originals take their thumbnails with them.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod oneshot;
pub mod routes;
pub mod services;
pub mod state;
