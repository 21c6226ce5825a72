//! Block content model for course sections and news items: ordered,
//! typed, schedulable blocks, their rendering, and server reconciliation.
pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod media;
pub mod model;
pub mod reconcile;
pub mod render;
pub mod session;
pub mod store;
pub mod text;
pub mod video;
pub mod visibility;
