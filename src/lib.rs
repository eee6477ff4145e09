//! Wardrobe AI job pipeline
//!
//! A durable work queue dispatching long-running AI operations (image
//! cataloging, attribute inference, label extraction, outfit generation
//! and visualization) against an external model provider, with bounded
//! retries, guarded status transitions, and non-blocking progress
//! reporting. The job record store is the single source of truth for job
//! state; the queue only carries delivery.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod producer;
pub mod routes;
pub mod services;
pub mod worker;
