//! Bulk NIN verification processor
//!
//! Drives bulk verification jobs stored in PostgreSQL: pending records are
//! claimed in batches with `FOR UPDATE SKIP LOCKED`, resolved from the
//! lookup cache or a verification provider with bounded concurrency, and
//! the job is completed (with its notification and report side effects)
//! once every record has a terminal outcome.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
