//! REST API client module for the school data service.
//!
//! The service exposes one read endpoint per partition (students, classes,
//! attendance, deliveries, calendar, menu). Each takes a scope identifier
//! and a bearer token and answers with a list or an object, wrapped in one
//! of several envelope shapes.

pub mod client;
pub mod envelope;
pub mod error;

pub use client::{HttpDataService, RemoteDataService};
pub use error::ApiError;
