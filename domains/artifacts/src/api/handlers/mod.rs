//! Request handlers for the Artifacts domain

pub mod operations;
