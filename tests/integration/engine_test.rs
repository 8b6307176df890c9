//! End-to-end tests of the lifecycle engine
//!
//! Operations run through the HTTP router against the in-memory repository and the
//! mock terminology client.

#![allow(dead_code)]

mod app;
mod common;
mod lifecycle;
mod packaging;
mod publishing;
