//! Domain logic shared by the lifecycle operations

pub mod parameters;
pub mod resolver;
pub mod traversal;
pub mod version_policy;
