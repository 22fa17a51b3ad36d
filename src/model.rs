//! In-memory models built from bus events.

pub mod devices;
