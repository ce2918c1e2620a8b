//! Data model and pure logic for vehicle-damage photo analysis.
//!
//! Nothing in this crate performs network I/O. The engine crate feeds
//! completion text in here and gets typed results back out.

pub mod analysis;
pub mod claims;
pub mod errors;
pub mod events;
pub mod providers;
