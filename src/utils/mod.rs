/// Helpers shared across the crate.

pub mod bits;
pub mod meminterface;
