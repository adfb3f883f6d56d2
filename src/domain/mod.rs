//! Domain layer: pure page-addressing rules with no I/O.

pub mod title;
pub mod variant;

pub use variant::Variant;
