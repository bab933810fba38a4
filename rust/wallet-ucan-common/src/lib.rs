//! Common, generic utilities that are shared across the wallet-ucan packages.
#![warn(missing_docs)]

mod clock;
mod sync;
pub mod tracing;

pub use clock::*;
pub use sync::*;
