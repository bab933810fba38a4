//! Generic interfaces and concrete implementations for persisting the small
//! amount of client-side state a wallet-authenticated session needs: bearer
//! tokens and UCAN session records. Native targets get a disk-persisted K/V
//! store via sled; every target gets an in-memory store.

#[macro_use]
extern crate tracing;

mod key_value;
mod memory;
#[cfg(not(target_arch = "wasm32"))]
mod disk;
mod store;

#[cfg(any(test, feature = "helpers"))]
mod unavailable;

pub use key_value::*;
pub use memory::*;
#[cfg(not(target_arch = "wasm32"))]
pub use disk::*;
pub use store::*;

#[cfg(any(test, feature = "helpers"))]
pub use unavailable::*;
