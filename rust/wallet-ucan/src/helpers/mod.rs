//! Scripted stand-ins for a wallet and a backend, intended to be used
//! exclusively in tests

mod transport;
mod wallet;

pub use transport::*;
pub use wallet::*;
