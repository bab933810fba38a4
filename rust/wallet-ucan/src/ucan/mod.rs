//! The UCAN side of wallet authorization. A session DID is obtained from the
//! wallet (or generated locally), the wallet grants it capabilities by
//! signing a SIWE "root", and the session then mints short-lived
//! delegations and invocations that carry the root as their proof.

mod cache;
mod capability;
mod context;
mod key;
mod root;
mod session;
mod token;

pub use cache::*;
pub use capability::*;
pub use context::*;
pub use key::*;
pub use root::*;
pub use session::*;
pub use token::*;
