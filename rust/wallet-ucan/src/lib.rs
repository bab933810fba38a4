//! Client-side authorization for dapps that hold their identity in a
//! browser-style wallet.
//!
//! Two independent flows are offered:
//!
//! - Bearer-token login: the wallet signs a backend challenge and the
//!   backend answers with a session token. [auth::BearerTokenStore] keeps
//!   that token, refreshes it at most once at a time and transparently
//!   retries requests that were rejected with a 401.
//! - UCAN capability chains: the wallet signs a SIWE "root" that grants a
//!   set of capabilities to a session DID, and the session key then signs
//!   short-lived delegations and invocations that carry the root as proof.
//!   [ucan::UcanContext] owns the session records, root reuse and the
//!   invocation cache.
//!
//! [webdav::WebDavClient] is a storage client that presents an invocation
//! as its bearer credential, and [bootstrap] wires either or both flows up
//! in a single call. [verify] holds the checks a service applies to an
//! invocation it receives.

#[macro_use]
extern crate tracing;

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod ucan;
pub mod verify;
pub mod webdav;

#[cfg(any(test, feature = "helpers"))]
pub mod helpers;

#[cfg(test)]
mod tests;
