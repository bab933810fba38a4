use std::{fmt::Display, sync::Arc};

use serde_json::Value;

use super::WalletProvider;

/// Wallet notifications a caller may subscribe to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderEvent {
    AccountsChanged,
    ChainChanged,
}

impl Display for ProviderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ProviderEvent::AccountsChanged => "accountsChanged",
                ProviderEvent::ChainChanged => "chainChanged",
            }
        )
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[cfg(target_arch = "wasm32")]
pub type EventHandler = Arc<dyn Fn(&Value)>;

#[cfg(not(target_arch = "wasm32"))]
type Release = Box<dyn FnOnce() + Send + Sync>;

#[cfg(target_arch = "wasm32")]
type Release = Box<dyn FnOnce()>;

/// A live event registration. Dropping it (or calling
/// [Subscription::unsubscribe]) detaches the handler exactly once.
pub struct Subscription {
    release: Option<Release>,
}

impl Subscription {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Subscription {
            release: Some(Box::new(release)),
        }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Subscription {
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

pub fn on_accounts_changed(
    provider: &dyn WalletProvider,
    handler: EventHandler,
) -> Option<Subscription> {
    provider.subscribe(ProviderEvent::AccountsChanged, handler)
}

pub fn on_chain_changed(
    provider: &dyn WalletProvider,
    handler: EventHandler,
) -> Option<Subscription> {
    provider.subscribe(ProviderEvent::ChainChanged, handler)
}
