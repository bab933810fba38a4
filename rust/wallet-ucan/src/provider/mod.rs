//! The wallet side of the house: the [WalletProvider] interface an injected
//! wallet exposes, discovery of such a provider in the host environment, and
//! thin helpers over the standard account/chain/signing RPC methods.

mod discovery;
mod events;

pub use discovery::*;
pub use events::*;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use wallet_ucan_common::ConditionalSync;

use crate::error::{AuthError, AuthResult};

/// The message signing method used unless another is asked for
pub const DEFAULT_SIGN_METHOD: &str = "personal_sign";

/// A shared handle to a wallet provider
pub type Provider = Arc<dyn WalletProvider>;

/// An EIP-1193 style wallet: a single JSON-RPC entry point plus, optionally,
/// a way to be told when accounts or the active chain change.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait WalletProvider: ConditionalSync {
    /// Issue a JSON-RPC request against the wallet
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;

    /// True if this provider explicitly announces itself as the preferred
    /// (native) wallet
    fn is_preferred(&self) -> bool {
        false
    }

    /// Register `handler` for `event`. Providers that offer no event
    /// capability return [None]; the registration is released when the
    /// returned [Subscription] is dropped.
    fn subscribe(&self, _event: ProviderEvent, _handler: EventHandler) -> Option<Subscription> {
        None
    }
}

async fn call(provider: &dyn WalletProvider, method: &str, params: Option<Value>) -> AuthResult<Value> {
    provider
        .request(method, params)
        .await
        .map_err(|error| AuthError::provider(method, error))
}

fn into_accounts(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(account) => Some(account),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Ask the wallet to expose its accounts, prompting the user if needed
pub async fn request_accounts(provider: &dyn WalletProvider) -> AuthResult<Vec<String>> {
    Ok(into_accounts(
        call(provider, "eth_requestAccounts", None).await?,
    ))
}

/// The accounts already exposed to this origin, without prompting
pub async fn get_accounts(provider: &dyn WalletProvider) -> AuthResult<Vec<String>> {
    Ok(into_accounts(call(provider, "eth_accounts", None).await?))
}

/// The active chain id as reported by the wallet (usually `0x`-prefixed hex)
pub async fn get_chain_id(provider: &dyn WalletProvider) -> AuthResult<Option<String>> {
    Ok(match call(provider, "eth_chainId", None).await? {
        Value::String(chain_id) => Some(chain_id),
        _ => None,
    })
}

/// Use `address` if one was given, otherwise the first exposed account,
/// requesting access when none are exposed yet
pub async fn resolve_address(
    provider: &dyn WalletProvider,
    address: Option<&str>,
) -> AuthResult<String> {
    if let Some(address) = address {
        return Ok(address.to_owned());
    }

    let mut accounts = get_accounts(provider).await?;

    if accounts.is_empty() {
        debug!("No accounts exposed; requesting account access");
        accounts = request_accounts(provider).await?;
    }

    accounts.into_iter().next().ok_or(AuthError::NoAccount)
}

/// The balance of `address` (or of the first account) at `block_tag`, as
/// the wallet's hex quantity string
pub async fn get_balance(
    provider: &dyn WalletProvider,
    address: Option<&str>,
    block_tag: Option<&str>,
) -> AuthResult<String> {
    let target = match address {
        Some(address) => address.to_owned(),
        None => get_accounts(provider)
            .await?
            .into_iter()
            .next()
            .ok_or(AuthError::NoAccount)?,
    };

    match call(
        provider,
        "eth_getBalance",
        Some(json!([target, block_tag.unwrap_or("latest")])),
    )
    .await?
    {
        Value::String(balance) => Ok(balance),
        _ => Err(AuthError::InvalidBalanceResponse),
    }
}

/// Sign `message` with the wallet. `eth_sign` takes `[address, message]`;
/// every other method takes `[message, address]`.
pub async fn sign_message(
    provider: &dyn WalletProvider,
    address: Option<&str>,
    message: &str,
    method: Option<&str>,
) -> AuthResult<String> {
    let address = resolve_address(provider, address).await?;
    let method = method.unwrap_or(DEFAULT_SIGN_METHOD);
    let params = match method {
        "eth_sign" => json!([address, message]),
        _ => json!([message, address]),
    };

    match call(provider, method, Some(params)).await? {
        Value::String(signature) => Ok(signature),
        _ => Err(AuthError::InvalidSignatureResponse(method.to_owned())),
    }
}
