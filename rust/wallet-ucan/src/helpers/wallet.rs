use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_zebra::SigningKey;
use serde_json::{json, Value};

use crate::{
    provider::{EventHandler, ProviderEvent, Subscription, WalletProvider},
    ucan::{generate_ed25519_key, sign_ed25519, signing_key_to_did},
};

pub const MOCK_WALLET_ADDRESS: &str = "0xabc0000000000000000000000000000000000001";

type Listeners = Arc<Mutex<Vec<(u64, ProviderEvent, EventHandler)>>>;

/// A wallet that answers the standard account, chain and signing methods
/// plus the UCAN session methods, backed by a real Ed25519 session key.
/// Clones share their call log, listeners and session key.
#[derive(Clone)]
pub struct MockWallet {
    address: String,
    chain_id: Value,
    balance: Value,
    signature: Value,
    exposes_accounts: bool,
    grants_accounts: bool,
    supports_events: bool,
    preferred: bool,
    wraps_signatures: bool,
    ucan_sign_response: Option<Value>,
    session_response: Option<Value>,
    session_key: Arc<Mutex<SigningKey>>,
    calls: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    listeners: Listeners,
    next_listener: Arc<AtomicU64>,
}

impl Default for MockWallet {
    fn default() -> Self {
        MockWallet {
            address: MOCK_WALLET_ADDRESS.into(),
            chain_id: json!("0x1"),
            balance: json!("0xde0b6b3a7640000"),
            signature: json!("0xsig"),
            exposes_accounts: true,
            grants_accounts: true,
            supports_events: true,
            preferred: false,
            wraps_signatures: false,
            ucan_sign_response: None,
            session_response: None,
            session_key: Arc::new(Mutex::new(generate_ed25519_key())),
            calls: Default::default(),
            listeners: Default::default(),
            next_listener: Default::default(),
        }
    }
}

impl MockWallet {
    /// `eth_accounts` answers with nothing until access is requested
    pub fn hiding_accounts(mut self) -> Self {
        self.exposes_accounts = false;
        self
    }

    /// No accounts at all, even after requesting access
    pub fn without_accounts(mut self) -> Self {
        self.exposes_accounts = false;
        self.grants_accounts = false;
        self
    }

    pub fn without_events(mut self) -> Self {
        self.supports_events = false;
        self
    }

    /// Identify as the native wallet
    pub fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_balance(mut self, balance: Value) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_chain_id(mut self, chain_id: Value) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Answer the session method with `response` verbatim
    pub fn with_session_response(mut self, response: Value) -> Self {
        self.session_response = Some(response);
        self
    }

    /// Answer the UCAN sign method with `{ "signature": … }`
    pub fn wrapping_signatures(mut self) -> Self {
        self.wraps_signatures = true;
        self
    }

    /// Answer `personal_sign`/`eth_sign` with `signature` verbatim
    pub fn with_message_signature(mut self, signature: Value) -> Self {
        self.signature = signature;
        self
    }

    /// Answer the UCAN sign method with `response` verbatim
    pub fn with_ucan_sign_response(mut self, response: Value) -> Self {
        self.ucan_sign_response = Some(response);
        self
    }

    pub fn address(&self) -> String {
        self.address.clone()
    }

    /// The DID of the current session key
    pub fn session_did(&self) -> String {
        signing_key_to_did(&self.current_key())
    }

    /// Replace the session key, as a wallet does when a session is renewed
    pub fn rotate_session_key(&self) {
        *self.session_key.lock().unwrap() = generate_ed25519_key();
    }

    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(method, _)| method).collect()
    }

    /// How many times `method` has been called
    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|(called, _)| called == method).count()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Deliver `event` to every handler registered for it
    pub fn emit(&self, event: ProviderEvent, payload: &Value) {
        let handlers: Vec<EventHandler> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, registered, _)| *registered == event)
            .map(|(_, _, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(payload);
        }
    }

    fn current_key(&self) -> SigningKey {
        self.session_key.lock().unwrap().clone()
    }

    fn accounts(&self, exposed: bool) -> Value {
        if exposed {
            json!([self.address])
        } else {
            json!([])
        }
    }

    fn session(&self, params: Option<&Value>) -> Value {
        if let Some(response) = &self.session_response {
            return response.clone();
        }

        let session_id = params
            .and_then(|params| params.get(0))
            .and_then(|request| request.get("sessionId"))
            .cloned()
            .unwrap_or(Value::Null);

        json!({ "id": session_id, "did": self.session_did() })
    }

    fn sign_ucan(&self, params: Option<&Value>) -> Result<Value> {
        let signing_input = params
            .and_then(|params| params.get(0))
            .and_then(|request| request.get("signingInput"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Missing signingInput"))?;

        if let Some(response) = &self.ucan_sign_response {
            return Ok(response.clone());
        }

        let signature =
            URL_SAFE_NO_PAD.encode(sign_ed25519(&self.current_key(), signing_input.as_bytes()));

        Ok(match self.wraps_signatures {
            true => json!({ "signature": signature }),
            false => json!(signature),
        })
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl WalletProvider for MockWallet {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_owned(), params.clone()));

        match method {
            "eth_accounts" => Ok(self.accounts(self.exposes_accounts)),
            "eth_requestAccounts" => Ok(self.accounts(self.grants_accounts)),
            "eth_chainId" => Ok(self.chain_id.clone()),
            "eth_getBalance" => Ok(self.balance.clone()),
            "personal_sign" | "eth_sign" => Ok(self.signature.clone()),
            "yeying_ucan_session" => Ok(self.session(params.as_ref())),
            "yeying_ucan_sign" => self.sign_ucan(params.as_ref()),
            _ => Err(anyhow!("Method not supported: {}", method)),
        }
    }

    fn is_preferred(&self) -> bool {
        self.preferred
    }

    fn subscribe(&self, event: ProviderEvent, handler: EventHandler) -> Option<Subscription> {
        if !self.supports_events {
            return None;
        }

        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, event, handler));

        let listeners = self.listeners.clone();
        Some(Subscription::new(move || {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.retain(|(registered, _, _)| *registered != id);
            }
        }))
    }
}
