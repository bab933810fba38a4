use std::sync::Arc;

use thiserror::Error;

/// The ways in which logging in, refreshing, minting UCANs or talking to
/// storage on behalf of a wallet can fail. Every variant renders a message
/// suitable for showing to a person directly.
///
/// [AuthError] is [Clone] so that one failed refresh can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("No injected wallet provider found")]
    NoProvider,

    #[error("No account available")]
    NoAccount,

    #[error("Wallet request '{method}' failed: {error}")]
    Provider {
        method: String,
        error: Arc<anyhow::Error>,
    },

    #[error("HTTP request failed: {0}")]
    Transport(Arc<anyhow::Error>),

    #[error("Challenge request failed: {status} {body}")]
    ChallengeRequest { status: u16, body: String },

    #[error("Verify request failed: {status} {body}")]
    VerifyRequest { status: u16, body: String },

    #[error("Refresh request failed: {status} {body}")]
    RefreshRequest { status: u16, body: String },

    #[error("Logout request failed: {status} {body}")]
    LogoutRequest { status: u16, body: String },

    #[error("Challenge response missing challenge")]
    MissingChallenge,

    #[error("{0} response missing token")]
    MissingToken(&'static str),

    #[error("Invalid {0} response: expected JSON")]
    InvalidResponse(&'static str),

    #[error("Invalid wallet UCAN session response")]
    InvalidSessionResponse,

    #[error("Invalid signature response from '{0}'")]
    InvalidSignatureResponse(String),

    #[error("Invalid balance response")]
    InvalidBalanceResponse,

    #[error("Missing UCAN proof chain")]
    MissingProofChain,

    #[error("UCAN root audience mismatch: expected {expected}, found {found}")]
    AudienceMismatch { expected: String, found: String },

    #[error("Missing UCAN session key")]
    MissingSessionKey,

    #[error("Missing UCAN capabilities")]
    MissingCapabilities,

    #[error("Missing UCAN audience")]
    MissingAudience,

    #[error("Missing configuration: {0}")]
    MissingConfiguration(&'static str),

    #[error("WebDAV {operation} failed: {status} {status_text}")]
    WebDav {
        operation: String,
        status: u16,
        status_text: String,
    },

    #[error("Invalid UCAN token: {0}")]
    InvalidToken(String),

    #[error("UCAN verification failed: {0}")]
    Verification(String),

    #[error("Storage failure: {0}")]
    Storage(Arc<anyhow::Error>),

    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl AuthError {
    pub(crate) fn provider(method: &str, error: anyhow::Error) -> Self {
        AuthError::Provider {
            method: method.to_owned(),
            error: Arc::new(error),
        }
    }

    pub(crate) fn transport(error: anyhow::Error) -> Self {
        AuthError::Transport(Arc::new(error))
    }

    pub(crate) fn storage(error: anyhow::Error) -> Self {
        AuthError::Storage(Arc::new(error))
    }

    pub(crate) fn verification<M: Into<String>>(message: M) -> Self {
        AuthError::Verification(message.into())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(error: anyhow::Error) -> Self {
        AuthError::Other(Arc::new(error))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
