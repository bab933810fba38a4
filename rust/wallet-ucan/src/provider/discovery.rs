use std::{sync::RwLock, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use super::{Provider, WalletProvider};
use crate::error::{AuthError, AuthResult};

/// Reverse-DNS identifier announced by the native wallet
pub const NATIVE_WALLET_RDNS: &str = "io.github.yeying";

/// Fragment of the display name announced by the native wallet
pub const NATIVE_WALLET_NAME: &str = "yeying";

/// How long discovery waits for announcements before settling
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1000);

const DISCOVERY_CHANNEL_CAPACITY: usize = 32;

/// Metadata a wallet attaches to its announcement
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rdns: String,
}

#[derive(Clone)]
pub struct ProviderAnnouncement {
    pub provider: Provider,
    pub info: ProviderInfo,
}

impl std::fmt::Debug for ProviderAnnouncement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAnnouncement")
            .field("info", &self.info)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    /// A wallet replied to a provider request
    Announce(ProviderAnnouncement),
    /// The injected provider slot was (re)populated
    Initialized,
}

/// The signature by which the preferred wallet is recognized
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredProvider {
    pub rdns: String,
    pub name_fragment: String,
}

impl Default for PreferredProvider {
    fn default() -> Self {
        PreferredProvider {
            rdns: NATIVE_WALLET_RDNS.into(),
            name_fragment: NATIVE_WALLET_NAME.into(),
        }
    }
}

impl PreferredProvider {
    /// A provider matches if it self-identifies as preferred, or if its
    /// announcement carries the preferred rdns or a name containing the
    /// preferred fragment (both compared case-insensitively)
    pub fn matches(&self, provider: &dyn WalletProvider, info: Option<&ProviderInfo>) -> bool {
        if provider.is_preferred() {
            return true;
        }

        match info {
            Some(info) => {
                info.rdns.to_lowercase() == self.rdns.to_lowercase()
                    || info
                        .name
                        .to_lowercase()
                        .contains(&self.name_fragment.to_lowercase())
            }
            None => false,
        }
    }

    fn select_best(&self, candidates: &[ProviderAnnouncement], prefer: bool) -> Option<Provider> {
        if prefer {
            if let Some(preferred) = candidates
                .iter()
                .find(|candidate| self.matches(candidate.provider.as_ref(), Some(&candidate.info)))
            {
                return Some(preferred.provider.clone());
            }
        }

        candidates.first().map(|candidate| candidate.provider.clone())
    }
}

#[derive(Clone, Debug)]
pub struct ProviderOptions {
    /// Wait for (and favor) the preferred wallet over any other
    pub prefer_native: bool,
    pub timeout: Duration,
    pub preferred: PreferredProvider,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        ProviderOptions {
            prefer_native: true,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            preferred: PreferredProvider::default(),
        }
    }
}

/// The event target discovery runs over: wallets listen for provider
/// requests and reply with announcements; the host signals when its injected
/// provider slot is populated.
#[derive(Clone, Debug)]
pub struct DiscoveryBus {
    events: broadcast::Sender<DiscoveryEvent>,
    requests: broadcast::Sender<()>,
}

impl Default for DiscoveryBus {
    fn default() -> Self {
        let (events, _) = broadcast::channel(DISCOVERY_CHANNEL_CAPACITY);
        let (requests, _) = broadcast::channel(DISCOVERY_CHANNEL_CAPACITY);
        DiscoveryBus { events, requests }
    }
}

impl DiscoveryBus {
    /// Reply to a provider request. Announcements made while nobody is
    /// listening are dropped.
    pub fn announce(&self, provider: Provider, info: ProviderInfo) {
        let _ = self
            .events
            .send(DiscoveryEvent::Announce(ProviderAnnouncement { provider, info }));
    }

    pub fn notify_initialized(&self) {
        let _ = self.events.send(DiscoveryEvent::Initialized);
    }

    /// A stream of provider requests, for wallets that want to announce
    /// themselves
    pub fn on_request(&self) -> broadcast::Receiver<()> {
        self.requests.subscribe()
    }

    /// The number of discovery listeners currently attached
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn listen(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    fn request_providers(&self) {
        if self.requests.send(()).is_err() {
            trace!("No wallet is listening for provider requests");
        }
    }
}

/// The environment a wallet may be injected into. A host without a
/// [DiscoveryBus] is headless: discovery is skipped and only the directly
/// injected provider (if any) is considered.
pub struct ProviderHost {
    injected: RwLock<Option<Provider>>,
    bus: Option<DiscoveryBus>,
}

impl ProviderHost {
    pub fn headless(injected: Option<Provider>) -> Self {
        ProviderHost {
            injected: RwLock::new(injected),
            bus: None,
        }
    }

    pub fn interactive(injected: Option<Provider>, bus: DiscoveryBus) -> Self {
        ProviderHost {
            injected: RwLock::new(injected),
            bus: Some(bus),
        }
    }

    pub fn bus(&self) -> Option<&DiscoveryBus> {
        self.bus.as_ref()
    }

    pub fn injected(&self) -> Option<Provider> {
        match self.injected.read() {
            Ok(injected) => injected.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Populate the injected provider slot, as a wallet extension does when
    /// it loads after the page
    pub fn inject(&self, provider: Provider) {
        match self.injected.write() {
            Ok(mut injected) => *injected = Some(provider),
            Err(poisoned) => *poisoned.into_inner() = Some(provider),
        }
    }

    /// Find a wallet provider. The injected provider is returned immediately
    /// when it is the preferred one; otherwise announcements are collected
    /// until the preferred wallet shows up or `options.timeout` elapses, at
    /// which point the best candidate wins: a preferred announcement, then
    /// the first announcement, then the injected provider.
    ///
    /// Resolution happens once; the discovery listener is detached before
    /// this returns.
    pub async fn get_provider(&self, options: &ProviderOptions) -> Option<Provider> {
        let prefer = options.prefer_native;
        let window_provider = self.injected();

        if prefer {
            if let Some(provider) = &window_provider {
                if options.preferred.matches(provider.as_ref(), None) {
                    debug!("Injected provider is the preferred wallet");
                    return window_provider;
                }
            }
        }

        let Some(bus) = &self.bus else {
            return window_provider;
        };

        let mut events = bus.listen();
        bus.request_providers();

        if !prefer && window_provider.is_some() {
            return window_provider;
        }

        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);

        let mut discovered: Vec<ProviderAnnouncement> = Vec::new();
        let mut awaiting_initialized = true;

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.recv() => match event {
                    Ok(DiscoveryEvent::Announce(announcement)) => {
                        debug!(
                            "Wallet announced: {} ({})",
                            announcement.info.name, announcement.info.rdns
                        );
                        if prefer
                            && options
                                .preferred
                                .matches(announcement.provider.as_ref(), Some(&announcement.info))
                        {
                            return Some(announcement.provider);
                        }
                        discovered.push(announcement);
                    }
                    Ok(DiscoveryEvent::Initialized) if awaiting_initialized => {
                        awaiting_initialized = false;
                        if let Some(injected) = self.injected() {
                            if prefer && options.preferred.matches(injected.as_ref(), None) {
                                return Some(injected);
                            }
                        }
                    }
                    Ok(DiscoveryEvent::Initialized) => (),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Discovery missed {} wallet announcements", skipped);
                    }
                    Err(RecvError::Closed) => {
                        (&mut deadline).await;
                        break;
                    }
                }
            }
        }

        options
            .preferred
            .select_best(&discovered, prefer)
            .or(window_provider)
            .or_else(|| self.injected())
    }

    /// Same as [ProviderHost::get_provider], but fails with
    /// [AuthError::NoProvider] when nothing was found
    pub async fn require_provider(&self, options: &ProviderOptions) -> AuthResult<Provider> {
        self.get_provider(options).await.ok_or(AuthError::NoProvider)
    }
}
