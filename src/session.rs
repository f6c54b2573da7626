//! Interfaces into the wallet session and the set of shared services a
//! resolver session is built from.

use crate::channel::{BcurChannel, CodeChannelResolver};
use crate::connectivity::{ConnectivityGate, ConnectivityState};
#[cfg(feature = "hardware-wallets")]
use crate::hw::HardwareProtocolBridge;
use crate::protocol::{CallStatus, ChannelMethod, TwoFactorConfig};
use crate::utils::config::{CallMethodPolicy, ResolverConfig};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;

/// A single privileged call awaiting two-factor or device authorization.
///
/// The engine owns its source exclusively and never invokes two of the
/// mutating methods concurrently.
#[async_trait::async_trait]
pub trait CallStatusSource: Send + Sync {
    /// Poll the current status of the call.
    async fn get_status(&mut self) -> Result<CallStatus>;

    /// Execute the call once it reports `call`.
    async fn perform_call(&mut self) -> Result<()>;

    /// Ask the server to send a code over `method`.
    async fn request_code(&mut self, method: &ChannelMethod) -> Result<()>;

    /// Hand the code or device response back to the server.
    async fn resolve_code(&mut self, code: &str) -> Result<()>;
}

/// A call that speaks raw wallet-service JSON, like the GDK `GA_twofactor_*`
/// functions.
#[async_trait::async_trait]
pub trait RawTwoFactorCall: Send + Sync {
    async fn get_status(&mut self) -> Result<Value>;
    async fn call(&mut self) -> Result<()>;
    async fn request_code(&mut self, method: &str) -> Result<()>;
    async fn resolve_code(&mut self, code: &str) -> Result<()>;
}

/// Adapter decoding the status JSON of a [`RawTwoFactorCall`] at the boundary.
pub struct JsonCallSource<C> {
    inner: C,
}

impl<C: RawTwoFactorCall> JsonCallSource<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait::async_trait]
impl<C: RawTwoFactorCall> CallStatusSource for JsonCallSource<C> {
    async fn get_status(&mut self) -> Result<CallStatus> {
        let raw = self.inner.get_status().await?;
        CallStatus::from_json(&raw)
    }

    async fn perform_call(&mut self) -> Result<()> {
        self.inner.call().await
    }

    async fn request_code(&mut self, method: &ChannelMethod) -> Result<()> {
        self.inner.request_code(method.as_str()).await
    }

    async fn resolve_code(&mut self, code: &str) -> Result<()> {
        self.inner.resolve_code(code).await
    }
}

/// Read access to the wallet's two-factor settings.
#[async_trait::async_trait]
pub trait TwoFactorConfigSource: Send + Sync {
    async fn get_current_config(&self) -> Result<TwoFactorConfig>;
}

/// Shared collaborators handed to every resolver session.
///
/// Cloning is cheap; the services themselves are reference counted.
#[derive(Clone)]
pub struct ResolverServices {
    pub channels: Arc<dyn CodeChannelResolver>,
    pub connectivity: ConnectivityGate,
    pub two_factor_config: Option<Arc<dyn TwoFactorConfigSource>>,
    pub bcur: Option<Arc<dyn BcurChannel>>,
    #[cfg(feature = "hardware-wallets")]
    pub hardware: Option<Arc<HardwareProtocolBridge>>,
    pub call_method_policy: CallMethodPolicy,
    /// Network identifier, e.g. `mainnet` or `testnet-liquid`
    pub network: String,
}

impl ResolverServices {
    pub fn new(channels: Arc<dyn CodeChannelResolver>, connectivity: ConnectivityGate) -> Self {
        Self {
            channels,
            connectivity,
            two_factor_config: None,
            bcur: None,
            #[cfg(feature = "hardware-wallets")]
            hardware: None,
            call_method_policy: CallMethodPolicy::default(),
            network: "mainnet".to_string(),
        }
    }

    /// Build services from a loaded configuration.
    pub fn from_config(
        config: &ResolverConfig,
        channels: Arc<dyn CodeChannelResolver>,
        connectivity: Arc<dyn ConnectivityState>,
    ) -> Self {
        let gate = ConnectivityGate::new(connectivity, config.backoff.clone());
        let mut services = Self::new(channels, gate);
        services.call_method_policy = config.call_method_policy.clone();
        services.network = config.network.clone();
        services
    }

    pub fn with_two_factor_config(mut self, source: Arc<dyn TwoFactorConfigSource>) -> Self {
        self.two_factor_config = Some(source);
        self
    }

    pub fn with_bcur(mut self, bcur: Arc<dyn BcurChannel>) -> Self {
        self.bcur = Some(bcur);
        self
    }

    #[cfg(feature = "hardware-wallets")]
    pub fn with_hardware(mut self, bridge: Arc<HardwareProtocolBridge>) -> Self {
        self.hardware = Some(bridge);
        self
    }

    pub fn with_call_method_policy(mut self, policy: CallMethodPolicy) -> Self {
        self.call_method_policy = policy;
        self
    }

    pub fn with_network(mut self, network: &str) -> Self {
        self.network = network.to_string();
        self
    }
}
