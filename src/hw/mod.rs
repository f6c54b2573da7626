//! Hardware wallet support for the resolver.
//!
//! When the wallet service needs a signing device it answers a poll with a
//! `resolve_code` status whose `required_data` names an action. The
//! [`HardwareProtocolBridge`] decodes the action parameters, drives the
//! [`HardwareDevice`] and encodes the device output in the JSON shape the
//! service expects back as the resolved code.
//!
//! Devices that talk to a pin server do so through the host. Such traffic goes
//! through [`gate::DeviceRequestGate`], which applies the Tor and domain
//! checks before anything leaves the machine.

pub mod gate;
pub mod qr;
pub mod whitelist;

pub use gate::{
    DeviceHttpRequest, DeviceRequestGate, DeviceTransport, DomainDecision, GatePrompter,
    PinServerClient, TorControl, TorDecision,
};
pub use qr::QrHandshake;
pub use whitelist::{domain_from_url, DeviceWhitelist, FileWhitelistStore, MemoryWhitelistStore, WhitelistStore};

use crate::protocol::{DeviceDescriptor, HardwareDeviceRequest, HwAction};
use crate::{ResolverError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Parameters of `get_xpubs`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetXpubsParams {
    /// BIP32 paths, one xpub is returned per path
    #[serde(default)]
    pub paths: Vec<Vec<u32>>,
}

/// Parameters of `sign_message`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignMessageParams {
    pub path: Vec<u32>,
    pub message: String,
    /// Anti-exfil protocol in use
    #[serde(default)]
    pub use_ae_protocol: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ae_host_commitment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ae_host_entropy: Option<String>,
}

/// Parameters of `sign_tx`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignTxParams {
    pub transaction: Value,
    #[serde(default)]
    pub signing_inputs: Vec<Value>,
    #[serde(default)]
    pub transaction_outputs: Vec<Value>,
    #[serde(default)]
    pub use_ae_protocol: bool,
}

/// Parameters of `get_blinding_public_keys`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlindingPublicKeysParams {
    #[serde(default)]
    pub scripts: Vec<String>,
}

/// Parameters of `get_blinding_nonces`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlindingNoncesParams {
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub public_keys: Vec<String>,
    /// Also return the blinding public keys of `scripts`
    #[serde(default)]
    pub blinding_keys_required: bool,
}

/// Parameters of `get_blinding_factors`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlindingFactorsParams {
    #[serde(default)]
    pub used_utxos: Vec<Value>,
    #[serde(default)]
    pub transaction_outputs: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignMessageResult {
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_commitment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignTxResult {
    pub signatures: Vec<String>,
    #[serde(default)]
    pub signer_commitments: Vec<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlindingNoncesResult {
    pub nonces: Vec<String>,
    #[serde(default)]
    pub public_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlindingFactorsResult {
    pub amountblinders: Vec<String>,
    pub assetblinders: Vec<String>,
}

/// Per-request context handed to the device.
#[derive(Clone)]
pub struct DeviceContext {
    /// Network identifier, e.g. `mainnet`
    pub network: String,
    gate: Option<Arc<DeviceRequestGate>>,
}

impl DeviceContext {
    pub fn new(network: &str, gate: Option<Arc<DeviceRequestGate>>) -> Self {
        Self {
            network: network.to_string(),
            gate,
        }
    }

    pub fn gate(&self) -> Option<&Arc<DeviceRequestGate>> {
        self.gate.as_ref()
    }

    /// Send `message` over `transport`, relaying any pin-server traffic.
    ///
    /// Without a gate, a device reply asking for HTTP is a protocol error.
    pub async fn exchange(&self, transport: &dyn DeviceTransport, message: Value) -> Result<Value> {
        match &self.gate {
            Some(gate) => gate.exchange(transport, message).await,
            None => {
                let reply = transport.exchange(&message).await?;
                if DeviceHttpRequest::from_device_result(&reply)?.is_some() {
                    return Err(ResolverError::protocol(
                        "device requested network access but no request gate is configured",
                    ));
                }
                Ok(reply)
            }
        }
    }
}

/// Hardware signing device
#[async_trait::async_trait]
pub trait HardwareDevice: Send + Sync {
    /// Device description as registered with the wallet service
    fn descriptor(&self) -> DeviceDescriptor;

    /// Extended public keys for the requested paths
    async fn get_xpubs(&self, ctx: &DeviceContext, params: &GetXpubsParams) -> Result<Vec<String>>;

    /// Sign a message with the key at the given path
    async fn sign_message(&self, ctx: &DeviceContext, params: &SignMessageParams) -> Result<SignMessageResult>;

    /// Sign the inputs of a transaction
    async fn sign_tx(&self, ctx: &DeviceContext, params: &SignTxParams) -> Result<SignTxResult>;

    /// Export the master blinding key, `None` if the user refuses on the device
    async fn get_master_blinding_key(&self, ctx: &DeviceContext) -> Result<Option<String>>;

    /// Blinding public keys for the given scripts
    async fn get_blinding_public_keys(
        &self,
        ctx: &DeviceContext,
        params: &BlindingPublicKeysParams,
    ) -> Result<Vec<String>>;

    /// ECDH nonces for unblinding
    async fn get_blinding_nonces(
        &self,
        ctx: &DeviceContext,
        params: &BlindingNoncesParams,
    ) -> Result<BlindingNoncesResult>;

    /// Amount and asset blinding factors for the transaction outputs
    async fn get_blinding_factors(
        &self,
        ctx: &DeviceContext,
        params: &BlindingFactorsParams,
    ) -> Result<BlindingFactorsResult>;
}

/// Host notifications around steps that need the user at the device.
pub trait DeviceInteraction: Send + Sync {
    fn interaction_started(&self, device: &DeviceDescriptor, action: &HwAction);
    fn interaction_finished(&self, device: &DeviceDescriptor, action: &HwAction);
}

/// Translates `resolve_code` hardware requests into device calls.
pub struct HardwareProtocolBridge {
    device: Arc<dyn HardwareDevice>,
    interaction: Option<Arc<dyn DeviceInteraction>>,
    gate: Option<Arc<DeviceRequestGate>>,
}

impl HardwareProtocolBridge {
    pub fn new(device: Arc<dyn HardwareDevice>) -> Self {
        Self {
            device,
            interaction: None,
            gate: None,
        }
    }

    pub fn with_interaction(mut self, interaction: Arc<dyn DeviceInteraction>) -> Self {
        self.interaction = Some(interaction);
        self
    }

    pub fn with_gate(mut self, gate: Arc<DeviceRequestGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn device(&self) -> &Arc<dyn HardwareDevice> {
        &self.device
    }

    pub fn gate(&self) -> Option<&Arc<DeviceRequestGate>> {
        self.gate.as_ref()
    }

    /// Forget session approvals once the device goes away.
    pub fn device_disconnected(&self) {
        if let Some(gate) = &self.gate {
            gate.whitelist().reset_session();
        }
    }

    /// Run the requested action and return the JSON the wallet service
    /// expects as resolved code.
    pub async fn resolve_code(&self, request: &HardwareDeviceRequest, network: &str) -> Result<Value> {
        let ctx = DeviceContext::new(network, self.gate.clone());
        let device_name = request.device.name.as_str();
        log::debug!("Device {} handling action {}", device_name, request.action);

        let result = self.dispatch(&ctx, request).await;
        if let Err(ResolverError::Protocol { message, .. }) = &result {
            log::error!(
                "Device protocol error in {} on {}: {}",
                request.action,
                device_name,
                message
            );
        }
        result
    }

    async fn dispatch(&self, ctx: &DeviceContext, request: &HardwareDeviceRequest) -> Result<Value> {
        match &request.action {
            HwAction::GetXpubs => {
                let params: GetXpubsParams = decode_params(request)?;
                let xpubs = self.device.get_xpubs(ctx, &params).await?;
                if xpubs.len() != params.paths.len() {
                    return Err(ResolverError::device_protocol(
                        format!("device returned {} xpubs for {} paths", xpubs.len(), params.paths.len()),
                        request.action.as_str(),
                        request.device.name.clone(),
                    ));
                }
                Ok(serde_json::json!({ "xpubs": xpubs }))
            }
            HwAction::SignMessage => {
                let params: SignMessageParams = decode_params(request)?;
                encode_result(request, self.device.sign_message(ctx, &params).await?)
            }
            HwAction::SignTx => {
                let params: SignTxParams = decode_params(request)?;
                encode_result(request, self.device.sign_tx(ctx, &params).await?)
            }
            HwAction::GetMasterBlindingKey => {
                if let Some(interaction) = &self.interaction {
                    interaction.interaction_started(&request.device, &request.action);
                }
                let key = self.device.get_master_blinding_key(ctx).await;
                if let Some(interaction) = &self.interaction {
                    interaction.interaction_finished(&request.device, &request.action);
                }
                Ok(serde_json::json!({ "master_blinding_key": key?.unwrap_or_default() }))
            }
            HwAction::GetBlindingPublicKeys => {
                let params: BlindingPublicKeysParams = decode_params(request)?;
                let public_keys = self.device.get_blinding_public_keys(ctx, &params).await?;
                Ok(serde_json::json!({ "public_keys": public_keys }))
            }
            HwAction::GetBlindingNonces => {
                let params: BlindingNoncesParams = decode_params(request)?;
                encode_result(request, self.device.get_blinding_nonces(ctx, &params).await?)
            }
            HwAction::GetBlindingFactors => {
                let params: BlindingFactorsParams = decode_params(request)?;
                encode_result(request, self.device.get_blinding_factors(ctx, &params).await?)
            }
            HwAction::Other(name) => Err(ResolverError::device_protocol(
                format!("unsupported hardware action '{}'", name),
                name.clone(),
                request.device.name.clone(),
            )),
        }
    }
}

fn decode_params<T: DeserializeOwned>(request: &HardwareDeviceRequest) -> Result<T> {
    serde_json::from_value(request.required_data.clone()).map_err(|e| {
        ResolverError::device_protocol(
            format!("invalid required_data: {}", e),
            request.action.as_str(),
            request.device.name.clone(),
        )
    })
}

fn encode_result<T: Serialize>(request: &HardwareDeviceRequest, result: T) -> Result<Value> {
    serde_json::to_value(result).map_err(|e| {
        ResolverError::device_protocol(
            format!("unencodable device response: {}", e),
            request.action.as_str(),
            request.device.name.clone(),
        )
    })
}
