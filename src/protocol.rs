//! This module defines the Rust types that map to the two-factor call JSON
//! produced by the wallet service. Raw status objects are decoded once, at the
//! boundary, into the closed [`CallStatus`] variant the engine matches on.

use crate::error::{ResolverError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Status name used by the wallet service for BCUR decoding requests.
pub const BCUR_DECODE_NAME: &str = "bcur_decode";

/// A verification channel the server can deliver a code through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelMethod {
    Email,
    Phone,
    Sms,
    AuthenticatorApp,
    /// Server-defined method this client does not know about yet.
    Named(String),
}

impl ChannelMethod {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelMethod::Email => "email",
            ChannelMethod::Phone => "phone",
            ChannelMethod::Sms => "sms",
            ChannelMethod::AuthenticatorApp => "gauth",
            ChannelMethod::Named(name) => name,
        }
    }
}

impl From<&str> for ChannelMethod {
    fn from(value: &str) -> Self {
        match value {
            "email" => ChannelMethod::Email,
            "phone" => ChannelMethod::Phone,
            "sms" => ChannelMethod::Sms,
            "gauth" => ChannelMethod::AuthenticatorApp,
            other => ChannelMethod::Named(other.to_string()),
        }
    }
}

impl From<String> for ChannelMethod {
    fn from(value: String) -> Self {
        ChannelMethod::from(value.as_str())
    }
}

impl From<ChannelMethod> for String {
    fn from(method: ChannelMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for ChannelMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the in-flight privileged call, as returned by a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum CallStatus {
    /// Finished; carries the call's `result` payload.
    Done(Value),
    /// Failed on the server side.
    Error(String),
    /// Ready to be executed.
    Call,
    /// The server needs the client to pick a channel and request a code.
    RequestCode { methods: Vec<ChannelMethod> },
    /// The server waits for a code or device response.
    ResolveCode(ResolveRequest),
}

impl CallStatus {
    /// Decode a raw status object such as `{"status": "request_code", "methods": ["sms"]}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ResolverError::protocol("status object without 'status' field"))?;

        match status {
            "done" => Ok(CallStatus::Done(
                value.get("result").cloned().unwrap_or(Value::Null),
            )),
            "error" => Ok(CallStatus::Error(
                value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )),
            "call" => Ok(CallStatus::Call),
            "request_code" => {
                let methods = value
                    .get("methods")
                    .and_then(Value::as_array)
                    .ok_or_else(|| ResolverError::protocol("request_code without methods"))?
                    .iter()
                    .map(|m| {
                        m.as_str()
                            .map(ChannelMethod::from)
                            .ok_or_else(|| ResolverError::protocol("non-string method in request_code"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CallStatus::RequestCode { methods })
            }
            "resolve_code" => Ok(CallStatus::ResolveCode(ResolveRequest::from_status(value)?)),
            other => Err(ResolverError::protocol(format!("unknown call status '{}'", other))),
        }
    }

    /// Short name used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            CallStatus::Done(_) => "done",
            CallStatus::Error(_) => "error",
            CallStatus::Call => "call",
            CallStatus::RequestCode { .. } => "request_code",
            CallStatus::ResolveCode(_) => "resolve_code",
        }
    }
}

/// What the server needs in order to continue a `resolve_code` status.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveRequest {
    Software(SoftwareCodeRequest),
    Hardware(HardwareDeviceRequest),
    BcurDecode(BcurDecodeRequest),
}

impl ResolveRequest {
    fn from_status(value: &Value) -> Result<Self> {
        let name = value.get("name").and_then(Value::as_str);

        if let Some(required) = value.get("required_data").filter(|v| v.is_object()) {
            if required.get("action").is_some() || required.get("device").is_some() {
                return HardwareDeviceRequest::from_required_data(required).map(ResolveRequest::Hardware);
            }
        }

        if name == Some(BCUR_DECODE_NAME) {
            let auth_data = match value.get("auth_data") {
                Some(data) if !data.is_null() => serde_json::from_value(data.clone())
                    .map_err(|e| ResolverError::protocol(format!("invalid auth_data: {}", e)))?,
                _ => ResolveCodeAuthData::default(),
            };
            return Ok(ResolveRequest::BcurDecode(BcurDecodeRequest { auth_data }));
        }

        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(ChannelMethod::from)
            .ok_or_else(|| ResolverError::protocol("resolve_code without method or required_data"))?;
        let attempts_remaining = value
            .get("attempts_remaining")
            .and_then(Value::as_u64)
            .map(|n| {
                u32::try_from(n)
                    .map_err(|_| ResolverError::protocol(format!("attempts_remaining out of range: {}", n)))
            })
            .transpose()?;

        Ok(ResolveRequest::Software(SoftwareCodeRequest {
            method,
            attempts_remaining,
            retryable: attempts_remaining.map_or(true, |n| n > 0),
            name: name.map(str::to_string),
        }))
    }

    /// Channel of a software request, if this is one.
    pub fn software_method(&self) -> Option<&ChannelMethod> {
        match self {
            ResolveRequest::Software(request) => Some(&request.method),
            _ => None,
        }
    }
}

/// Code typed by the user, delivered over one of the [`ChannelMethod`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftwareCodeRequest {
    pub method: ChannelMethod,
    pub attempts_remaining: Option<u32>,
    /// False once the server reports no attempts left.
    pub retryable: bool,
    /// Name of the underlying operation, e.g. `send_raw_tx`.
    pub name: Option<String>,
}

/// Action the connected hardware device must perform.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareDeviceRequest {
    pub action: HwAction,
    pub device: DeviceDescriptor,
    /// The complete `required_data` object, action parameters included.
    pub required_data: Value,
}

impl HardwareDeviceRequest {
    pub fn from_required_data(required: &Value) -> Result<Self> {
        let device_name = required
            .get("device")
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let action = required
            .get("action")
            .and_then(Value::as_str)
            .map(HwAction::from)
            .ok_or_else(|| {
                ResolverError::device_protocol("required_data without action", "", device_name.clone())
            })?;
        let device = required
            .get("device")
            .cloned()
            .ok_or_else(|| {
                ResolverError::device_protocol("required_data without device", action.as_str(), device_name.clone())
            })
            .and_then(|d| {
                serde_json::from_value::<DeviceDescriptor>(d).map_err(|e| {
                    ResolverError::device_protocol(
                        format!("unparseable device descriptor: {}", e),
                        action.as_str(),
                        device_name.clone(),
                    )
                })
            })?;

        Ok(HardwareDeviceRequest {
            action,
            device,
            required_data: required.clone(),
        })
    }
}

/// BCUR payload the user has to scan from an air-gapped device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BcurDecodeRequest {
    pub auth_data: ResolveCodeAuthData,
}

/// Hardware actions the wallet service can request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HwAction {
    GetXpubs,
    SignMessage,
    SignTx,
    GetMasterBlindingKey,
    GetBlindingPublicKeys,
    GetBlindingNonces,
    GetBlindingFactors,
    Other(String),
}

impl HwAction {
    pub fn as_str(&self) -> &str {
        match self {
            HwAction::GetXpubs => "get_xpubs",
            HwAction::SignMessage => "sign_message",
            HwAction::SignTx => "sign_tx",
            HwAction::GetMasterBlindingKey => "get_master_blinding_key",
            HwAction::GetBlindingPublicKeys => "get_blinding_public_keys",
            HwAction::GetBlindingNonces => "get_blinding_nonces",
            HwAction::GetBlindingFactors => "get_blinding_factors",
            HwAction::Other(name) => name,
        }
    }
}

impl From<&str> for HwAction {
    fn from(value: &str) -> Self {
        match value {
            "get_xpubs" => HwAction::GetXpubs,
            "sign_message" => HwAction::SignMessage,
            "sign_tx" => HwAction::SignTx,
            "get_master_blinding_key" => HwAction::GetMasterBlindingKey,
            "get_blinding_public_keys" => HwAction::GetBlindingPublicKeys,
            "get_blinding_nonces" => HwAction::GetBlindingNonces,
            "get_blinding_factors" => HwAction::GetBlindingFactors,
            other => HwAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HwAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware device description as registered with the wallet service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub supports_low_r: bool,
    #[serde(default)]
    pub supports_arbitrary_scripts: bool,
    #[serde(default)]
    pub supports_host_unblinding: bool,
    #[serde(default)]
    pub supports_external_blinding: bool,
    #[serde(default)]
    pub supports_liquid: u32,
    #[serde(default)]
    pub supports_ae_protocol: u32,
}

impl DeviceDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            device_type: Some("hardware".to_string()),
            supports_low_r: false,
            supports_arbitrary_scripts: false,
            supports_host_unblinding: false,
            supports_external_blinding: false,
            supports_liquid: 0,
            supports_ae_protocol: 0,
        }
    }
}

/// Two-factor settings of the logged-in wallet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwoFactorConfig {
    #[serde(default)]
    pub all_methods: Vec<ChannelMethod>,
    #[serde(default)]
    pub enabled_methods: BTreeSet<ChannelMethod>,
    #[serde(default)]
    pub any_enabled: bool,
}

/// Progress of a multi-part BCUR scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveCodeAuthData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_indices: Option<Vec<u32>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BcurDecodeParams {
    pub part: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BcurEncodeParams {
    pub ur_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_words: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fragment_len: Option<u32>,
}

impl BcurEncodeParams {
    pub fn new(ur_type: &str, data: String) -> Self {
        Self {
            ur_type: ur_type.to_string(),
            data: Some(data),
            num_words: None,
            index: None,
            private_key: None,
            max_fragment_len: Some(40),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BcurEncodedData {
    pub parts: Vec<String>,
}

/// Fully decoded BCUR payload; the keys present depend on `ur_type`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct BcurDecodedData(pub Map<String, Value>);

impl BcurDecodedData {
    fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn ur_type(&self) -> Option<&str> {
        self.get_str("ur_type")
    }

    pub fn data(&self) -> Option<&str> {
        self.get_str("data")
    }

    pub fn psbt(&self) -> Option<&str> {
        self.get_str("psbt")
    }

    pub fn descriptor(&self) -> Option<&str> {
        self.get_str("descriptor")
    }

    pub fn result(&self) -> Option<&Map<String, Value>> {
        self.0.get("result").and_then(Value::as_object)
    }

    /// The value handed back to the wallet service as the resolved code.
    pub fn to_code(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}
