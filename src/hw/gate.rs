//! Checks run before the host forwards a device's outbound HTTP request, and
//! the relay loop that feeds pin-server replies back to the device.
//!
//! The Tor gate always runs before the domain gate. Declining either one
//! fails the current device request with
//! [`ResolverError::UserDeclinedDeviceRequest`].

use super::whitelist::{domain_from_url, DeviceWhitelist};
use crate::{ResolverError, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// Answer to the Tor warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorDecision {
    /// Continue; with `enable_tor` the session is reconnected over Tor first.
    Accept { enable_tor: bool },
    Decline,
}

/// Answer to the unknown-domain warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainDecision {
    Accept { dont_ask_again: bool },
    Decline,
}

/// Warnings shown to the user before a device talks to the network.
#[async_trait::async_trait]
pub trait GatePrompter: Send + Sync {
    /// All target URLs are onion addresses while Tor is off.
    async fn confirm_tor(&self, urls: &[String]) -> Result<TorDecision>;

    /// The device wants to contact domains that are not allowed yet.
    async fn confirm_domains(&self, domains: &[String]) -> Result<DomainDecision>;
}

/// Tor setting of the session that carries pin-server traffic.
#[async_trait::async_trait]
pub trait TorControl: Send + Sync {
    fn is_tor_enabled(&self) -> bool;

    /// Turn Tor on and reconnect the session over it.
    async fn enable_tor_and_reconnect(&self) -> Result<()>;
}

/// Performs HTTP requests on behalf of the device.
#[async_trait::async_trait]
pub trait PinServerClient: Send + Sync {
    /// `params` is the device's `http_request.params` object; the reply holds
    /// either `body` or `error`.
    async fn http_request(&self, params: &Value) -> Result<Value>;
}

/// Message-level link to a device, e.g. CBOR frames over BLE.
#[async_trait::async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn exchange(&self, message: &Value) -> Result<Value>;
}

/// `http_request` a device embedded in its reply.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceHttpRequest {
    pub params: Value,
    pub urls: Vec<String>,
    /// Method name the device expects the pin-server reply under.
    pub on_reply: String,
}

impl DeviceHttpRequest {
    /// Extract `result.http_request` from a device reply, `None` when the
    /// reply is a final result.
    pub fn from_device_result(reply: &Value) -> Result<Option<Self>> {
        let Some(request) = reply.get("result").and_then(|r| r.get("http_request")) else {
            return Ok(None);
        };
        let params = request
            .get("params")
            .filter(|p| p.is_object())
            .cloned()
            .ok_or_else(|| ResolverError::protocol("http_request without params"))?;
        let urls = match params.get("urls") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(urls)) => urls
                .iter()
                .map(|u| {
                    u.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ResolverError::protocol("non-string url in http_request"))
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(ResolverError::protocol("http_request urls is not a list")),
        };
        let on_reply = request
            .get("on-reply")
            .and_then(Value::as_str)
            .ok_or_else(|| ResolverError::protocol("http_request without on-reply"))?
            .to_string();

        Ok(Some(Self {
            params,
            urls,
            on_reply,
        }))
    }

    /// Message carrying the pin-server `body` back to the device.
    pub fn reply_package(&self, id: &str, body: Value) -> Value {
        json!({
            "id": id,
            "method": self.on_reply,
            "params": body,
        })
    }
}

/// Tor gate, domain gate and forwarding for one device.
pub struct DeviceRequestGate {
    tor: Arc<dyn TorControl>,
    prompter: Arc<dyn GatePrompter>,
    whitelist: Arc<DeviceWhitelist>,
    pin_server: Arc<dyn PinServerClient>,
}

impl DeviceRequestGate {
    pub fn new(
        tor: Arc<dyn TorControl>,
        prompter: Arc<dyn GatePrompter>,
        whitelist: Arc<DeviceWhitelist>,
        pin_server: Arc<dyn PinServerClient>,
    ) -> Self {
        Self {
            tor,
            prompter,
            whitelist,
            pin_server,
        }
    }

    pub fn whitelist(&self) -> &Arc<DeviceWhitelist> {
        &self.whitelist
    }

    /// Run both gates in order.
    pub async fn authorize(&self, urls: &[String]) -> Result<()> {
        self.check_tor(urls).await?;
        self.check_domains(urls).await
    }

    pub async fn check_tor(&self, urls: &[String]) -> Result<()> {
        let onion_only = !urls.is_empty()
            && urls.iter().all(|u| u.trim().is_empty() || u.contains(".onion"));
        if !onion_only || self.tor.is_tor_enabled() {
            return Ok(());
        }

        log::debug!("Onion-only request with Tor disabled, asking user");
        match self.prompter.confirm_tor(urls).await? {
            TorDecision::Accept { enable_tor } => {
                if enable_tor {
                    log::info!("Reconnecting over Tor before device request");
                    self.tor.enable_tor_and_reconnect().await?;
                }
                Ok(())
            }
            TorDecision::Decline => Err(ResolverError::UserDeclinedDeviceRequest(
                "Tor warning declined".to_string(),
            )),
        }
    }

    pub async fn check_domains(&self, urls: &[String]) -> Result<()> {
        let mut requested = Vec::with_capacity(urls.len());
        for url in urls.iter().filter(|u| !u.trim().is_empty()) {
            let domain = domain_from_url(url)
                .ok_or_else(|| ResolverError::protocol(format!("device requested unparseable url '{}'", url)))?;
            requested.push(domain);
        }

        let new_domains = self.whitelist.new_domains(&requested)?;
        if new_domains.is_empty() {
            return Ok(());
        }

        if self.whitelist.warning_shown() {
            log::debug!("Domain warning already shown this session, allowing {:?}", new_domains);
            self.whitelist.approve_for_session(&new_domains);
            return Ok(());
        }

        match self.prompter.confirm_domains(&new_domains).await? {
            DomainDecision::Accept { dont_ask_again } => {
                self.whitelist.mark_warning_shown();
                if dont_ask_again {
                    self.whitelist.approve_persistently(&new_domains)?;
                } else {
                    self.whitelist.approve_for_session(&new_domains);
                }
                Ok(())
            }
            DomainDecision::Decline => Err(ResolverError::UserDeclinedDeviceRequest(format!(
                "untrusted domains declined: {}",
                new_domains.join(", ")
            ))),
        }
    }

    /// Gate and forward `request`; returns the pin-server `body`.
    pub async fn forward(&self, request: &DeviceHttpRequest) -> Result<Value> {
        self.authorize(&request.urls).await?;

        let reply = self.pin_server.http_request(&request.params).await?;
        if let Some(error) = reply.get("error") {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(ResolverError::protocol(format!("pin server error: {}", message)));
        }
        reply
            .get("body")
            .filter(|b| !b.is_null())
            .cloned()
            .ok_or_else(|| ResolverError::protocol("pin server reply without body"))
    }

    /// Send `message` and relay every `http_request` the device answers
    /// with, until it returns a final result.
    pub async fn exchange(&self, transport: &dyn DeviceTransport, message: Value) -> Result<Value> {
        let mut next_id = message
            .get("id")
            .and_then(|id| match id {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse::<u64>().ok(),
                _ => None,
            })
            .map_or(1, |id| id + 1);
        let mut reply = transport.exchange(&message).await?;

        loop {
            if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
                return Err(ResolverError::protocol(format!("device error: {}", error)));
            }
            let Some(request) = DeviceHttpRequest::from_device_result(&reply)? else {
                return Ok(reply);
            };
            let body = self.forward(&request).await?;
            let follow_up = request.reply_package(&next_id.to_string(), body);
            next_id += 1;
            reply = transport.exchange(&follow_up).await?;
        }
    }
}
