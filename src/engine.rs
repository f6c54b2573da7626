//! The two-factor call state machine.
//!
//! [`TwoFactorCallEngine::resolve`] polls the call status, performs exactly
//! one action for it and polls again, until the call reports `done` or
//! `error`. Every wait on a human, a device or the network can be interrupted
//! through the engine's [`CancelToken`]; calls that mutate server state are
//! never raced against it.

use crate::cancel::CancelToken;
use crate::channel::CodePrompt;
use crate::protocol::{
    BcurDecodeRequest, CallStatus, ChannelMethod, ResolveRequest, SoftwareCodeRequest,
};
use crate::session::{CallStatusSource, ResolverServices};
use crate::{ResolverError, Result};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

/// Where a session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Polling,
    Call,
    RequestCode,
    ResolveCode,
    Done,
    Failed,
    /// Stopped by a declined device request; `resolve` may be called again.
    Suspended,
}

impl EngineState {
    pub fn is_finished(self) -> bool {
        matches!(self, EngineState::Done | EngineState::Failed)
    }
}

/// Progress notifications for the host, e.g. to toggle spinners.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StatusPolled { status: &'static str },
    AwaitingUser,
    AwaitingDevice { action: String },
    AwaitingConnectivity,
    Resumed,
    Finished { success: bool },
}

pub struct TwoFactorCallEngine {
    session_id: Uuid,
    source: Box<dyn CallStatusSource>,
    services: ResolverServices,
    cancel: CancelToken,
    previous_resolve: Option<ResolveRequest>,
    state: EngineState,
    events: broadcast::Sender<EngineEvent>,
}

impl TwoFactorCallEngine {
    pub fn new(source: Box<dyn CallStatusSource>, services: ResolverServices) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session_id: Uuid::new_v4(),
            source,
            services,
            cancel: CancelToken::new(),
            previous_resolve: None,
            state: EngineState::Idle,
            events,
        }
    }

    pub fn from_source<S: CallStatusSource + 'static>(source: S, services: ResolverServices) -> Self {
        Self::new(Box::new(source), services)
    }

    /// Use a token shared with the host instead of a private one.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Drive the call to completion and return its `result` payload.
    pub async fn resolve(&mut self) -> Result<Value> {
        match self.state {
            EngineState::Done | EngineState::Failed => {
                return Err(ResolverError::InvalidState(format!(
                    "session {} already finished ({:?})",
                    self.session_id, self.state
                )));
            }
            EngineState::Suspended => {
                log::info!("Resolver session {} resumed", self.session_id);
                self.emit(EngineEvent::Resumed);
            }
            _ => log::info!("Resolver session {} started", self.session_id),
        }

        let outcome = self.run().await;
        match &outcome {
            Ok(_) => {
                self.set_state(EngineState::Done);
                log::info!("Resolver session {} finished", self.session_id);
                self.emit(EngineEvent::Finished { success: true });
            }
            Err(e) if !e.is_terminal() => {
                self.set_state(EngineState::Suspended);
                log::info!("Resolver session {} suspended: {}", self.session_id, e);
            }
            Err(e) => {
                self.set_state(EngineState::Failed);
                match e {
                    ResolverError::Protocol { message, action, device } => log::error!(
                        "Resolver session {} failed: {} (action: {:?}, device: {:?})",
                        self.session_id,
                        message,
                        action,
                        device
                    ),
                    other => log::warn!("Resolver session {} failed: {}", self.session_id, other),
                }
                self.emit(EngineEvent::Finished { success: false });
            }
        }
        outcome
    }

    async fn run(&mut self) -> Result<Value> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }

            self.set_state(EngineState::Polling);
            let status = self.source.get_status().await?;
            self.emit(EngineEvent::StatusPolled { status: status.kind() });

            match status {
                CallStatus::Done(result) => return Ok(result),
                CallStatus::Error(message) => return Err(ResolverError::Server(message)),
                CallStatus::Call => {
                    self.set_state(EngineState::Call);
                    self.wait_for_connectivity().await?;
                    self.source.perform_call().await?;
                }
                CallStatus::RequestCode { methods } => {
                    self.set_state(EngineState::RequestCode);
                    self.request_code(&methods).await?;
                }
                CallStatus::ResolveCode(request) => {
                    self.set_state(EngineState::ResolveCode);
                    match &request {
                        ResolveRequest::Software(software) => self.resolve_software(software).await?,
                        ResolveRequest::Hardware(hardware) => self.resolve_hardware(hardware).await?,
                        ResolveRequest::BcurDecode(bcur) => self.resolve_bcur(bcur).await?,
                    }
                    self.previous_resolve = Some(request);
                }
            }
        }
    }

    async fn request_code(&mut self, methods: &[ChannelMethod]) -> Result<()> {
        let method = match methods {
            [] => return Err(ResolverError::protocol("request_code without any method")),
            [only] => only.clone(),
            _ => {
                self.emit(EngineEvent::AwaitingUser);
                let chosen = self
                    .cancel
                    .run(self.services.channels.choose_method(methods))
                    .await?;
                self.wait_for_connectivity().await?;
                chosen
            }
        };
        log::debug!("Requesting code over {}", method);
        self.source.request_code(&method).await
    }

    async fn resolve_software(&mut self, request: &SoftwareCodeRequest) -> Result<()> {
        let prompt = CodePrompt {
            method: request.method.clone(),
            attempts_remaining: request.attempts_remaining,
            retryable: request.retryable,
            allow_call_method_upgrade: self.call_upgrade_allowed().await?,
            network: self.services.network.clone(),
            previous_attempt_failed: self.previous_resolve.as_ref().and_then(ResolveRequest::software_method)
                == Some(&ChannelMethod::AuthenticatorApp),
        };

        self.emit(EngineEvent::AwaitingUser);
        let code = self
            .cancel
            .run(self.services.channels.request_text_code(&prompt))
            .await?;
        self.wait_for_connectivity().await?;
        self.source.resolve_code(&code).await
    }

    /// A failed config fetch only costs the upgrade offer.
    async fn call_upgrade_allowed(&self) -> Result<bool> {
        let Some(source) = self.services.two_factor_config.clone() else {
            return Ok(false);
        };
        match self.cancel.run(source.get_current_config()).await {
            Ok(config) => Ok(self.services.call_method_policy.allows_upgrade(&config)),
            Err(ResolverError::Cancelled) => Err(ResolverError::Cancelled),
            Err(e) => {
                log::warn!("Could not fetch two-factor config: {}", e);
                Ok(false)
            }
        }
    }

    #[cfg(feature = "hardware-wallets")]
    async fn resolve_hardware(&mut self, request: &crate::protocol::HardwareDeviceRequest) -> Result<()> {
        let bridge = self.services.hardware.clone().ok_or_else(|| {
            ResolverError::device_protocol(
                "hardware request but no device is attached",
                request.action.as_str(),
                request.device.name.clone(),
            )
        })?;

        self.emit(EngineEvent::AwaitingDevice {
            action: request.action.to_string(),
        });
        let response = self
            .cancel
            .run(bridge.resolve_code(request, &self.services.network))
            .await?;
        self.source.resolve_code(&response.to_string()).await
    }

    #[cfg(not(feature = "hardware-wallets"))]
    async fn resolve_hardware(&mut self, request: &crate::protocol::HardwareDeviceRequest) -> Result<()> {
        Err(ResolverError::device_protocol(
            "hardware wallet support is not enabled",
            request.action.as_str(),
            request.device.name.clone(),
        ))
    }

    async fn resolve_bcur(&mut self, request: &BcurDecodeRequest) -> Result<()> {
        let bcur = self
            .services
            .bcur
            .clone()
            .ok_or_else(|| ResolverError::protocol("bcur_decode requested but no QR channel is configured"))?;

        self.emit(EngineEvent::AwaitingUser);
        let code = self.cancel.run(bcur.decode_bcur(&request.auth_data)).await?;
        self.source.resolve_code(&code).await
    }

    async fn wait_for_connectivity(&self) -> Result<()> {
        let events = &self.events;
        self.services
            .connectivity
            .wait_until_connected_with(&self.cancel, |attempt| {
                if attempt == 1 {
                    let _ = events.send(EngineEvent::AwaitingConnectivity);
                }
            })
            .await
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            log::debug!(
                "Resolver session {}: {:?} -> {:?}",
                self.session_id,
                self.state,
                state
            );
            self.state = state;
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
