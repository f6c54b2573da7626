#![allow(dead_code)]

use gdk_resolver::channel::{CodeChannelResolver, CodePrompt};
use gdk_resolver::connectivity::ConnectivityState;
use gdk_resolver::protocol::{ChannelMethod, TwoFactorConfig};
use gdk_resolver::session::{JsonCallSource, RawTwoFactorCall, TwoFactorConfigSource};
use gdk_resolver::{ResolverError, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// One interaction with the wallet service, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    GetStatus,
    Call,
    RequestCode(String),
    ResolveCode(String),
}

pub type CallLog = Arc<Mutex<Vec<Recorded>>>;

/// Wallet-service call that replays status JSON and records every request.
pub struct ScriptedCall {
    statuses: VecDeque<Value>,
    log: CallLog,
}

impl ScriptedCall {
    pub fn new(statuses: Vec<Value>) -> (JsonCallSource<Self>, CallLog) {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let call = Self {
            statuses: statuses.into(),
            log: log.clone(),
        };
        (JsonCallSource::new(call), log)
    }

    fn record(&self, entry: Recorded) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait::async_trait]
impl RawTwoFactorCall for ScriptedCall {
    async fn get_status(&mut self) -> Result<Value> {
        self.record(Recorded::GetStatus);
        self.statuses
            .pop_front()
            .ok_or_else(|| ResolverError::protocol("status script exhausted"))
    }

    async fn call(&mut self) -> Result<()> {
        self.record(Recorded::Call);
        Ok(())
    }

    async fn request_code(&mut self, method: &str) -> Result<()> {
        self.record(Recorded::RequestCode(method.to_string()));
        Ok(())
    }

    async fn resolve_code(&mut self, code: &str) -> Result<()> {
        self.record(Recorded::ResolveCode(code.to_string()));
        Ok(())
    }
}

pub fn mutating_calls(log: &CallLog) -> Vec<Recorded> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|r| **r != Recorded::GetStatus)
        .cloned()
        .collect()
}

/// Prompt answers given in advance.
#[derive(Default)]
pub struct ScriptedPrompts {
    codes: Mutex<VecDeque<Result<String>>>,
    methods: Mutex<VecDeque<ChannelMethod>>,
    pub code_prompts: Mutex<Vec<CodePrompt>>,
    pub method_prompts: Mutex<Vec<Vec<ChannelMethod>>>,
}

impl ScriptedPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(self, code: &str) -> Self {
        self.codes.lock().unwrap().push_back(Ok(code.to_string()));
        self
    }

    pub fn with_code_error(self, error: ResolverError) -> Self {
        self.codes.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_method(self, method: ChannelMethod) -> Self {
        self.methods.lock().unwrap().push_back(method);
        self
    }

    pub fn code_prompts(&self) -> Vec<CodePrompt> {
        self.code_prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CodeChannelResolver for ScriptedPrompts {
    async fn request_text_code(&self, prompt: &CodePrompt) -> Result<String> {
        self.code_prompts.lock().unwrap().push(prompt.clone());
        self.codes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ResolverError::UserCancelled))
    }

    async fn choose_method(&self, methods: &[ChannelMethod]) -> Result<ChannelMethod> {
        self.method_prompts.lock().unwrap().push(methods.to_vec());
        self.methods
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ResolverError::UserCancelled)
    }
}

/// Prompts that never get an answer.
pub struct SilentPrompts;

#[async_trait::async_trait]
impl CodeChannelResolver for SilentPrompts {
    async fn request_text_code(&self, _prompt: &CodePrompt) -> Result<String> {
        std::future::pending().await
    }

    async fn choose_method(&self, _methods: &[ChannelMethod]) -> Result<ChannelMethod> {
        std::future::pending().await
    }
}

pub struct StaticTwoFactorConfig(pub TwoFactorConfig);

#[async_trait::async_trait]
impl TwoFactorConfigSource for StaticTwoFactorConfig {
    async fn get_current_config(&self) -> Result<TwoFactorConfig> {
        Ok(self.0.clone())
    }
}

pub struct FailingTwoFactorConfig;

#[async_trait::async_trait]
impl TwoFactorConfigSource for FailingTwoFactorConfig {
    async fn get_current_config(&self) -> Result<TwoFactorConfig> {
        Err(ResolverError::Server("twofactor config unavailable".to_string()))
    }
}

pub fn sms_only_config() -> TwoFactorConfig {
    TwoFactorConfig {
        all_methods: vec![
            ChannelMethod::Email,
            ChannelMethod::Sms,
            ChannelMethod::Phone,
            ChannelMethod::AuthenticatorApp,
        ],
        enabled_methods: [ChannelMethod::Sms].into_iter().collect(),
        any_enabled: true,
    }
}

/// Reports disconnected for the first `offline_checks` checks.
pub struct FlakyConnectivity {
    offline_checks: u32,
    pub checks: AtomicU32,
}

impl FlakyConnectivity {
    pub fn new(offline_checks: u32) -> Self {
        Self {
            offline_checks,
            checks: AtomicU32::new(0),
        }
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

impl ConnectivityState for FlakyConnectivity {
    fn is_connected(&self) -> bool {
        let check = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        check > self.offline_checks
    }
}

#[cfg(feature = "hardware-wallets")]
pub mod hw {
    use gdk_resolver::hw::gate::{DeviceTransport, DomainDecision, GatePrompter, PinServerClient, TorControl, TorDecision};
    use gdk_resolver::hw::{
        BlindingFactorsParams, BlindingFactorsResult, BlindingNoncesParams, BlindingNoncesResult,
        BlindingPublicKeysParams, DeviceContext, DeviceInteraction, GetXpubsParams, HardwareDevice,
        SignMessageParams, SignMessageResult, SignTxParams, SignTxResult,
    };
    use gdk_resolver::protocol::{DeviceDescriptor, HwAction};
    use gdk_resolver::Result;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    pub struct MockTor {
        enabled: AtomicBool,
        pub reconnects: AtomicU32,
    }

    impl MockTor {
        pub fn new(enabled: bool) -> Self {
            Self {
                enabled: AtomicBool::new(enabled),
                reconnects: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl TorControl for MockTor {
        fn is_tor_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        async fn enable_tor_and_reconnect(&self) -> Result<()> {
            self.enabled.store(true, Ordering::SeqCst);
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Answers every gate prompt the same way and records what was asked.
    pub struct RecordingGatePrompter {
        tor: TorDecision,
        domains: DomainDecision,
        pub tor_prompts: Mutex<Vec<Vec<String>>>,
        pub domain_prompts: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingGatePrompter {
        pub fn new(tor: TorDecision, domains: DomainDecision) -> Self {
            Self {
                tor,
                domains,
                tor_prompts: Mutex::new(Vec::new()),
                domain_prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn accepting() -> Self {
            Self::new(
                TorDecision::Accept { enable_tor: false },
                DomainDecision::Accept { dont_ask_again: false },
            )
        }

        pub fn tor_prompt_count(&self) -> usize {
            self.tor_prompts.lock().unwrap().len()
        }

        pub fn domain_prompts(&self) -> Vec<Vec<String>> {
            self.domain_prompts.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl GatePrompter for RecordingGatePrompter {
        async fn confirm_tor(&self, urls: &[String]) -> Result<TorDecision> {
            self.tor_prompts.lock().unwrap().push(urls.to_vec());
            Ok(self.tor)
        }

        async fn confirm_domains(&self, domains: &[String]) -> Result<DomainDecision> {
            self.domain_prompts.lock().unwrap().push(domains.to_vec());
            Ok(self.domains)
        }
    }

    pub struct MockPinServer {
        reply: Value,
        pub requests: Mutex<Vec<Value>>,
    }

    impl MockPinServer {
        pub fn new(reply: Value) -> Self {
            Self {
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn ok() -> Self {
            Self::new(json!({"body": {"encrypted_data": "c0ffee"}}))
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl PinServerClient for MockPinServer {
        async fn http_request(&self, params: &Value) -> Result<Value> {
            self.requests.lock().unwrap().push(params.clone());
            Ok(self.reply.clone())
        }
    }

    /// Device link that first asks for one HTTP round trip to `urls`, then
    /// returns `result`.
    pub struct PinTransport {
        replies: Mutex<VecDeque<Value>>,
        pub sent: Mutex<Vec<Value>>,
    }

    impl PinTransport {
        pub fn new(urls: &[&str], result: Value) -> Self {
            let replies = vec![
                json!({
                    "id": "1",
                    "result": {"http_request": {
                        "params": {"urls": urls, "method": "POST", "data": {"cke": "02aa"}},
                        "on-reply": "pin"
                    }}
                }),
                json!({"id": "2", "result": result}),
            ];
            Self {
                replies: Mutex::new(replies.into()),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn sent(&self) -> Vec<Value> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl DeviceTransport for PinTransport {
        async fn exchange(&self, message: &Value) -> Result<Value> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| json!({"error": {"code": -1, "message": "unexpected message"}})))
        }
    }

    /// Deterministic device; with a transport, `get_xpubs` first unlocks
    /// the device through the pin server.
    pub struct MockDevice {
        name: String,
        transport: Option<Arc<dyn DeviceTransport>>,
        pub unlocks: AtomicU32,
    }

    impl MockDevice {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                transport: None,
                unlocks: AtomicU32::new(0),
            }
        }

        pub fn with_transport(mut self, transport: Arc<dyn DeviceTransport>) -> Self {
            self.transport = Some(transport);
            self
        }
    }

    #[async_trait::async_trait]
    impl HardwareDevice for MockDevice {
        fn descriptor(&self) -> DeviceDescriptor {
            DeviceDescriptor::new(&self.name)
        }

        async fn get_xpubs(&self, ctx: &DeviceContext, params: &GetXpubsParams) -> Result<Vec<String>> {
            if let Some(transport) = &self.transport {
                ctx.exchange(transport.as_ref(), json!({"id": "0", "method": "auth_user", "params": {"network": ctx.network}}))
                    .await?;
                self.unlocks.fetch_add(1, Ordering::SeqCst);
            }
            Ok(params
                .paths
                .iter()
                .map(|path| format!("xpub-{}", path.len()))
                .collect())
        }

        async fn sign_message(&self, _ctx: &DeviceContext, params: &SignMessageParams) -> Result<SignMessageResult> {
            Ok(SignMessageResult {
                signature: format!("sig:{}", params.message),
                signer_commitment: params.use_ae_protocol.then(|| "commitment".to_string()),
            })
        }

        async fn sign_tx(&self, _ctx: &DeviceContext, params: &SignTxParams) -> Result<SignTxResult> {
            Ok(SignTxResult {
                signatures: params.signing_inputs.iter().map(|_| "3044".to_string()).collect(),
                signer_commitments: params.signing_inputs.iter().map(|_| None).collect(),
            })
        }

        async fn get_master_blinding_key(&self, _ctx: &DeviceContext) -> Result<Option<String>> {
            Ok(Some("ab".repeat(32)))
        }

        async fn get_blinding_public_keys(
            &self,
            _ctx: &DeviceContext,
            params: &BlindingPublicKeysParams,
        ) -> Result<Vec<String>> {
            Ok(params.scripts.iter().map(|s| format!("pk:{}", s)).collect())
        }

        async fn get_blinding_nonces(
            &self,
            _ctx: &DeviceContext,
            params: &BlindingNoncesParams,
        ) -> Result<BlindingNoncesResult> {
            Ok(BlindingNoncesResult {
                nonces: params.public_keys.iter().map(|k| format!("nonce:{}", k)).collect(),
                public_keys: if params.blinding_keys_required {
                    params.scripts.iter().map(|s| format!("pk:{}", s)).collect()
                } else {
                    Vec::new()
                },
            })
        }

        async fn get_blinding_factors(
            &self,
            _ctx: &DeviceContext,
            params: &BlindingFactorsParams,
        ) -> Result<BlindingFactorsResult> {
            let n = params.transaction_outputs.len();
            Ok(BlindingFactorsResult {
                amountblinders: vec!["00".repeat(32); n],
                assetblinders: vec!["11".repeat(32); n],
            })
        }
    }

    #[derive(Default)]
    pub struct RecordingInteraction {
        pub events: Mutex<Vec<String>>,
    }

    impl DeviceInteraction for RecordingInteraction {
        fn interaction_started(&self, _device: &DeviceDescriptor, action: &HwAction) {
            self.events.lock().unwrap().push(format!("start:{}", action));
        }

        fn interaction_finished(&self, _device: &DeviceDescriptor, action: &HwAction) {
            self.events.lock().unwrap().push(format!("finish:{}", action));
        }
    }

    pub fn hw_status(action: &str, extra: Value) -> Value {
        let mut required = json!({
            "action": action,
            "device": {"name": "Jade", "supports_liquid": 1, "supports_ae_protocol": 1}
        });
        if let (Some(required), Some(extra)) = (required.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                required.insert(k.clone(), v.clone());
            }
        }
        json!({"status": "resolve_code", "name": "hw_request", "required_data": required})
    }
}
