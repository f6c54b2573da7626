//! Out-of-band channels used to obtain a code: human prompts for two-factor
//! codes and method selection, and the QR/BCUR scan loop for air-gapped
//! devices.

use crate::protocol::{
    BcurDecodeParams, BcurDecodedData, BcurEncodeParams, BcurEncodedData, ChannelMethod,
    ResolveCodeAuthData,
};
use crate::{ResolverError, Result};
use std::sync::Arc;

/// Everything a code prompt needs to pick the right wording.
#[derive(Debug, Clone, PartialEq)]
pub struct CodePrompt {
    pub method: ChannelMethod,
    pub attempts_remaining: Option<u32>,
    /// False once the service reports no attempts left.
    pub retryable: bool,
    /// Whether the prompt may offer switching to a phone call.
    pub allow_call_method_upgrade: bool,
    pub network: String,
    /// The previous code was typed from an authenticator app and rejected.
    pub previous_attempt_failed: bool,
}

/// Human-facing prompts of the two-factor flow.
///
/// Implementations suspend until the user acts. They fail with
/// [`ResolverError::UserCancelled`] when the user dismisses the prompt and
/// with [`ResolverError::ChannelSwitchRequested`] when the user asks for a
/// different channel. No timeout is applied here.
#[async_trait::async_trait]
pub trait CodeChannelResolver: Send + Sync {
    async fn request_text_code(&self, prompt: &CodePrompt) -> Result<String>;

    async fn choose_method(&self, methods: &[ChannelMethod]) -> Result<ChannelMethod>;
}

/// Produces the decoded BCUR payload for a `bcur_decode` resolve request.
#[async_trait::async_trait]
pub trait BcurChannel: Send + Sync {
    async fn decode_bcur(&self, auth_data: &ResolveCodeAuthData) -> Result<String>;
}

/// Outcome of one camera scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A QR code was read; carries its `ur:` text.
    Part(String),
    /// Something was seen but could not be read.
    Unreadable(String),
    /// The user closed the scanner.
    Cancelled,
}

/// Camera side of the QR loop.
#[async_trait::async_trait]
pub trait QrScanner: Send + Sync {
    /// Scan one QR code; `progress` lets the UI show how far along a
    /// multi-part payload is.
    async fn scan(&self, progress: &ResolveCodeAuthData) -> Result<ScanEvent>;
}

/// Result of feeding one part to the BCUR decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum BcurDecodeStep {
    Partial(ResolveCodeAuthData),
    Complete(BcurDecodedData),
}

/// BCUR encoder/decoder of the wallet runtime.
#[async_trait::async_trait]
pub trait BcurCodec: Send + Sync {
    async fn bcur_decode(&self, params: &BcurDecodeParams) -> Result<BcurDecodeStep>;

    async fn bcur_encode(&self, params: &BcurEncodeParams) -> Result<BcurEncodedData>;
}

/// Restartable scan loop: unreadable scans and undecodable parts are
/// retried; only a user cancel, a scanner failure or a payload of the wrong
/// type ends the loop with an error.
pub struct QrBcurChannel {
    scanner: Arc<dyn QrScanner>,
    codec: Arc<dyn BcurCodec>,
    expected_ur_types: Vec<String>,
}

impl QrBcurChannel {
    pub fn new(scanner: Arc<dyn QrScanner>, codec: Arc<dyn BcurCodec>) -> Self {
        Self {
            scanner,
            codec,
            expected_ur_types: Vec::new(),
        }
    }

    /// Accept only payloads of these `ur_type`s.
    pub fn expecting(mut self, ur_types: &[&str]) -> Self {
        self.expected_ur_types = ur_types.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Scan until a complete payload is decoded.
    pub async fn scan_payload(&self, auth_data: &ResolveCodeAuthData) -> Result<BcurDecodedData> {
        let mut progress = auth_data.clone();
        let mut parts_read = 0u32;

        loop {
            let part = match self.scanner.scan(&progress).await? {
                ScanEvent::Part(part) => part,
                ScanEvent::Unreadable(reason) => {
                    log::warn!("QR scan unreadable, retrying: {}", reason);
                    continue;
                }
                ScanEvent::Cancelled => return Err(ResolverError::UserCancelled),
            };
            parts_read += 1;

            match self.codec.bcur_decode(&BcurDecodeParams { part }).await {
                Ok(BcurDecodeStep::Partial(next)) => {
                    log::debug!(
                        "BCUR part {} accepted, progress {:?}",
                        parts_read,
                        next.estimated_progress
                    );
                    progress = next;
                }
                Ok(BcurDecodeStep::Complete(data)) => {
                    self.check_ur_type(&data)?;
                    log::info!("BCUR payload decoded after {} parts", parts_read);
                    return Ok(data);
                }
                Err(e @ (ResolverError::UserCancelled | ResolverError::Cancelled)) => return Err(e),
                Err(e) => {
                    log::warn!("Discarding undecodable BCUR part: {}", e);
                }
            }
        }
    }

    fn check_ur_type(&self, data: &BcurDecodedData) -> Result<()> {
        if self.expected_ur_types.is_empty() {
            return Ok(());
        }
        match data.ur_type() {
            Some(ur_type) if self.expected_ur_types.iter().any(|t| t == ur_type) => Ok(()),
            other => Err(ResolverError::protocol(format!(
                "unexpected BCUR payload type {:?}, expected one of {:?}",
                other, self.expected_ur_types
            ))),
        }
    }
}

#[async_trait::async_trait]
impl BcurChannel for QrBcurChannel {
    async fn decode_bcur(&self, auth_data: &ResolveCodeAuthData) -> Result<String> {
        let data = self.scan_payload(auth_data).await?;
        Ok(data.to_code())
    }
}
