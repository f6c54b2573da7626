//! Channel-based bridge between resolver sessions and a host UI.
//!
//! Each prompt becomes a [`PromptRequest`] on an mpsc queue carrying a oneshot
//! reply sender. The UI answers through the sender; dropping it counts as the
//! user dismissing the prompt.

use crate::channel::{CodeChannelResolver, CodePrompt};
#[cfg(feature = "hardware-wallets")]
use crate::hw::gate::{DomainDecision, GatePrompter, TorDecision};
use crate::protocol::ChannelMethod;
use crate::{ResolverError, Result};
use tokio::sync::{mpsc, oneshot};

/// Answer to a code prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeReply {
    Code(String),
    Cancel,
    /// The user wants another channel, e.g. "call me instead".
    SwitchChannel(Option<ChannelMethod>),
}

/// A prompt waiting for the user.
#[derive(Debug)]
pub enum PromptRequest {
    Code {
        prompt: CodePrompt,
        reply: oneshot::Sender<CodeReply>,
    },
    ChooseMethod {
        methods: Vec<ChannelMethod>,
        reply: oneshot::Sender<Option<ChannelMethod>>,
    },
    #[cfg(feature = "hardware-wallets")]
    Tor {
        urls: Vec<String>,
        reply: oneshot::Sender<TorDecision>,
    },
    #[cfg(feature = "hardware-wallets")]
    Domains {
        domains: Vec<String>,
        reply: oneshot::Sender<DomainDecision>,
    },
}

/// Sending half handed to the resolver; the UI keeps the receiver.
#[derive(Debug, Clone)]
pub struct PromptBridge {
    request_tx: mpsc::Sender<PromptRequest>,
}

impl PromptBridge {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PromptRequest>) {
        let (request_tx, request_rx) = mpsc::channel(buffer.max(1));
        (Self { request_tx }, request_rx)
    }

    /// Queue a request and wait for its answer; `None` if either side
    /// went away.
    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> PromptRequest) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.request_tx.send(build(reply_tx)).await.is_err() {
            log::warn!("Prompt receiver closed, treating prompt as dismissed");
            return None;
        }
        reply_rx.await.ok()
    }
}

#[async_trait::async_trait]
impl CodeChannelResolver for PromptBridge {
    async fn request_text_code(&self, prompt: &CodePrompt) -> Result<String> {
        let reply = self
            .ask(|reply| PromptRequest::Code {
                prompt: prompt.clone(),
                reply,
            })
            .await;
        match reply {
            Some(CodeReply::Code(code)) => Ok(code),
            Some(CodeReply::SwitchChannel(requested)) => {
                Err(ResolverError::ChannelSwitchRequested { requested })
            }
            Some(CodeReply::Cancel) | None => Err(ResolverError::UserCancelled),
        }
    }

    async fn choose_method(&self, methods: &[ChannelMethod]) -> Result<ChannelMethod> {
        let reply = self
            .ask(|reply| PromptRequest::ChooseMethod {
                methods: methods.to_vec(),
                reply,
            })
            .await;
        match reply.flatten() {
            Some(method) if methods.contains(&method) => Ok(method),
            Some(method) => Err(ResolverError::protocol(format!(
                "chosen method {} was not offered",
                method
            ))),
            None => Err(ResolverError::UserCancelled),
        }
    }
}

#[cfg(feature = "hardware-wallets")]
#[async_trait::async_trait]
impl GatePrompter for PromptBridge {
    async fn confirm_tor(&self, urls: &[String]) -> Result<TorDecision> {
        let reply = self
            .ask(|reply| PromptRequest::Tor {
                urls: urls.to_vec(),
                reply,
            })
            .await;
        Ok(reply.unwrap_or(TorDecision::Decline))
    }

    async fn confirm_domains(&self, domains: &[String]) -> Result<DomainDecision> {
        let reply = self
            .ask(|reply| PromptRequest::Domains {
                domains: domains.to_vec(),
                reply,
            })
            .await;
        Ok(reply.unwrap_or(DomainDecision::Decline))
    }
}
