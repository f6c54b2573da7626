//! # gdk-resolver
//!
//! Client-side resolver for two-factor and hardware-wallet authorization of
//! Green Development Kit (GDK) calls.
//!
//! A privileged wallet call (sending a transaction, changing limits, logging
//! in with a hardware device) may need an extra authorization step before the
//! wallet service executes it. This crate drives that step: it polls the call
//! status, asks the user for a code or picks a channel, hands device actions to
//! a hardware signer, relays the device's pin-server traffic, and waits for the
//! session to come back online before anything is sent to the server.
//!
//! ## Features
//!
//! - **Two-factor codes**: SMS, email, phone call and authenticator app
//! - **Hardware wallets**: device actions with Tor and domain checks on any
//!   outbound request the device makes
//! - **Air-gapped devices**: BCUR/QR scan loop and the QR pin handshake
//! - **Cancellable**: every wait on a human, a device or the network
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gdk_resolver::connectivity::SessionConnectivity;
//! use gdk_resolver::prompt::{CodeReply, PromptBridge, PromptRequest};
//! use gdk_resolver::session::CallStatusSource;
//! use gdk_resolver::{init, ResolverConfig, ResolverServices, TwoFactorCallEngine};
//! use std::sync::Arc;
//!
//! async fn authorize(call: impl CallStatusSource + 'static) -> gdk_resolver::Result<serde_json::Value> {
//!     let config = ResolverConfig::default();
//!     init(&config)?;
//!
//!     // The UI side answers prompts as they arrive.
//!     let (prompts, mut requests) = PromptBridge::new(8);
//!     tokio::spawn(async move {
//!         while let Some(request) = requests.recv().await {
//!             if let PromptRequest::Code { reply, .. } = request {
//!                 let _ = reply.send(CodeReply::Code("123456".to_string()));
//!             }
//!         }
//!     });
//!
//!     let services = ResolverServices::from_config(
//!         &config,
//!         Arc::new(prompts),
//!         Arc::new(SessionConnectivity::online()),
//!     );
//!     let mut engine = TwoFactorCallEngine::from_source(call, services);
//!     engine.resolve().await
//! }
//! ```
//!
//! ## Architecture Overview
//!
//! - [`engine`]: the poll/act state machine
//! - [`protocol`]: call status JSON and the types decoded from it
//! - [`session`]: interfaces into the wallet session and the service bundle
//! - [`channel`]: code prompts and the BCUR scan loop
//! - [`prompt`]: mpsc/oneshot bridge to a host UI
//! - [`connectivity`]: bounded wait for the session to be online
//! - [`cancel`]: cancellation token
//! - `hw`: hardware devices, request gates and the device allow-list
//! - [`utils`]: configuration, logging and file persistence
//!
//! ## Optional Features
//!
//! - `hardware-wallets` (default): hardware device support
//!
//! ```toml
//! [dependencies]
//! gdk-resolver = { version = "0.1", default-features = false }
//! ```

pub mod cancel;
pub mod channel;
pub mod connectivity;
pub mod engine;
pub mod error;
#[cfg(feature = "hardware-wallets")]
pub mod hw;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod utils;

pub use engine::{EngineEvent, EngineState, TwoFactorCallEngine};
pub use error::{ResolverError, Result};
pub use session::ResolverServices;
pub use utils::config::ResolverConfig;

use std::fs;

/// Initializes logging and the data directory. Safe to call more than once.
///
/// Installs `env_logger` at the configured level (or from `RUST_LOG` when no
/// level is set) and creates `data_dir` if it doesn't exist.
pub fn init(config: &ResolverConfig) -> Result<()> {
    config.validate()?;

    match config.log_level {
        Some(level) => {
            utils::logging::init_logging(level);
        }
        None => {
            // Already initialized is fine.
            let _ = env_logger::try_init();
        }
    }

    if let Some(data_dir) = &config.data_dir {
        if !data_dir.exists() {
            fs::create_dir_all(data_dir)?;
            log::info!("Created data directory at: {:?}", data_dir);
        }
    }

    log::info!("Resolver initialized for network {}", config.network);
    Ok(())
}
