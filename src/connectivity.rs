//! Connectivity of the underlying wallet session and the bounded wait used
//! before any call that needs the network.

use crate::cancel::CancelToken;
use crate::utils::config::BackoffConfig;
use crate::{ResolverError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;

/// Instantaneous view of whether the session can reach the server.
pub trait ConnectivityState: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl<F> ConnectivityState for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_connected(&self) -> bool {
        self()
    }
}

/// Connection flags of a wallet session shared by all resolver sessions.
///
/// The session counts as connected only while the transport is up, the
/// wallet is logged in and the session is not paused.
#[derive(Debug)]
pub struct SessionConnectivity {
    connected: AtomicBool,
    logged_in: AtomicBool,
    paused: AtomicBool,
}

impl SessionConnectivity {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Connected, logged in and running.
    pub fn online() -> Self {
        let state = Self::new();
        state.set_connected(true);
        state.set_logged_in(true);
        state
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

impl Default for SessionConnectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityState for SessionConnectivity {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.logged_in.load(Ordering::SeqCst)
            && !self.paused.load(Ordering::SeqCst)
    }
}

/// Bounded retry loop over a [`ConnectivityState`].
#[derive(Clone)]
pub struct ConnectivityGate {
    state: Arc<dyn ConnectivityState>,
    backoff: BackoffConfig,
}

impl ConnectivityGate {
    pub fn new(state: Arc<dyn ConnectivityState>, backoff: BackoffConfig) -> Self {
        Self { state, backoff }
    }

    /// Gate that always reports a live connection.
    pub fn always_connected() -> Self {
        Self::new(Arc::new(|| true), BackoffConfig::default())
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Wait until the session reports connected.
    ///
    /// Checks at most `max_attempts` times, sleeping the backoff delay between
    /// checks. An already connected session returns after a single check;
    /// at least one check is made even when `max_attempts` is zero.
    /// Fails with [`ResolverError::Timeout`] once the attempts are used up, or
    /// with [`ResolverError::Cancelled`] when `cancel` fires during a sleep.
    pub async fn wait_until_connected(&self, cancel: &CancelToken) -> Result<()> {
        self.wait_until_connected_with(cancel, |_| {}).await
    }

    /// Like [`wait_until_connected`](Self::wait_until_connected), calling
    /// `on_offline` with the attempt number after every failed check.
    pub async fn wait_until_connected_with<F>(&self, cancel: &CancelToken, mut on_offline: F) -> Result<()>
    where
        F: FnMut(u32) + Send,
    {
        let max_attempts = self.backoff.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }
            if self.state.is_connected() {
                if attempt > 1 {
                    log::info!("Connection restored after {} checks", attempt);
                }
                return Ok(());
            }
            on_offline(attempt);
            if attempt == max_attempts {
                break;
            }
            let delay = self.backoff.delay_for(attempt);
            log::debug!(
                "Not connected (check {}/{}), retrying in {:?}",
                attempt,
                max_attempts,
                delay
            );
            cancel
                .run(async {
                    sleep(delay).await;
                    Ok(())
                })
                .await?;
        }

        log::warn!("Connection not restored after {} checks", max_attempts);
        Err(ResolverError::Timeout {
            attempts: max_attempts,
        })
    }
}
