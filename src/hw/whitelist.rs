//! Domains a hardware device may contact through the host.
//!
//! A domain is allowed iff it is a vendor domain, was approved earlier in the
//! current session, or was approved with "don't ask again" at any time for the
//! same device namespace.

use crate::utils::persistence::{FileStorage, StorageConfig};
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use url::Url;

/// Vendor pin and firmware servers, clearnet and onion.
pub const VENDOR_URLS: &[&str] = &[
    "https://j8d.io",
    "https://jadefw.blockstream.com",
    "http://vgza7wu4h7osixmrx6e4op5r72okqpagr3w6oupgsvmim4cz3wzdgrad.onion",
    "https://jadepin.blockstream.com",
    "http://mrrxtq6tjpbnbm7vh5jt6mpjctn7ggyfy5wegvbeff3x7jrznqawlmid.onion",
];

/// Domain of `url`: `host`, or `host:port` when a non-default port is given.
///
/// URLs without an `http://`/`https://` scheme are read as `http://`.
pub fn domain_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let candidate = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    let parsed = Url::parse(&candidate).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host.to_string()),
    }
}

/// Backing store for domains approved with "don't ask again".
///
/// Shared by every session of the process; concurrent appends must not lose
/// domains already stored.
pub trait WhitelistStore: Send + Sync {
    fn load(&self, namespace: &str) -> Result<BTreeSet<String>>;
    fn append(&self, namespace: &str, domains: &[String]) -> Result<()>;
    fn clear(&self, namespace: &str) -> Result<()>;
}

/// Process-local store; clones share the same sets.
#[derive(Debug, Clone, Default)]
pub struct MemoryWhitelistStore {
    domains: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
}

impl MemoryWhitelistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WhitelistStore for MemoryWhitelistStore {
    fn load(&self, namespace: &str) -> Result<BTreeSet<String>> {
        let domains = self.domains.read().unwrap_or_else(|e| e.into_inner());
        Ok(domains.get(namespace).cloned().unwrap_or_default())
    }

    fn append(&self, namespace: &str, new_domains: &[String]) -> Result<()> {
        let mut domains = self.domains.write().unwrap_or_else(|e| e.into_inner());
        domains
            .entry(namespace.to_string())
            .or_default()
            .extend(new_domains.iter().cloned());
        Ok(())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let mut domains = self.domains.write().unwrap_or_else(|e| e.into_inner());
        domains.remove(namespace);
        Ok(())
    }
}

/// JSON files under the data directory, one per device namespace.
///
/// File names are the SHA-256 of the namespace so device identifiers never
/// reach the file system.
#[derive(Debug)]
pub struct FileWhitelistStore {
    storage: FileStorage,
    write_lock: Mutex<()>,
}

impl FileWhitelistStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage = FileStorage::new(StorageConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        })?;
        Ok(Self {
            storage,
            write_lock: Mutex::new(()),
        })
    }

    fn key(namespace: &str) -> String {
        let digest = Sha256::digest(namespace.as_bytes());
        format!("whitelist_{}", hex::encode(digest))
    }
}

impl WhitelistStore for FileWhitelistStore {
    fn load(&self, namespace: &str) -> Result<BTreeSet<String>> {
        Ok(self.storage.load(&Self::key(namespace))?.unwrap_or_default())
    }

    fn append(&self, namespace: &str, domains: &[String]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = Self::key(namespace);
        let mut stored: BTreeSet<String> = self.storage.load(&key)?.unwrap_or_default();
        stored.extend(domains.iter().cloned());
        self.storage.store(&key, &stored)
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.storage.delete(&Self::key(namespace))
    }
}

/// Allow-list of one connected device.
pub struct DeviceWhitelist {
    namespace: String,
    vendor: BTreeSet<String>,
    session: Mutex<BTreeSet<String>>,
    warning_shown: AtomicBool,
    store: Arc<dyn WhitelistStore>,
}

impl DeviceWhitelist {
    /// Whitelist for the device identified by `namespace`, seeded with the
    /// vendor domains.
    pub fn new(namespace: &str, store: Arc<dyn WhitelistStore>) -> Self {
        Self {
            namespace: namespace.to_string(),
            vendor: VENDOR_URLS.iter().filter_map(|u| domain_from_url(u)).collect(),
            session: Mutex::new(BTreeSet::new()),
            warning_shown: AtomicBool::new(false),
            store,
        }
    }

    /// Replace the vendor allow-list.
    pub fn with_vendor_urls(mut self, urls: &[&str]) -> Self {
        self.vendor = urls.iter().filter_map(|u| domain_from_url(u)).collect();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn vendor_domains(&self) -> &BTreeSet<String> {
        &self.vendor
    }

    pub fn session_domains(&self) -> BTreeSet<String> {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn persisted_domains(&self) -> Result<BTreeSet<String>> {
        self.store.load(&self.namespace)
    }

    /// Union of vendor, session and persisted domains.
    pub fn allowed_domains(&self) -> Result<BTreeSet<String>> {
        let mut allowed = self.vendor.clone();
        allowed.extend(self.session_domains());
        allowed.extend(self.persisted_domains()?);
        Ok(allowed)
    }

    pub fn is_allowed(&self, domain: &str) -> Result<bool> {
        Ok(self.allowed_domains()?.contains(domain))
    }

    /// `requested` minus the allowed domains, first occurrence order kept.
    pub fn new_domains(&self, requested: &[String]) -> Result<Vec<String>> {
        let allowed = self.allowed_domains()?;
        let mut seen = BTreeSet::new();
        Ok(requested
            .iter()
            .filter(|d| !allowed.contains(*d) && seen.insert((*d).clone()))
            .cloned()
            .collect())
    }

    pub fn approve_for_session(&self, domains: &[String]) {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.extend(domains.iter().cloned());
    }

    /// Approve for this session and store for later sessions.
    pub fn approve_persistently(&self, domains: &[String]) -> Result<()> {
        self.approve_for_session(domains);
        self.store.append(&self.namespace, domains)?;
        log::info!(
            "Persisted {} approved domain(s) for device {}",
            domains.len(),
            self.namespace
        );
        Ok(())
    }

    pub fn warning_shown(&self) -> bool {
        self.warning_shown.load(Ordering::SeqCst)
    }

    pub fn mark_warning_shown(&self) {
        self.warning_shown.store(true, Ordering::SeqCst);
    }

    /// Forget session approvals and the warning flag, e.g. on disconnect.
    pub fn reset_session(&self) {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.warning_shown.store(false, Ordering::SeqCst);
    }

    /// Drop every persisted approval of this device.
    pub fn clear_persisted(&self) -> Result<()> {
        self.store.clear(&self.namespace)
    }
}
