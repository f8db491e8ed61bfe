//! Runtime snapshot of the values the cache engine consumes.
//!
//! Components never read settings directly. They hold a [`ConfigHandle`] and
//! take the current [`ProxyConfig`] at the moment they act; a reload swaps in
//! a whole new snapshot with a higher version.

use std::sync::Arc;

use tokio::sync::watch;

const UPDATE_SUFFIX: &str = "/update";
const INFO_SUFFIX: &str = "/info";

/// Control endpoints recognised by the front door.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPath {
    Update,
    Info,
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Monotonic version, bumped on every reload.
    pub version: u64,
    /// Upstream base URL without a trailing slash.
    pub backend_url: String,
    /// Prefix the proxy is mounted under; empty or `/segment` without a trailing slash.
    pub path_prefix: String,
    /// Listeners notified after every invalidation.
    pub webhooks: Vec<String>,
}

impl ProxyConfig {
    pub fn new(
        backend_url: impl Into<String>,
        path_prefix: impl Into<String>,
        webhooks: Vec<String>,
    ) -> Self {
        Self {
            version: 0,
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            path_prefix: path_prefix.into(),
            webhooks,
        }
    }

    /// Classify a request path as one of the control endpoints.
    pub fn control_path(&self, path: &str) -> Option<ControlPath> {
        let rest = path.strip_prefix(self.path_prefix.as_str())?;
        match rest {
            UPDATE_SUFFIX => Some(ControlPath::Update),
            INFO_SUFFIX => Some(ControlPath::Info),
            _ => None,
        }
    }

    /// Remove the mount prefix from a request target, keeping the query.
    pub fn strip_prefix<'a>(&self, target: &'a str) -> &'a str {
        if self.path_prefix.is_empty() {
            return target;
        }
        match target.strip_prefix(self.path_prefix.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') => {
                rest
            }
            _ => target,
        }
    }

    /// Absolute upstream URL for a request target.
    pub fn upstream_url(&self, target: &str) -> String {
        let rest = self.strip_prefix(target);
        if rest.starts_with('/') {
            format!("{}{rest}", self.backend_url)
        } else {
            format!("{}/{rest}", self.backend_url)
        }
    }
}

impl From<&crate::config::Settings> for ProxyConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self::new(
            settings.backend.url.as_str(),
            settings.proxy.path_prefix.clone(),
            settings.webhooks.urls.clone(),
        )
    }
}

/// Shared handle publishing the current [`ProxyConfig`].
#[derive(Clone)]
pub struct ConfigHandle {
    sender: Arc<watch::Sender<Arc<ProxyConfig>>>,
}

impl ConfigHandle {
    pub fn new(initial: ProxyConfig) -> Self {
        let (sender, _receiver) = watch::channel(Arc::new(initial));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> Arc<ProxyConfig> {
        Arc::clone(&self.sender.borrow())
    }

    /// Re-inject a snapshot. The version is assigned here; returns it.
    pub fn replace(&self, mut next: ProxyConfig) -> u64 {
        let mut assigned = 0;
        self.sender.send_modify(|current| {
            next.version = current.version + 1;
            assigned = next.version;
            *current = Arc::new(next);
        });
        assigned
    }
}
