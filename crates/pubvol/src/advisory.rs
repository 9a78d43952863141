//! Advisory trigger flags for downstream services.
//!
//! Newly mounted media may carry well-known payloads (an OTA update
//! package, a startup script, a customization bundle) that out-of-band
//! services pick up through process-wide key/value flags. The flags are
//! advisory only: setting or clearing them never affects the mount
//! contract, and scan failures are invisible to the caller.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;

/// Process-wide key/value flag store.
pub trait AdvisoryStore: Send + Sync {
    /// Current value of `key`, if set.
    fn get(&self, key: &str) -> Option<String>;

    /// Set `key` to `value`.
    fn set(&self, key: &str, value: &str);
}

/// In-memory [`AdvisoryStore`], the default when no system property
/// transport is wired in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl AdvisoryStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.inner.lock().insert(key.to_string(), value.to_string());
    }
}

/// The payload kinds scanned for, in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// OTA update package.
    Update,
    /// Startup service script.
    Startup,
    /// Customization config bundle.
    CustConfig,
}

impl TriggerKind {
    /// All kinds, in the order they are scanned.
    pub const ALL: [Self; 3] = [Self::Update, Self::Startup, Self::CustConfig];

    /// Payload path relative to the raw mount.
    #[must_use]
    pub const fn payload(self) -> &'static str {
        match self {
            Self::Update => "OTA/update.zip",
            Self::Startup => "startup/start_up.sh",
            Self::CustConfig => "cust/cust_update.zip",
        }
    }

    /// Flag key prefix for this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Update => "sys.update",
            Self::Startup => "sys.startup",
            Self::CustConfig => "sys.cust",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Update => "update",
            Self::Startup => "startup",
            Self::CustConfig => "cust-config",
        })
    }
}

/// Scan a freshly mounted volume for trigger payloads.
///
/// Kinds whose trigger is already raised by another volume are skipped;
/// the first payload found wins and ends the scan.
pub fn scan_triggers(store: &dyn AdvisoryStore, raw_path: &Path, stable_name: &str) {
    for kind in TriggerKind::ALL {
        let prefix = kind.prefix();
        if store.get(&format!("{prefix}.trigger")).as_deref() == Some("1") {
            tracing::debug!(%kind, "Another trigger of this kind is in flight");
            continue;
        }

        let payload = raw_path.join(kind.payload());
        tracing::debug!(%kind, payload = %payload.display(), "Checking trigger payload");
        if !payload.exists() {
            continue;
        }

        tracing::info!(%kind, payload = %payload.display(), "Trigger payload found");
        store.set(&format!("{prefix}.path"), &payload.to_string_lossy());
        store.set(&format!("{prefix}.storage"), stable_name);
        store.set(&format!("{prefix}.trigger"), "1");
        break;
    }
}

/// Clear the trigger flags owned by `stable_name` at unmount.
pub fn clear_triggers(store: &dyn AdvisoryStore, stable_name: &str) {
    for kind in TriggerKind::ALL {
        let prefix = kind.prefix();
        if store.get(&format!("{prefix}.storage")).as_deref() != Some(stable_name) {
            continue;
        }

        tracing::debug!(%kind, stable_name, "Clearing trigger flags");
        store.set(&format!("{prefix}.path"), "");
        store.set(&format!("{prefix}.storage"), "");
        store.set(&format!("{prefix}.trigger"), "0");
    }
}
