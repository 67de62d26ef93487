// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Credential store for provider authentication.
//!
//! Opaque to the rest of the core: callers only `get`/`set`/`all`/`remove`
//! records keyed by provider id. Persisted as a single YAML file under the
//! user's config directory so a lost or corrupted auth file never touches
//! the rest of `~/.config/vantage`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A stored credential for one provider.
///
/// `kind` distinguishes API-key auth (most providers) from OAuth (Anthropic
/// Claude subscriptions), which additionally carries a refresh token and
/// expiry so the caller can decide when to refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthRecord {
    ApiKey { key: String },
    OAuth {
        access_token: String,
        refresh_token: String,
        /// Unix seconds.
        expires_at: i64,
    },
}

fn auth_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vantage")
        .join("auth.yaml")
}

/// Handle to the on-disk auth store. Each method reads or rewrites the whole
/// file; auth changes are rare (login/logout), so no caching is done.
#[derive(Debug, Default, Clone)]
pub struct AuthStore {
    path: PathBuf,
}

impl AuthStore {
    /// Open the store at the default location (`$XDG_CONFIG_HOME/vantage/auth.yaml`).
    pub fn open() -> Self {
        Self {
            path: auth_file_path(),
        }
    }

    /// Open the store at an explicit path (used by tests).
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_all(&self) -> anyhow::Result<BTreeMap<String, AuthRecord>> {
        if !self.path.is_file() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }

    fn write_all(&self, records: &BTreeMap<String, AuthRecord>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = serde_yaml::to_string(records).context("serializing auth store")?;
        fs::write(&self.path, text).with_context(|| format!("writing {}", self.path.display()))?;
        // Best-effort permission tightening; the store holds secrets.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = fs::metadata(&self.path) {
                let mut perms = meta.permissions();
                perms.set_mode(0o600);
                let _ = fs::set_permissions(&self.path, perms);
            }
        }
        Ok(())
    }

    pub fn get(&self, provider_id: &str) -> anyhow::Result<Option<AuthRecord>> {
        Ok(self.read_all()?.get(provider_id).cloned())
    }

    pub fn set(&self, provider_id: &str, record: AuthRecord) -> anyhow::Result<()> {
        let mut all = self.read_all()?;
        all.insert(provider_id.to_string(), record);
        self.write_all(&all)
    }

    pub fn all(&self) -> anyhow::Result<BTreeMap<String, AuthRecord>> {
        self.read_all()
    }

    pub fn remove(&self, provider_id: &str) -> anyhow::Result<bool> {
        let mut all = self.read_all()?;
        let removed = all.remove(provider_id).is_some();
        if removed {
            self.write_all(&all)?;
        }
        Ok(removed)
    }
}
