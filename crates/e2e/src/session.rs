//! Browser contexts and session injection
//!
//! A [`BrowserContext`] describes the isolated browser environment one
//! scenario runs in. Its [`StorageState`] is handed to Playwright when the
//! context is created, so the application sees injected local storage before
//! any of its own scripts execute, exactly as if its login flow had written it.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::{Browser, Viewport};
use crate::error::{E2eError, E2eResult};
use crate::provision::SessionToken;

/// Local-storage key the application's login flow writes
pub const SESSION_STORAGE_KEY: &str = "_session_token";

/// Playwright storage-state document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

impl StorageState {
    /// Insert or overwrite one local-storage entry for an origin
    pub fn set_local_storage(&mut self, origin: &str, name: &str, value: &str) {
        let idx = match self.origins.iter().position(|o| o.origin == origin) {
            Some(idx) => idx,
            None => {
                self.origins.push(OriginState {
                    origin: origin.to_string(),
                    local_storage: Vec::new(),
                });
                self.origins.len() - 1
            }
        };

        let entries = &mut self.origins[idx].local_storage;
        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.value = value.to_string(),
            None => entries.push(StorageEntry {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn local_storage(&self, origin: &str, name: &str) -> Option<&str> {
        self.origins
            .iter()
            .find(|o| o.origin == origin)?
            .local_storage
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}

/// Reduce a URL to its `scheme://host[:port]` origin
pub fn normalize_origin(url: &str) -> E2eResult<String> {
    let parsed = Url::parse(url)?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return Err(E2eError::SessionInjection(format!(
            "{} has no usable origin",
            url
        )));
    }
    Ok(origin.ascii_serialization())
}

/// An isolated, per-scenario browser environment
#[derive(Debug, Clone)]
pub struct BrowserContext {
    id: Uuid,
    base_url: Url,
    browser: Browser,
    viewport: Viewport,
    headless: bool,
    storage: StorageState,
    opened: bool,
}

impl BrowserContext {
    pub fn new(base_url: &str, browser: Browser, viewport: Viewport, headless: bool) -> E2eResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            base_url: Url::parse(base_url)?,
            browser,
            viewport,
            headless,
            storage: StorageState::default(),
            opened: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn browser(&self) -> Browser {
        self.browser
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    pub fn storage_state(&self) -> &StorageState {
        &self.storage
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Seed the session token into this context's storage for `origin_url`
    pub fn inject_session(&mut self, token: &SessionToken, origin_url: &str) -> E2eResult<()> {
        if self.opened {
            return Err(E2eError::SessionInjection(
                "context already opened; sessions must be injected before the first navigation"
                    .to_string(),
            ));
        }

        let origin = normalize_origin(origin_url)?;
        self.storage
            .set_local_storage(&origin, SESSION_STORAGE_KEY, token.as_str());
        debug!("Injected session into context {} for {}", self.id, origin);
        Ok(())
    }

    /// Freeze the storage state; nothing may be injected afterwards
    pub fn open(&mut self) -> &StorageState {
        self.opened = true;
        &self.storage
    }
}

/// Seed `token` into `context` before it navigates anywhere
pub fn inject_session(context: &mut BrowserContext, token: &SessionToken, origin_url: &str) -> E2eResult<()> {
    context.inject_session(token, origin_url)
}
