//! Session id management
//!
//! A session id is an opaque string kept in a cookie with a lifetime in days.
//! [`SessionManager`] reads it back on every call and only mints a new one
//! when the cookie is missing, empty or expired.
//!
//! Cookie storage sits behind [`CookieJar`]:
//! - [`MemoryCookieJar`]: process-local, used by tests and short-lived embedders
//! - [`FileCookieJar`]: JSON file under the XDG state dir, survives restarts
//! - [`DisabledCookieJar`]: cookies turned off; the manager degrades to a new id per call

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::PREFIX;

/// Cookie path used for the session cookie
pub const COOKIE_PATH: &str = "/";

/// Longest accepted cookie lifetime (about a century)
pub const MAX_COOKIE_TTL_DAYS: u32 = 36_500;

/// A stored cookie value with its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub value: String,
    pub path: String,
    pub expires_at: DateTime<Utc>,
}

impl CookieRecord {
    fn new(value: &str, ttl_days: u32) -> Result<Self> {
        let expires_at = Utc::now()
            .checked_add_signed(Duration::days(i64::from(ttl_days)))
            .ok_or_else(|| {
                Error::Config(format!("cookie lifetime of {} days is out of range", ttl_days))
            })?;
        Ok(Self {
            value: value.to_string(),
            path: COOKIE_PATH.to_string(),
            expires_at,
        })
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Storage for named cookies
pub trait CookieJar: Send + Sync {
    /// Whether this jar can store anything at all
    fn enabled(&self) -> bool {
        true
    }

    /// Value of a live cookie
    fn get(&self, name: &str) -> Option<String>;

    /// Store a cookie for `ttl_days`
    fn set(&self, name: &str, value: &str, ttl_days: u32) -> Result<()>;

    /// Erase a cookie
    fn remove(&self, name: &str) -> Result<()>;
}

/// In-process cookie jar
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, CookieRecord>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.lock().ok()?;
        cookies
            .get(name)
            .filter(|c| c.is_live(Utc::now()))
            .map(|c| c.value.clone())
    }

    fn set(&self, name: &str, value: &str, ttl_days: u32) -> Result<()> {
        let record = CookieRecord::new(value, ttl_days)?;
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.insert(name.to_string(), record);
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.remove(name);
        }
        Ok(())
    }
}

/// Cookie jar persisted as a JSON file
///
/// The file is re-read on every access so that two processes sharing it see
/// each other's writes (best effort, last writer wins).
#[derive(Debug)]
pub struct FileCookieJar {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HashMap<String, CookieRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return HashMap::new(),
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "{} Cookie jar is corrupt, starting empty",
                PREFIX
            );
            HashMap::new()
        })
    }

    fn store(&self, cookies: &HashMap<String, CookieRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl CookieJar for FileCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        let _guard = self.lock.lock().ok()?;
        self.load()
            .remove(name)
            .filter(|c| c.is_live(Utc::now()))
            .map(|c| c.value)
    }

    fn set(&self, name: &str, value: &str, ttl_days: u32) -> Result<()> {
        let _guard = self.lock.lock();
        let now = Utc::now();
        let record = CookieRecord::new(value, ttl_days)?;
        let mut cookies = self.load();
        cookies.retain(|_, c| c.is_live(now));
        cookies.insert(name.to_string(), record);
        self.store(&cookies)
    }

    fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut cookies = self.load();
        if cookies.remove(name).is_some() {
            self.store(&cookies)?;
        }
        Ok(())
    }
}

/// Jar for environments where cookies are turned off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCookieJar;

impl CookieJar for DisabledCookieJar {
    fn enabled(&self) -> bool {
        false
    }

    fn get(&self, _name: &str) -> Option<String> {
        None
    }

    fn set(&self, _name: &str, _value: &str, _ttl_days: u32) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Obtains or creates the per-browser session id
pub struct SessionManager {
    jar: Box<dyn CookieJar>,
}

impl SessionManager {
    pub fn new(jar: Box<dyn CookieJar>) -> Self {
        Self { jar }
    }

    /// Whether session ids survive across calls
    pub fn cookies_enabled(&self) -> bool {
        self.jar.enabled()
    }

    /// Return the session id stored under `cookie_name`, creating it if absent.
    ///
    /// With cookies disabled every call returns a fresh id.
    pub fn get_or_create_session_id(&self, cookie_name: &str, ttl_days: u32) -> String {
        if let Some(existing) = self.jar.get(cookie_name).filter(|v| !v.is_empty()) {
            return existing;
        }

        let session_id = generate_session_id();
        if !self.jar.enabled() {
            tracing::debug!("{} Cookies disabled, using ephemeral session id", PREFIX);
            return session_id;
        }

        if let Err(e) = self.jar.set(cookie_name, &session_id, ttl_days) {
            tracing::warn!(
                cookie = cookie_name,
                error = %e,
                "{} Failed to persist session cookie",
                PREFIX
            );
        } else {
            tracing::debug!(cookie = cookie_name, ttl_days, "{} Created session id", PREFIX);
        }
        session_id
    }

    /// Forget the current session so the next call mints a new one
    pub fn reset(&self, cookie_name: &str) -> Result<()> {
        self.jar.remove(cookie_name)
    }
}

/// New random session id (UUID v4 string)
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
