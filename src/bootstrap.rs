// Captured request templates and their on-disk store.
//
// A template is the replayable shape of one observed search request:
// endpoint, method, headers, body/query and session cookies. Once
// captured it is immutable; a refresh replaces the whole document.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

/// Only the methods seen in practice; anything else is not a search
/// request worth capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

impl TemplateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateMethod::Get => "GET",
            TemplateMethod::Post => "POST",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Some(TemplateMethod::Get),
            "POST" => Some(TemplateMethod::Post),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub url: String,
    pub method: TemplateMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub query: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub cookies: Vec<TemplateCookie>,
}

// Transport-managed fields; the client recomputes these on every replay.
const MANAGED_HEADERS: &[&str] = &["content-length", "cookie", "host"];

/// Drops transport-managed and HTTP/2 pseudo headers from a header map.
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            !name.starts_with(':') && !MANAGED_HEADERS.contains(&lower.as_str())
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

impl RequestTemplate {
    /// Headers safe to replay; sanitizing is repeated here defensively in
    /// case a hand-edited cache document reintroduced managed fields.
    pub fn sanitized_headers(&self) -> BTreeMap<String, String> {
        sanitize_headers(&self.headers)
    }

    /// Captured query parameters, cloned for per-request overlaying.
    pub fn query_params(&self) -> BTreeMap<String, String> {
        self.query.clone().unwrap_or_default()
    }
}

/// One pretty-printed JSON document per source key under an injected
/// cache root. The root is owned by the caller; entries can be deleted
/// externally at any time to force recapture.
#[derive(Debug, Clone)]
pub struct BootstrapStore {
    root: PathBuf,
}

impl BootstrapStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the platform's per-user cache directory.
    pub fn open_default() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("", "", "carfeed").ok_or(StorageError::NoCacheDir)?;
        Ok(Self::new(dirs.cache_dir()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// A missing document is a normal "absent" result, not an error.
    pub fn load(&self, key: &str) -> Result<Option<RequestTemplate>, StorageError> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Read { path, source: err }),
        };
        let template =
            serde_json::from_str(&raw).map_err(|err| StorageError::Decode { path, source: err })?;
        Ok(Some(template))
    }

    /// Writes via a temp file in the same directory and atomically
    /// replaces, so readers never observe a half-written document.
    pub fn save(&self, key: &str, template: &RequestTemplate) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.root).map_err(|err| StorageError::CacheRoot {
            path: self.root.clone(),
            source: err,
        })?;
        let path = self.path_for(key);
        let encoded = serde_json::to_string_pretty(template).map_err(|err| StorageError::Encode {
            key: key.to_string(),
            source: err,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(|err| {
            StorageError::Write {
                path: path.clone(),
                source: err,
            }
        })?;
        tmp.write_all(encoded.as_bytes())
            .map_err(|err| StorageError::Write {
                path: path.clone(),
                source: err,
            })?;
        tmp.persist(&path).map_err(|err| StorageError::Write {
            path: path.clone(),
            source: err.error,
        })?;

        tracing::debug!(key, path = %path.display(), "bootstrap template saved");
        Ok(path)
    }
}
