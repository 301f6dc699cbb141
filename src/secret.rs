//! Secret records as served by the v2 API.

use crate::error::{ClientError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// A secret and its metadata. `content` is absent in listings without contents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Secret {
    pub name: String,
    #[serde(rename = "secret", default, deserialize_with = "deserialize_content")]
    pub content: Option<Vec<u8>>,
    #[serde(rename = "secretLength", default)]
    pub length: u64,
    #[serde(default)]
    pub checksum: String,
    #[serde(rename = "creationDate", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updateDate", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "filename", default)]
    pub filename_override: Option<String>,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub group: String,
}

impl Secret {
    /// Name of the file this secret is written to: the override if set, the
    /// secret name otherwise.
    pub fn filename(&self) -> Result<String> {
        let filename = match self.filename_override.as_deref() {
            Some(f) if !f.is_empty() => f,
            _ => self.name.as_str(),
        };
        validate_filename(filename).map_err(|reason| ClientError::InvalidFilename {
            name: self.name.clone(),
            reason,
        })?;
        Ok(filename.to_string())
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }
}

fn validate_filename(filename: &str) -> std::result::Result<(), String> {
    if filename.is_empty() {
        return Err("empty filename".to_string());
    }
    if filename == "." || filename == ".." {
        return Err(format!("'{}' is not a valid filename", filename));
    }
    if filename.contains('/') || filename.contains('\0') {
        return Err(format!("'{}' contains a path separator or NUL", filename));
    }
    Ok(())
}

fn deserialize_content<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    match encoded {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => STANDARD
            .decode(s.as_bytes())
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Decode a single secret.
pub fn parse_secret(data: &[u8]) -> Result<Secret> {
    Ok(serde_json::from_slice(data)?)
}

/// Decode a listing, preserving server order.
pub fn parse_secret_list(data: &[u8]) -> Result<Vec<Secret>> {
    Ok(serde_json::from_slice(data)?)
}
