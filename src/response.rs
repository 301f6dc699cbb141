use crate::error::{ClientError, Result};
use crate::secret::{parse_secret, parse_secret_list, Secret};
use std::collections::HashMap;

/// Secrets keyed by derived filename. Built fresh for every response.
pub type SecretMap = HashMap<String, Secret>;

pub fn decode_one(data: &[u8]) -> Result<Secret> {
    parse_secret(data)
}

pub fn decode_list(data: &[u8]) -> Result<SecretMap> {
    build_secret_map(parse_secret_list(data)?)
}

/// Key secrets by filename. Two different secrets resolving to the same file is a
/// server-side inconsistency and fails the whole batch.
pub fn build_secret_map(secrets: Vec<Secret>) -> Result<SecretMap> {
    let mut map = SecretMap::with_capacity(secrets.len());
    for secret in secrets {
        let filename = secret.filename()?;
        if let Some(existing) = map.get(&filename) {
            return Err(ClientError::DuplicateFilename {
                filename,
                first: existing.name.clone(),
                second: secret.name,
            });
        }
        map.insert(filename, secret);
    }
    Ok(map)
}

/// Server messages are logged and returned on a single line.
pub fn collapse_newlines(body: &[u8]) -> String {
    String::from_utf8_lossy(body).split('\n').collect::<Vec<_>>().join(" ")
}
