//! keysync-client - mutually authenticated client for a Keywhiz-style secret store
//!
//! Fetches single secrets or secret listings over mTLS, retries intermittent
//! server errors with jittered backoff and refuses listings where two secrets
//! resolve to the same filename.

mod client;
mod config;
mod error;
mod health;
mod response;
mod retry;
mod secret;
mod transport;

pub use client::{HttpSecretsClient, SecretsClient};
pub use config::{parse_duration, ClientConfig, ClientParams};
pub use error::{ClientError, Result};
pub use health::{HealthState, FAIL_COUNT_METRIC, LAST_SUCCESS_METRIC};
pub use response::{build_secret_map, collapse_newlines, decode_list, decode_one, SecretMap};
pub use retry::{
    escape_segment, join_path, should_retry, Backoff, Payload, RequestOutcome, RetryExecutor,
    RetryPolicy,
};
pub use secret::{parse_secret, parse_secret_list, Secret};
pub use transport::{TlsPolicy, Transport, TransportBuilder, PROTOCOL_VERSIONS};
