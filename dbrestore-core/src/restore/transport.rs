//! Ingestion client arguments and the transport-security fallback.
//!
//! Some servers reject the client's default TLS negotiation. When the
//! client fails with that specific message the stream is retried exactly
//! once with transport security disabled.

use crate::error::DbRestoreError;
use crate::security::ProfileInfo;

/// Flag that disables transport security on the client.
pub const SKIP_SSL_FLAG: &str = "--skip-ssl";

/// `--max_allowed_packet` for ingestion (1 GiB).
pub const MAX_ALLOWED_PACKET: u64 = 1024 * 1024 * 1024;

/// Base arguments for the ingestion client.
///
/// `--force` keeps the client going past statement errors and `--reconnect`
/// survives dropped connections on long restores. The password is passed
/// through the environment, never here.
pub fn build_client_args(profile: &ProfileInfo) -> Vec<String> {
    let mut args = vec![
        format!("--host={}", profile.host),
        format!("--port={}", profile.port),
    ];
    let user = profile.credentials.username();
    if !user.is_empty() {
        args.push(format!("--user={}", user));
    }
    args.push("--force".to_string());
    args.push("--reconnect".to_string());
    args.push(format!("--max_allowed_packet={}", MAX_ALLOWED_PACKET));
    args
}

/// Returns true if `error` is the client's TLS negotiation mismatch.
///
/// Matches messages containing both "tls/ssl error" and "server does not
/// support", case-insensitively.
pub fn is_transport_mismatch(error: &DbRestoreError) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("tls/ssl error") && message.contains("server does not support")
}

/// Returns `args` with transport security disabled.
pub fn with_transport_fallback(args: &[String]) -> Vec<String> {
    let mut fallback = args.to_vec();
    if !fallback.iter().any(|a| a == SKIP_SSL_FLAG) {
        fallback.push(SKIP_SSL_FLAG.to_string());
    }
    fallback
}
