//! Security utilities for credential protection and encryption.
//!
//! This module provides security-focused utilities including:
//! - Credential sanitization and secure memory handling
//! - Target profile parsing with automatic credential extraction
//! - The streaming AES-GCM envelope for encrypted dumps (feature-gated)
//!
//! # Module Structure
//! - `credentials`: Secure credential container with automatic memory zeroing
//! - `profile`: `mysql://` URL parsing into a [`ProfileInfo`]
//! - `encryption`: Chunked AES-GCM reader/writer with PBKDF2 key derivation

mod credentials;
mod profile;

#[cfg(feature = "encryption")]
pub mod encryption;

pub use credentials::Credentials;
pub use profile::{DEFAULT_MYSQL_PORT, ProfileInfo, parse_profile_url};
