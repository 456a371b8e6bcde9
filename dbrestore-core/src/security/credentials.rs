//! Target account credentials.
//!
//! Both fields live in `Zeroizing` storage and are wiped on drop. The
//! password is masked in `Debug` output and only leaves this type through
//! [`Credentials::password`], which callers hand to client processes via the
//! environment.

use zeroize::{Zeroize, Zeroizing};

/// Username and optional password for the restore target.
///
/// An empty password is stored as no password.
///
/// ```rust
/// use dbrestore_core::security::Credentials;
///
/// let creds = Credentials::new("restore_admin".to_string(), Some("secret".to_string()));
/// assert_eq!(creds.username(), "restore_admin");
/// assert!(creds.has_password());
/// assert!(!format!("{:?}", creds).contains("secret"));
///
/// let anonymous = Credentials::new("root".to_string(), Some(String::new()));
/// assert!(!anonymous.has_password());
/// ```
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    pub username: Zeroizing<String>,
    pub password: Zeroizing<Option<String>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let password = if self.has_password() { Some("****") } else { None };
        f.debug_struct("Credentials")
            .field("username", &self.username())
            .field("password", &password)
            .finish()
    }
}

impl Credentials {
    pub fn new(username: String, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username),
            password: Zeroizing::new(password.filter(|p| !p.is_empty())),
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Password for the client process environment. Never log it.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Same username with `password` instead.
    pub fn with_password(&self, password: Option<String>) -> Self {
        Self::new(self.username().to_string(), password)
    }
}
