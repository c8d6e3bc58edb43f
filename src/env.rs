//! Runtime environment detection.
//!
//! Provides a single source of truth for determining the runtime environment
//! (test, development, production) based on the `GTO_ENV` environment variable.
//!
//! # Usage
//!
//! ```rust
//! use gto::env::Environment;
//!
//! if Environment::current().is_development() {
//!     // Talk to the local server
//! }
//! ```
//!
//! # Environment Variable
//!
//! Set `GTO_ENV` to one of:
//! - `test` - Test mode (uses file storage instead of keyring)
//! - `development` or `dev` - Development mode (local server)
//! - (anything else or unset) - Production mode

/// Runtime environment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment, talks to a local server.
    Development,
    /// Test environment - uses file storage for credentials.
    Test,
}

impl Environment {
    /// Detect current environment from `GTO_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("GTO_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Returns `true` if keyring should be bypassed in favor of file storage.
#[must_use]
pub fn should_skip_keyring() -> bool {
    Environment::current().is_test()
}
