//! Application-wide constants for gto.
//!
//! This module centralizes magic numbers and configuration constants.
//! Constants are grouped by domain with documentation explaining their
//! purpose.
//!
//! # Categories
//!
//! - **Timeouts**: Network timeouts
//! - **Endpoints**: Default server locations
//! - **WebSocket**: Close codes shared by the transport and the bootstrapper
//! - **Game settings**: Server-enforced room limits

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for API calls.
///
/// Applies to individual requests against the game API (auth, room listing).
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long leaving a room waits for the server to answer our close frame.
///
/// After this the store is cleared anyway and the socket task finishes on
/// its own.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the socket task waits to flush its reply to a server close.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Endpoints
// ============================================================================

/// API base URL used in development mode.
pub const DEV_API_URL: &str = "http://localhost:5000";

/// API base URL used in production.
pub const PROD_API_URL: &str = "https://api.gto.rakaoran.dev";

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "token";

// ============================================================================
// WebSocket
// ============================================================================

/// Normal closure (RFC 6455 section 7.4.1).
pub const CLOSE_NORMAL: u16 = 1000;

/// No status code was present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame (never sent on the wire).
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// Game settings
// ============================================================================

/// Allowed player count for a room.
pub const MAX_PLAYERS_RANGE: std::ops::RangeInclusive<u32> = 2..=20;

/// Allowed number of rounds.
pub const ROUNDS_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Allowed number of word choices offered to the drawer.
pub const WORDS_RANGE: std::ops::RangeInclusive<u32> = 1..=5;

/// Allowed word-choosing phase length, in seconds.
pub const CHOOSING_DURATION_RANGE: std::ops::RangeInclusive<u64> = 5..=120;

/// Allowed drawing phase length, in seconds.
pub const DRAWING_DURATION_RANGE: std::ops::RangeInclusive<u64> = 30..=300;
