//! Connection building for both channels: proxy-aware HTTP client,
//! manually tunneled WebSocket dialing, and the browser-impersonation
//! fallback transport.

pub(crate) mod impersonate;
pub(crate) mod session;
pub(crate) mod tunnel;

pub use session::SessionBuilder;
