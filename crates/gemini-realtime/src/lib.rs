//! Client for the Gemini Live bidirectional audio API.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{DEFAULT_LIVE_ENDPOINT, GeminiLiveConnector};
pub use transport::{LiveConnection, LiveConnector, LiveError, LiveEvent, LiveSetup, LiveTransport};
