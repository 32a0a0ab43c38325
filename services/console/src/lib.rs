//! DisasterGuard Console
//!
//! Terminal front end for the disaster-risk dashboard: location analysis,
//! community reports, and the realtime voice session.

pub mod audio;
pub mod audio_utils;
pub mod briefing;
pub mod config;
pub mod error;
pub mod voice;
