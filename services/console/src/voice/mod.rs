pub mod session;
pub mod transcript;

pub use session::{SessionEvent, SessionState, VoiceSession, VoiceUpdate};
pub use transcript::Transcripts;
