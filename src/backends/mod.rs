//! Concrete generation and transcription backends.

pub mod command;
pub mod openai;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use command::CommandModel;
pub use openai::{OpenAiConfig, OpenAiGenerator, OpenAiTranscriber};
#[cfg(feature = "whisper")]
pub use whisper::WhisperTranscriber;
