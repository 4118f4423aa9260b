use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Assistant,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_processing: bool,
    pub is_error: bool,
    pub is_skeleton: bool,
    pub is_streaming: bool,
    pub streaming_progress: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageOptions {
    pub is_processing: bool,
    pub is_error: bool,
    pub is_skeleton: bool,
    pub is_streaming: bool,
    pub streaming_progress: u8,
}

impl MessageOptions {
    pub fn processing() -> Self {
        Self {
            is_processing: true,
            ..Self::default()
        }
    }

    pub fn skeleton() -> Self {
        Self {
            is_skeleton: true,
            ..Self::default()
        }
    }
}

/// Partial in-place edit of the newest message; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageUpdate {
    pub text: Option<String>,
    pub is_processing: Option<bool>,
    pub is_error: Option<bool>,
    pub is_skeleton: Option<bool>,
    pub is_streaming: Option<bool>,
    pub streaming_progress: Option<u8>,
}

impl MessageUpdate {
    /// Settles a processing placeholder into its final text.
    pub fn resolved(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_processing: Some(false),
            ..Self::default()
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_processing: Some(false),
            is_error: Some(true),
            ..Self::default()
        }
    }

    fn apply(self, message: &mut Message) {
        if let Some(text) = self.text {
            message.text = text;
        }
        if let Some(v) = self.is_processing {
            message.is_processing = v;
        }
        if let Some(v) = self.is_error {
            message.is_error = v;
        }
        if let Some(v) = self.is_skeleton {
            message.is_skeleton = v;
        }
        if let Some(v) = self.is_streaming {
            message.is_streaming = v;
        }
        if let Some(v) = self.streaming_progress {
            message.streaming_progress = v.min(100);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn push(&mut self, sender: Sender, text: impl Into<String>, options: MessageOptions) -> &Message {
        self.messages.push(Message {
            sender,
            text: text.into(),
            timestamp: Utc::now(),
            is_processing: options.is_processing,
            is_error: options.is_error,
            is_skeleton: options.is_skeleton,
            is_streaming: options.is_streaming,
            streaming_progress: options.streaming_progress.min(100),
        });
        &self.messages[self.messages.len() - 1]
    }

    /// Returns false when the log is empty.
    pub fn update_last(&mut self, update: MessageUpdate) -> bool {
        match self.messages.last_mut() {
            Some(last) => {
                update.apply(last);
                true
            }
            None => false,
        }
    }

    /// True when the newest entry is already this user's settled text, e.g. a
    /// voice transcription that was filled into its skeleton in place.
    pub fn ends_with_user_text(&self, text: &str) -> bool {
        self.messages
            .last()
            .is_some_and(|m| m.sender == Sender::User && !m.is_skeleton && m.text == text)
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }
}
