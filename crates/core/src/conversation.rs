//! Conversation-related types.

use novus_model::{AssistantToolCalls, ModelMessage, ToolCallResult};

/// An append-only record of one session's exchange with the model.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    items: Vec<Item>,
}

impl Conversation {
    /// Returns all items, oldest first.
    #[inline]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Returns the number of items.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing has been said yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn push(&mut self, msg: ModelMessage) {
        let transcript = match &msg {
            ModelMessage::System(text)
            | ModelMessage::User(text)
            | ModelMessage::Assistant(text) => text.clone(),
            ModelMessage::ToolCalls(AssistantToolCalls { content, calls }) => {
                let names: Vec<_> =
                    calls.iter().map(|call| call.name.as_str()).collect();
                let calls = format!("[calling {}]", names.join(", "));
                if content.is_empty() {
                    calls
                } else {
                    format!("{content}\n{calls}")
                }
            }
            ModelMessage::Tool(ToolCallResult { id, content }) => {
                format!("[{id}] {content}")
            }
        };
        self.items.push(Item { msg, transcript });
    }

    pub(crate) fn messages(&self) -> Vec<ModelMessage> {
        self.items.iter().map(|item| item.msg.clone()).collect()
    }
}

/// An item in the conversation.
#[derive(Clone, Debug)]
pub struct Item {
    msg: ModelMessage,
    transcript: String,
}

impl Item {
    /// Returns the underlying model message.
    #[inline]
    pub fn message(&self) -> &ModelMessage {
        &self.msg
    }

    /// Returns the transcript of this item.
    ///
    /// The transcript is a human-readable rendering of the item, which can
    /// be exported later. It is not enough to reconstruct the message.
    #[inline]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}
