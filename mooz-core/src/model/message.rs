use crate::model::id::Id;
use crate::model::signaling::SignalData;
use serde::{Deserialize, Serialize};

/// Room protocol messages exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// A newcomer asks the room owner to let it in.
    JoinRoom,
    /// The room owner's answer: everyone the newcomer has to call, owner included.
    RoomReply {
        #[serde(rename = "shouldCall")]
        should_call: Vec<Id>,
    },
    /// Opens a pairwise negotiation. The receiver answers the offer that follows.
    Call,
    Signal { data: SignalData },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::JoinRoom => "joinroom",
            Message::RoomReply { .. } => "roomreply",
            Message::Call => "call",
            Message::Signal { .. } => "signal",
        }
    }
}

/// A message as it travels through the relay, stamped with its sender.
///
/// `from` sits next to the message's own fields, so a join request is
/// `{"type":"joinroom","from":"..."}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: Id,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(from: Id, message: Message) -> Self {
        Self { from, message }
    }
}
