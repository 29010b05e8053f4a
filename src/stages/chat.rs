//! Chat stage: a grounded, multi-turn coaching conversation.
//!
//! Stateless: the caller keeps the history and appends each exchange to it.

use crate::gateway::{Attribution, ChatTurn, GatewayError, ModelGateway};
use crate::model::{CrossReference, NamedDossier};
use crate::prompts::{self, sanitize_name};

use super::encode_payload;

pub const CALLER: &str = "stages::chat";

/// Static grounding for every message in one conversation.
#[derive(Debug, Clone, Copy)]
pub struct ChatContext<'a> {
    /// The person asking for advice.
    pub user: NamedDossier<'a>,
    /// The person they are meeting.
    pub partner: NamedDossier<'a>,
    pub cross_reference: &'a CrossReference,
}

impl<'a> ChatContext<'a> {
    pub fn new(
        user: NamedDossier<'a>,
        partner: NamedDossier<'a>,
        cross_reference: &'a CrossReference,
    ) -> Self {
        Self {
            user,
            partner,
            cross_reference,
        }
    }

    fn instruction(&self) -> Result<String, GatewayError> {
        let user_name = sanitize_name(self.user.name);
        let match_name = sanitize_name(self.partner.name);
        let user_dossier = encode_payload(self.user.dossier)?;
        let match_dossier = encode_payload(self.partner.dossier)?;
        let cross_reference = encode_payload(self.cross_reference)?;

        Ok(prompts::CHAT.render(&[
            ("user_name", &user_name),
            ("match_name", &match_name),
            ("user_dossier", &user_dossier),
            ("match_dossier", &match_dossier),
            ("cross_reference", &cross_reference),
        ]))
    }
}

/// Answer `message` given the conversation so far.
///
/// `history` is replayed in order and `message` goes last as a user turn.
pub async fn coach_chat(
    gateway: &dyn ModelGateway,
    ctx: &ChatContext<'_>,
    history: &[ChatTurn],
    message: &str,
) -> Result<String, GatewayError> {
    let mut turns = Vec::with_capacity(history.len() + 1);
    turns.extend_from_slice(history);
    turns.push(ChatTurn::user(message));

    tracing::debug!(history = history.len(), "coaching chat turn");
    let reply = gateway
        .complete(&ctx.instruction()?, &turns, Attribution::new(CALLER))
        .await?;
    Ok(reply.trim().to_string())
}
