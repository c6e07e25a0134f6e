//! Key resolution for a conversation.

use ircx_core::{ConversationKind, ConversationRef, E2eeResult};
use ircx_crypto::SymmetricKey;
use ircx_keystore::KeyResolver;

/// Key plus the identifier that goes into the AAD.
///
/// Channels use the channel name. Queries use the DM conversation id, since
/// each peer knows the other under a different nick.
pub(crate) struct ConversationKey {
    pub key: SymmetricKey,
    pub identifier: String,
}

pub(crate) async fn resolve<R: KeyResolver>(
    keys: &R,
    conversation: &ConversationRef,
) -> E2eeResult<ConversationKey> {
    match conversation.kind {
        ConversationKind::Channel => Ok(ConversationKey {
            key: keys
                .channel_key(&conversation.identifier, &conversation.network)
                .await?,
            identifier: conversation.identifier.clone(),
        }),
        ConversationKind::Query => {
            let dm = keys
                .dm_context(&conversation.network, &conversation.identifier)
                .await?;
            Ok(ConversationKey {
                key: dm.key,
                identifier: dm.conversation_id,
            })
        }
    }
}
