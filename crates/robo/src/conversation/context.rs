use crate::models::content::CacheControl;
use crate::models::message::Message;

/// The slice of the transcript sent to the backend.
///
/// Oneshot conversations send only the newest message. With prompt caching
/// the outgoing copy gets a cache marker on its final block; the stored
/// transcript is never touched.
pub(crate) fn context_window(
    messages: &[Message],
    oneshot: bool,
    cache_user_prompt: bool,
) -> Vec<Message> {
    let mut window = if oneshot {
        messages.last().cloned().into_iter().collect()
    } else {
        messages.to_vec()
    };

    if cache_user_prompt {
        if let Some(block) = window.last_mut().and_then(|m| m.content.last_mut()) {
            block.set_cache_control(Some(CacheControl::Ephemeral));
        }
    }
    window
}
