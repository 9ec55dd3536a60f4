use futures::stream::{self, Stream};
use tracing::debug;

use kolokol_shared::{ChatId, Message, PageCursor, RemoteError};

use crate::store::RemoteStore;

/// Walk a chat's history backwards, one page per item.
///
/// The stream ends after the first short or empty page, or after an error.
/// Passing a cursor taken from any yielded page restarts the walk from
/// there.
pub fn history<'a, R>(
    store: &'a R,
    chat_id: ChatId,
    page_size: usize,
    start: Option<PageCursor>,
) -> impl Stream<Item = Result<Vec<Message>, RemoteError>> + 'a
where
    R: RemoteStore,
{
    // Outer `None` marks the end of the walk.
    stream::unfold(Some(start), move |state| {
        let chat_id = chat_id.clone();
        async move {
            let cursor = state?;
            match store
                .fetch_messages(&chat_id, page_size, cursor.as_ref())
                .await
            {
                Ok(page) if page.is_empty() => None,
                Ok(page) => {
                    let next = if page.len() < page_size {
                        None
                    } else {
                        page.last().map(|m| Some(m.cursor()))
                    };
                    debug!(chat = %chat_id, len = page.len(), more = next.is_some(), "History page");
                    Some((Ok(page), next))
                }
                Err(e) => Some((Err(e), None)),
            }
        }
    })
}
