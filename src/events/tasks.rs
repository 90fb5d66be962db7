//! Periodic maintenance running alongside the connection handlers.
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_stream::wrappers::IntervalStream;

use super::{EventBody, Hub};
use crate::database;
use crate::media;
use crate::messages::Message;

/// A typing indicator with no refresh for this long is considered stale.
const TYPING_QUIET: Duration = Duration::from_secs(3);
const TYPING_SWEEP: Duration = Duration::from_secs(1);
const ATTACHMENT_SWEEP: Duration = Duration::from_secs(60 * 60);

async fn sweep_typing(hub: Arc<Hub>) {
    IntervalStream::new(tokio::time::interval(TYPING_SWEEP))
        .for_each(|_| {
            let hub = hub.clone();
            async move {
                for (user_id, username) in hub.expire_quiet(TYPING_QUIET).await {
                    hub.broadcast(EventBody::Typing {
                        user_id,
                        username,
                        is_typing: false,
                    });
                }
            }
        })
        .await;
}

// The first tick fires immediately, so leftovers from a previous run are
// cleared right after startup. The database guard is released before the
// file deletes, which must not hold up other queries.
async fn sweep_attachments() {
    IntervalStream::new(tokio::time::interval(ATTACHMENT_SWEEP))
        .for_each(|_| async {
            let swept = {
                let db = database::get().await;
                Message::clean_expired_attachments(&db)
            };
            match swept {
                Ok((0, _)) => (),
                Ok((cleared, urls)) => {
                    media::discard_stored(media::store(), &urls).await;
                    log::info!("Cleared {} expired inline attachments", cleared);
                }
                Err(e) => log::warn!("The attachment sweep failed: {}", e),
            }
        })
        .await;
}

pub fn start(hub: Arc<Hub>) {
    tokio::spawn(sweep_typing(hub));
    tokio::spawn(sweep_attachments());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_spawnable<T: std::future::Future + Send + 'static>(_: T) {}

    // Compile-time check: both sweeps must stay spawnable, so nothing
    // non-Send (like a database connection borrow) may live across an await.
    #[test]
    fn sweeps_are_spawnable() {
        assert_spawnable(sweep_typing(Arc::new(Hub::new())));
        assert_spawnable(sweep_attachments());
    }
}
