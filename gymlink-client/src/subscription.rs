use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::{
    api::{Channel, DedupKey, FeedEvent, FeedSource},
    Error,
};

pub const DEDUP_CAPACITY: usize = 4096;

/// Remembers the last `capacity` event keys
#[derive(Debug)]
pub struct DedupFilter {
    capacity: usize,
    seen: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
}

impl DedupFilter {
    pub fn new(capacity: usize) -> DedupFilter {
        DedupFilter {
            capacity,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `false` if `key` was already admitted
    pub fn admit(&mut self, key: DedupKey) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

struct Active {
    channel: Channel,
    live: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Channel subscription delivering each distinct event once, in arrival order
///
/// At most one channel is open at a time. Dropping the subscription closes it.
pub struct RealtimeSubscription<F> {
    source: Arc<F>,
    active: Option<Active>,
}

impl<F: FeedSource + 'static> RealtimeSubscription<F> {
    pub fn new(source: Arc<F>) -> RealtimeSubscription<F> {
        RealtimeSubscription {
            source,
            active: None,
        }
    }

    /// Channel currently delivering events
    ///
    /// A channel whose event stream has ended is no longer reported, and
    /// subscribing to it again reopens it.
    pub fn channel(&self) -> Option<Channel> {
        self.active
            .as_ref()
            .filter(|a| !a.task.is_finished())
            .map(|a| a.channel)
    }

    /// Opens `channel` and starts delivering its events to `on_event`
    ///
    /// Subscribing again to the open channel is a no-op that keeps the first
    /// callback, unless its stream has ended since. Subscribing to another channel closes the current one first.
    pub async fn subscribe<C>(&mut self, channel: Channel, mut on_event: C) -> Result<(), Error>
    where
        C: 'static + Send + FnMut(FeedEvent),
    {
        if self.channel() == Some(channel) {
            tracing::trace!(%channel, "already subscribed");
            return Ok(());
        }
        self.unsubscribe();

        let mut events = self.source.open(&channel).await?;
        tracing::debug!(%channel, "subscribed");
        let live = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn({
            let live = live.clone();
            async move {
                let mut dedup = DedupFilter::new(DEDUP_CAPACITY);
                while let Some(event) = events.next().await {
                    if !live.load(Ordering::Acquire) {
                        break;
                    }
                    if !dedup.admit(event.dedup_key()) {
                        tracing::trace!(%channel, key = ?event.dedup_key(), "dropping duplicate event");
                        continue;
                    }
                    on_event(event);
                }
                tracing::debug!(%channel, "event stream ended");
            }
        });
        self.active = Some(Active {
            channel,
            live,
            task,
        });
        Ok(())
    }

    /// Stops delivery; events already delivered are not affected
    pub fn unsubscribe(&mut self) {
        if let Some(a) = self.active.take() {
            a.live.store(false, Ordering::Release);
            a.task.abort();
            tracing::debug!(channel = %a.channel, "unsubscribed");
        }
    }
}

impl<F> Drop for RealtimeSubscription<F> {
    fn drop(&mut self) {
        if let Some(a) = self.active.take() {
            a.live.store(false, Ordering::Release);
            a.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use futures::stream::BoxStream;
    use uuid::Uuid;

    use super::*;
    use crate::api::{PostId, TransportError};

    fn key(n: u128, t: i64) -> DedupKey {
        DedupKey {
            source: Uuid::from_u128(n),
            timestamp: Utc.timestamp_opt(t, 0).unwrap(),
        }
    }

    /// Serves channels whose stream ends right away, like a dropped connection
    #[derive(Default)]
    struct EndedFeed {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl FeedSource for EndedFeed {
        async fn open(
            &self,
            _channel: &Channel,
        ) -> Result<BoxStream<'static, FeedEvent>, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(futures::stream::empty().boxed())
        }
    }

    #[tokio::test]
    async fn ended_stream_can_be_reopened() {
        let feed = Arc::new(EndedFeed::default());
        let mut sub = RealtimeSubscription::new(feed.clone());
        let channel = Channel::PostLikes(PostId::stub());

        sub.subscribe(channel, |_| ()).await.unwrap();
        while sub.channel().is_some() {
            tokio::task::yield_now().await;
        }

        sub.subscribe(channel, |_| ()).await.unwrap();
        assert_eq!(feed.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn live_channel_is_not_reopened() {
        let feed = Arc::new(EndedFeed::default());
        let mut sub = RealtimeSubscription::new(feed.clone());
        let channel = Channel::PostComments(PostId::stub());

        sub.subscribe(channel, |_| ()).await.unwrap();
        // the spawned task has not run yet, so the stream has not ended
        assert_eq!(sub.channel(), Some(channel));
        sub.subscribe(channel, |_| ()).await.unwrap();
        assert_eq!(feed.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_source_at_another_time_is_distinct() {
        let mut f = DedupFilter::new(16);
        assert!(f.admit(key(1, 10)));
        assert!(!f.admit(key(1, 10)));
        assert!(f.admit(key(1, 11)));
        assert!(f.admit(key(2, 10)));
        assert_eq!(f.len(), 3);
    }

    #[test]
    fn oldest_keys_are_forgotten_past_capacity() {
        let mut f = DedupFilter::new(2);
        assert!(f.admit(key(1, 0)));
        assert!(f.admit(key(2, 0)));
        assert!(f.admit(key(3, 0)));
        assert_eq!(f.len(), 2);
        assert!(!f.admit(key(3, 0)));
        assert!(f.admit(key(1, 0)));
    }
}
