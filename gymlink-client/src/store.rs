use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    api::{Channel, FeedData, FeedEvent, Notification, PostId},
    Comment, CommentTree, LikeBook, LikeState,
};

struct StoreInner {
    comments: Mutex<HashMap<PostId, watch::Sender<CommentTree>>>,
    likes: watch::Sender<LikeBook>,
    notifications: watch::Sender<Arc<Vec<Notification>>>,
}

/// Client-side state shared between the UI and the sync tasks
///
/// Each value lives in a `watch` channel. Mutators replace the whole value and
/// only wake watchers when something actually changed.
#[derive(Clone)]
pub struct Store(Arc<StoreInner>);

impl Default for Store {
    fn default() -> Store {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Store {
        Store(Arc::new(StoreInner {
            comments: Mutex::new(HashMap::new()),
            likes: watch::channel(LikeBook::new()).0,
            notifications: watch::channel(Arc::new(Vec::new())).0,
        }))
    }

    fn with_comments<R>(&self, post: PostId, f: impl FnOnce(&watch::Sender<CommentTree>) -> R) -> R {
        let mut comments = self.0.comments.lock();
        let sender = comments
            .entry(post)
            .or_insert_with(|| watch::channel(CommentTree::new()).0);
        f(sender)
    }

    pub fn watch_comments(&self, post: PostId) -> watch::Receiver<CommentTree> {
        self.with_comments(post, |s| s.subscribe())
    }

    pub fn comments(&self, post: PostId) -> CommentTree {
        self.with_comments(post, |s| s.borrow().clone())
    }

    pub fn replace_comments(&self, post: PostId, tree: CommentTree) {
        self.with_comments(post, |s| {
            s.send_if_modified(|current| {
                if current.ptr_eq(&tree) {
                    return false;
                }
                *current = tree;
                true
            })
        });
    }

    /// Returns whether the tree changed
    pub fn merge_comment(&self, post: PostId, comment: Comment) -> bool {
        self.with_comments(post, |s| {
            s.send_if_modified(|current| {
                let next = current.merge(comment);
                if next.ptr_eq(current) {
                    return false;
                }
                *current = next;
                true
            })
        })
    }

    pub fn watch_likes(&self) -> watch::Receiver<LikeBook> {
        self.0.likes.subscribe()
    }

    pub fn like(&self, post: &PostId) -> Option<LikeState> {
        self.0.likes.borrow().get(post)
    }

    fn update_likes(&self, f: impl FnOnce(&LikeBook) -> LikeBook) -> bool {
        self.0.likes.send_if_modified(|current| {
            let next = f(current);
            if next.ptr_eq(current) {
                return false;
            }
            *current = next;
            true
        })
    }

    pub fn set_like(&self, post: PostId, state: LikeState) -> bool {
        self.update_likes(|b| b.with_state(post, state))
    }

    pub fn apply_remote_like_count(&self, post: PostId, count: u64) -> bool {
        self.update_likes(|b| b.with_remote_count(post, count))
    }

    pub fn watch_notifications(&self) -> watch::Receiver<Arc<Vec<Notification>>> {
        self.0.notifications.subscribe()
    }

    pub fn notifications(&self) -> Arc<Vec<Notification>> {
        self.0.notifications.borrow().clone()
    }

    pub fn push_notification(&self, n: Notification) -> bool {
        self.0.notifications.send_if_modified(|current| {
            if current.iter().any(|known| known.id == n.id) {
                return false;
            }
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(n);
            *current = Arc::new(next);
            true
        })
    }

    /// Forgets everything, for when the session is gone
    pub fn clear(&self) {
        for tree in self.0.comments.lock().values() {
            tree.send_if_modified(|t| {
                let changed = !t.is_empty();
                *t = CommentTree::new();
                changed
            });
        }
        self.0.likes.send_if_modified(|b| {
            let changed = !b.is_empty();
            *b = LikeBook::new();
            changed
        });
        self.0.notifications.send_if_modified(|n| {
            let changed = !n.is_empty();
            *n = Arc::new(Vec::new());
            changed
        });
    }

    /// Folds a push event received on `channel` into the store
    ///
    /// Returns whether anything changed. Events whose payload does not belong
    /// to the channel they came from are ignored.
    pub fn apply_feed_event(&self, channel: &Channel, event: FeedEvent) -> bool {
        match (channel, event.data) {
            (Channel::PostComments(post), FeedData::NewComment(node)) => {
                self.merge_comment(*post, Comment::from(node))
            }
            (Channel::PostLikes(post), FeedData::LikeCount { post: p, like_count }) if *post == p => {
                self.apply_remote_like_count(p, like_count)
            }
            (Channel::Notifications(_), FeedData::Notification(n)) => self.push_notification(n),
            (channel, data) => {
                tracing::debug!(%channel, ?data, "ignoring event not matching its channel");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn unchanged_values_do_not_wake_watchers() {
        let store = Store::new();
        let post = PostId::stub();
        let mut likes = store.watch_likes();
        let state = LikeState {
            count: 5,
            liked_by_me: false,
        };

        assert!(store.set_like(post, state));
        assert!(likes.has_changed().unwrap());
        drop(likes.borrow_and_update());

        assert!(!store.set_like(post, state));
        assert!(!likes.has_changed().unwrap());
    }

    #[test]
    fn remote_like_event_never_sets_liked_by_me() {
        let store = Store::new();
        let post = PostId::stub();
        let event = FeedEvent {
            timestamp: Utc::now(),
            data: FeedData::LikeCount {
                post,
                like_count: 12,
            },
        };
        assert!(store.apply_feed_event(&Channel::PostLikes(post), event));
        assert_eq!(
            store.like(&post),
            Some(LikeState {
                count: 12,
                liked_by_me: false
            })
        );
    }

    #[test]
    fn events_on_the_wrong_channel_are_ignored() {
        let store = Store::new();
        let post = PostId::stub();
        let other = PostId(Uuid::new_v4());
        let event = FeedEvent {
            timestamp: Utc::now(),
            data: FeedData::LikeCount {
                post: other,
                like_count: 1,
            },
        };
        assert!(!store.apply_feed_event(&Channel::PostLikes(post), event));
        assert_eq!(store.like(&other), None);
    }

    #[test]
    fn clear_forgets_everything() {
        let store = Store::new();
        let post = PostId::stub();
        store.set_like(post, LikeState::default());
        let mut likes = store.watch_likes();
        store.clear();
        assert!(likes.has_changed().unwrap());
        assert_eq!(likes.borrow_and_update().get(&post), None);
        store.clear();
        assert!(!likes.has_changed().unwrap());
    }

    #[test]
    fn notifications_append_once() {
        let store = Store::new();
        let n = Notification {
            id: Uuid::new_v4(),
            message: String::from("your booking is confirmed"),
            created_at: Utc::now(),
        };
        assert!(store.push_notification(n.clone()));
        assert!(!store.push_notification(n));
        assert_eq!(store.notifications().len(), 1);
    }
}
