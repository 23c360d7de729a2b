use std::{collections::HashMap, sync::Arc};

use crate::api::{LikeToggleResponse, PostId};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LikeState {
    pub count: u64,
    pub liked_by_me: bool,
}

impl LikeState {
    /// The state a successful toggle is expected to lead to
    pub fn flipped(self) -> LikeState {
        match self.liked_by_me {
            true => LikeState {
                count: self.count.saturating_sub(1),
                liked_by_me: false,
            },
            false => LikeState {
                count: self.count + 1,
                liked_by_me: true,
            },
        }
    }
}

impl From<LikeToggleResponse> for LikeState {
    fn from(r: LikeToggleResponse) -> LikeState {
        LikeState {
            count: r.like_count,
            liked_by_me: r.is_liked_by_current_user,
        }
    }
}

/// Like state of every post the client knows about
///
/// Same sharing rules as `CommentTree`: updates that change nothing return
/// the very same book.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LikeBook(Arc<HashMap<PostId, LikeState>>);

impl LikeBook {
    pub fn new() -> LikeBook {
        LikeBook::default()
    }

    pub fn get(&self, post: &PostId) -> Option<LikeState> {
        self.0.get(post).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ptr_eq(&self, other: &LikeBook) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn with_state(&self, post: PostId, state: LikeState) -> LikeBook {
        if self.get(&post) == Some(state) {
            return self.clone();
        }
        let mut map = (*self.0).clone();
        map.insert(post, state);
        LikeBook(Arc::new(map))
    }

    /// Applies a count pushed by the server
    ///
    /// Push events are not addressed to the current user, so they never touch
    /// `liked_by_me`.
    pub fn with_remote_count(&self, post: PostId, count: u64) -> LikeBook {
        let liked_by_me = self.get(&post).map(|s| s.liked_by_me).unwrap_or(false);
        self.with_state(post, LikeState { count, liked_by_me })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_is_an_involution_away_from_zero() {
        let s = LikeState {
            count: 5,
            liked_by_me: false,
        };
        assert_eq!(
            s.flipped(),
            LikeState {
                count: 6,
                liked_by_me: true
            }
        );
        assert_eq!(s.flipped().flipped(), s);
    }

    #[test]
    fn remote_count_keeps_own_like() {
        let post = PostId::stub();
        let book = LikeBook::new().with_state(
            post,
            LikeState {
                count: 6,
                liked_by_me: true,
            },
        );
        let after = book.with_remote_count(post, 9);
        assert_eq!(
            after.get(&post),
            Some(LikeState {
                count: 9,
                liked_by_me: true
            })
        );
        assert!(after.with_remote_count(post, 9).ptr_eq(&after));
    }
}
