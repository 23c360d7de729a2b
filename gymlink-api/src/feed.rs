use std::fmt;

use uuid::Uuid;

use crate::{CommentNode, PostId, Time, UserId};

/// One logical push channel, scoped to a single resource
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Channel {
    PostComments(PostId),
    PostLikes(PostId),
    Notifications(UserId),
}

impl Channel {
    pub fn topic(&self) -> String {
        match self {
            Channel::PostComments(p) => format!("posts/{}/comments", p.0),
            Channel::PostLikes(p) => format!("posts/{}/likes", p.0),
            Channel::Notifications(u) => format!("users/{}/notifications", u.0),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub created_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedData {
    NewComment(CommentNode),
    #[serde(rename_all = "camelCase")]
    LikeCount {
        post: PostId,
        like_count: u64,
    },
    Notification(Notification),
}

/// A server-originated event, as pushed on a channel
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FeedEvent {
    pub timestamp: Time,
    pub data: FeedData,
}

/// Business key used to recognize an event that was already delivered
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DedupKey {
    pub source: Uuid,
    pub timestamp: Time,
}

impl FeedEvent {
    pub fn dedup_key(&self) -> DedupKey {
        let source = match &self.data {
            FeedData::NewComment(c) => c.id.0,
            FeedData::LikeCount { post, .. } => post.0,
            FeedData::Notification(n) => n.id,
        };
        DedupKey {
            source,
            timestamp: self.timestamp,
        }
    }
}

/// Messages sent by the client on the feed websocket
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedRequest {
    Subscribe(String),
    Unsubscribe(String),
}

/// Messages sent by the server on the feed websocket
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Event { topic: String, event: FeedEvent },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_events_key_on_post_and_time() {
        let post = PostId(Uuid::new_v4());
        let timestamp = chrono::Utc::now();
        let e = FeedEvent {
            timestamp,
            data: FeedData::LikeCount {
                post,
                like_count: 3,
            },
        };
        assert_eq!(
            e.dedup_key(),
            DedupKey {
                source: post.0,
                timestamp
            }
        );
    }

    #[test]
    fn subscribe_request_wire_format() {
        let req = FeedRequest::Subscribe(Channel::PostLikes(PostId::stub()).topic());
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({ "subscribe": "posts/ffffffff-ffff-ffff-ffff-ffffffffffff/likes" })
        );
    }
}
