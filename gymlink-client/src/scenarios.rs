#![cfg(test)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::Utc;
use gymlink_mock_server::MockServer;
use http::StatusCode;

use crate::{
    api::{
        self, paths, Channel, FeedData, FeedEvent, NewComment, NewSession, PostId, TransportError,
        User, UserId, Uuid,
    },
    ClientConfig, Error, GymClient, LikeState, RealtimeSubscription, RefreshFailure,
    ToggleOutcome,
};

type Client = GymClient<MockServer, MockServer>;

async fn logged_in() -> (Arc<MockServer>, Client, User) {
    let server = Arc::new(MockServer::new());
    let user = server.create_user("alice", "hunter2");
    let config = ClientConfig::new("http://gym.test").expect("valid host");
    let client = GymClient::new(server.clone(), server.clone(), &config);
    let me = client
        .login(&NewSession::new(String::from("alice"), String::from("hunter2")))
        .await
        .expect("logging in");
    assert_eq!(me, user);
    (server, client, user)
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

fn new_post() -> PostId {
    PostId(Uuid::new_v4())
}

fn reply(content: &str, parent: Option<api::CommentId>) -> NewComment {
    NewComment {
        content: String::from(content),
        parent_comment_id: parent,
    }
}

#[tokio::test]
async fn concurrent_expired_requests_trigger_a_single_refresh() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    server.expire_session();

    let (r1, r2, r3) = futures::join!(
        client.requests().fetch_like(&post),
        client.requests().fetch_comments(&post),
        client.requests().fetch_like(&post),
    );
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();
    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(server.request_count(&paths::like(&post)), 4);
    assert_eq!(server.request_count(&paths::comments(&post)), 2);
    assert!(!client.requests().coordinator().is_refreshing());
}

#[tokio::test]
async fn requests_failing_during_refresh_wait_for_it() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    server.expire_session();
    let release = server.hold_next(paths::REFRESH);
    let coordinator = client.requests().coordinator();

    let (a, b, ()) = futures::join!(
        client.requests().fetch_like(&post),
        client.requests().fetch_comments(&post),
        async move {
            eventually(|| coordinator.parked() == 1).await;
            assert!(coordinator.is_refreshing());
            release.send(()).unwrap();
        },
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(server.refresh_calls(), 1);
}

#[tokio::test]
async fn failed_refresh_invalidates_the_session() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    server.seed_likes(post, 3);
    client.load_post(post).await.unwrap();
    assert!(client.store().like(&post).is_some());

    let invalidations = Arc::new(AtomicUsize::new(0));
    let _listener = {
        let invalidations = invalidations.clone();
        client.session_events().subscribe(move |_| {
            invalidations.fetch_add(1, Ordering::SeqCst);
        })
    };
    server.expire_session();
    server.fail_next_refresh();

    let (r1, r2) = futures::join!(
        client.requests().fetch_like(&post),
        client.requests().fetch_comments(&post),
    );
    let expected = Error::SessionExpired(RefreshFailure::Rejected(StatusCode::UNAUTHORIZED));
    assert_eq!(r1.unwrap_err(), expected);
    assert_eq!(r2.unwrap_err(), expected);
    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(client.store().like(&post), None, "store is wiped");

    // the identity check is exempt: it reports the missing session without refreshing
    assert_eq!(client.whoami().await, Ok(None));
    assert_eq!(server.refresh_calls(), 1);
}

#[tokio::test]
async fn like_reconciles_to_the_server() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    server.seed_likes(post, 5);
    let (_, initial) = client.load_post(post).await.unwrap();
    assert_eq!(
        initial,
        LikeState {
            count: 5,
            liked_by_me: false
        }
    );

    let expected = LikeState {
        count: 6,
        liked_by_me: true,
    };
    assert_eq!(
        client.toggle_like(post).await,
        Ok(ToggleOutcome::Settled(expected))
    );
    assert_eq!(client.store().like(&post), Some(expected));
}

#[tokio::test]
async fn like_takes_concurrent_likes_into_account() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    server.seed_likes(post, 5);
    client.load_post(post).await.unwrap();
    let release = server.hold_next(&paths::like(&post));
    let store = client.store().clone();
    let other = server.create_user("bob", "pass");

    let (outcome, ()) = futures::join!(client.toggle_like(post), async {
        eventually(|| {
            store.like(&post)
                == Some(LikeState {
                    count: 6,
                    liked_by_me: true,
                })
        })
        .await;
        server.remote_toggle_like(post, other.id);
        release.send(()).unwrap();
    });
    let expected = LikeState {
        count: 7,
        liked_by_me: true,
    };
    assert_eq!(outcome, Ok(ToggleOutcome::Settled(expected)));
    assert_eq!(store.like(&post), Some(expected));
}

#[tokio::test]
async fn failed_like_rolls_back() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    server.seed_likes(post, 5);
    client.load_post(post).await.unwrap();
    server.inject_transport_failure(&paths::like(&post), TransportError::Timeout);

    assert_eq!(
        client.toggle_like(post).await,
        Err(Error::Transport(TransportError::Timeout))
    );
    assert_eq!(
        client.store().like(&post),
        Some(LikeState {
            count: 5,
            liked_by_me: false
        })
    );
    assert_eq!(server.refresh_calls(), 0, "a timeout is not an auth failure");
}

#[tokio::test]
async fn realtime_reply_lands_under_own_comment() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    let channel = Channel::PostComments(post);
    let _sub = client.watch(channel).await.unwrap();
    let bob = server.create_user("bob", "pass");

    let a = client.post_comment(post, reply("A", None)).await.unwrap();
    let after_post = client.store().comments(post);
    assert_eq!(after_post.len(), 1);

    // the echo of A reaches the subscription first, then B
    let b = server
        .remote_comment(post, bob.id, "B", Some(a.id))
        .unwrap();
    let store = client.store().clone();
    eventually(|| store.comments(post).len() == 2).await;
    let tree = store.comments(post);
    assert_eq!(tree.roots().len(), 1);
    assert_eq!(tree.roots()[0].id, a.id);
    assert_eq!(tree.roots()[0].children[0].id, b.id);

    // redelivery under a new timestamp passes dedup but merges as a no-op
    server.push(
        &channel,
        FeedEvent {
            timestamp: Utc::now(),
            data: FeedData::NewComment(b),
        },
    );
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert!(store.comments(post).ptr_eq(&tree));
}

#[tokio::test]
async fn duplicate_events_are_delivered_once() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    let channel = Channel::PostLikes(post);
    let _sub = client.watch(channel).await.unwrap();

    let at = Utc::now();
    let like_count = |like_count, timestamp| FeedEvent {
        timestamp,
        data: FeedData::LikeCount { post, like_count },
    };
    server.push(&channel, like_count(5, at));
    server.push(&channel, like_count(9, at));
    server.push(&channel, like_count(7, at + chrono::Duration::seconds(1)));

    let store = client.store().clone();
    eventually(|| store.like(&post).map(|s| s.count) == Some(7)).await;

    let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut sub = RealtimeSubscription::new(server.clone());
    sub.subscribe(channel, {
        let delivered = delivered.clone();
        move |e: FeedEvent| delivered.lock().push(e)
    })
    .await
    .unwrap();
    server.push(&channel, like_count(5, at));
    server.push(&channel, like_count(9, at));
    server.push(&channel, like_count(7, at + chrono::Duration::seconds(1)));
    eventually(|| delivered.lock().len() == 2).await;
    let counts = delivered
        .lock()
        .iter()
        .map(|e| match e.data {
            FeedData::LikeCount { like_count, .. } => like_count,
            _ => unreachable!(),
        })
        .collect::<Vec<_>>();
    assert_eq!(counts, vec![5, 7]);
}

#[tokio::test]
async fn remote_likes_never_touch_own_like_flag() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    let _sub = client.watch(Channel::PostLikes(post)).await.unwrap();
    client.toggle_like(post).await.unwrap();

    let bob = server.create_user("bob", "pass");
    server.remote_toggle_like(post, bob.id);
    let store = client.store().clone();
    eventually(|| store.like(&post).map(|s| s.count) == Some(2)).await;
    assert_eq!(store.like(&post).map(|s| s.liked_by_me), Some(true));
}

#[tokio::test]
async fn subscription_lifecycle() {
    let server = Arc::new(MockServer::new());
    let first = Channel::PostComments(new_post());
    let second = Channel::PostLikes(new_post());
    let mut sub = RealtimeSubscription::new(server.clone());

    sub.subscribe(first, |_| ()).await.unwrap();
    sub.subscribe(first, |_| ()).await.unwrap();
    assert_eq!(server.feed_subscribers(&first), 1, "same channel is not reopened");

    sub.subscribe(second, |_| ()).await.unwrap();
    assert_eq!(sub.channel(), Some(second));
    eventually(|| server.feed_subscribers(&first) == 0).await;
    assert_eq!(server.feed_subscribers(&second), 1);

    drop(sub);
    eventually(|| server.feed_subscribers(&second) == 0).await;
}

#[tokio::test]
async fn unsubscribed_channel_stops_updating_the_store() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    let channel = Channel::PostLikes(post);
    let mut sub = client.watch(channel).await.unwrap();
    sub.unsubscribe();
    assert_eq!(sub.channel(), None);
    eventually(|| server.feed_subscribers(&channel) == 0).await;

    server.remote_toggle_like(post, UserId(Uuid::new_v4()));
    tokio::task::yield_now().await;
    assert_eq!(client.store().like(&post), None);
}

#[tokio::test]
async fn notifications_are_appended_in_order() {
    let (server, client, user) = logged_in().await;
    let _sub = client
        .watch(Channel::Notifications(user.id))
        .await
        .unwrap();
    let first = server.notify(user.id, "class moved to 6pm");
    let second = server.notify(user.id, "new personal record");
    let store = client.store().clone();
    eventually(|| store.notifications().len() == 2).await;
    assert_eq!(*store.notifications(), vec![first, second]);
}

#[tokio::test]
async fn server_errors_are_surfaced_verbatim() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    let conflict = api::Error::Conflict(String::from("comments are locked"));
    server.inject_failure(&paths::comments(&post), conflict.clone());

    assert_eq!(
        client.post_comment(post, reply("hello", None)).await,
        Err(Error::Api(conflict))
    );
    assert_eq!(server.refresh_calls(), 0);
    assert!(client.store().comments(post).is_empty());
}

#[tokio::test]
async fn invalid_comment_is_rejected_before_sending() {
    let (server, client, _) = logged_in().await;
    let post = new_post();
    assert!(matches!(
        client.post_comment(post, reply("   ", None)).await,
        Err(Error::Api(api::Error::Validation(_)))
    ));
    assert_eq!(server.request_count(&paths::comments(&post)), 0);
}

#[tokio::test]
async fn loading_a_post_seeds_the_nested_tree() {
    let (server, client, user) = logged_in().await;
    let post = new_post();
    let root = server.remote_comment(post, user.id, "root", None).unwrap();
    server
        .remote_comment(post, user.id, "child", Some(root.id))
        .unwrap();
    let (tree, _) = client.load_post(post).await.unwrap();
    assert_eq!(tree.len(), 2);
    assert!(client.store().comments(post).ptr_eq(&tree));
}

#[tokio::test]
async fn logout_forgets_the_session() {
    let (server, client, user) = logged_in().await;
    assert_eq!(client.whoami().await, Ok(Some(user)));
    client.logout().await.unwrap();
    assert_eq!(client.whoami().await, Ok(None));
    assert_eq!(
        client.requests().fetch_comments(&new_post()).await,
        Err(Error::SessionExpired(RefreshFailure::Rejected(
            StatusCode::UNAUTHORIZED
        )))
    );
    assert!(!server.is_session_valid());
}
