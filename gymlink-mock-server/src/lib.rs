use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use futures::{
    channel::{mpsc, oneshot},
    stream::BoxStream,
    StreamExt,
};
use gymlink_api::{
    ApiRequest, ApiResponse, Channel, CommentId, CommentNode, Error, FeedData, FeedEvent,
    FeedSource, LikeToggleResponse, NewComment, NewSession, Notification, PostId, Transport,
    TransportError, User, UserId, Uuid,
};
use http::StatusCode;
use parking_lot::Mutex;

/// In-memory gym server, as seen by a single client
///
/// The client's cookie jar is modelled by `session`: there is at most one
/// logged-in user at a time. Tests drive the server's side of things (expiry,
/// failures, other users' activity) through the hooks below.
pub struct MockServer(Mutex<State>);

#[derive(Debug)]
struct MockUser {
    name: String,
    pass: String,
}

#[derive(Debug)]
struct Session {
    user: UserId,
    expired: bool,
}

#[derive(Debug, Default)]
struct MockPost {
    // flat, in creation order
    comments: Vec<CommentNode>,
    likes: BTreeSet<UserId>,
    anonymous_likes: u64,
}

impl MockPost {
    fn like_count(&self) -> u64 {
        self.likes.len() as u64 + self.anonymous_likes
    }

    fn like_response(&self, user: &UserId) -> LikeToggleResponse {
        LikeToggleResponse {
            like_count: self.like_count(),
            is_liked_by_current_user: self.likes.contains(user),
        }
    }

    fn nested(&self, parent: Option<CommentId>) -> Vec<CommentNode> {
        self.comments
            .iter()
            .filter(|c| c.parent_id == parent)
            .map(|c| CommentNode {
                children: self.nested(Some(c.id)),
                ..c.clone()
            })
            .collect()
    }
}

#[derive(Debug)]
enum Injected {
    Api(Error),
    Transport(TransportError),
}

#[derive(Default)]
struct State {
    users: BTreeMap<UserId, MockUser>,
    session: Option<Session>,
    posts: HashMap<PostId, MockPost>,
    refresh_failures: usize,
    refresh_calls: usize,
    log: Vec<ApiRequest>,
    injected: HashMap<String, VecDeque<Injected>>,
    holds: HashMap<String, VecDeque<oneshot::Receiver<()>>>,
    feeds: HashMap<String, Vec<mpsc::UnboundedSender<FeedEvent>>>,
}

impl State {
    fn user(&self, id: &UserId) -> User {
        User {
            id: *id,
            name: self.users.get(id).map(|u| u.name.clone()).unwrap_or_default(),
        }
    }

    fn authenticated(&self) -> Option<UserId> {
        match &self.session {
            Some(s) if !s.expired => Some(s.user),
            _ => None,
        }
    }

    fn broadcast(&mut self, channel: Channel, data: FeedData) {
        let event = FeedEvent {
            timestamp: Utc::now(),
            data,
        };
        self.relay(&channel, event);
    }

    fn relay(&mut self, channel: &Channel, event: FeedEvent) {
        if let Some(feeds) = self.feeds.get_mut(&channel.topic()) {
            feeds.retain(|f| f.unbounded_send(event.clone()).is_ok());
        }
    }

    fn add_comment(&mut self, post: PostId, author: UserId, c: NewComment) -> Result<CommentNode, Error> {
        c.validate()?;
        let p = self.posts.entry(post).or_default();
        if let Some(parent) = c.parent_comment_id {
            if !p.comments.iter().any(|known| known.id == parent) {
                return Err(Error::NotFound(format!("comment {}", parent.0)));
            }
        }
        let node = CommentNode {
            id: CommentId(Uuid::new_v4()),
            parent_id: c.parent_comment_id,
            author: self.user(&author),
            content: c.content,
            created_at: Utc::now(),
            children: Vec::new(),
        };
        self.posts.entry(post).or_default().comments.push(node.clone());
        self.broadcast(Channel::PostComments(post), FeedData::NewComment(node.clone()));
        Ok(node)
    }

    fn toggle_like(&mut self, post: PostId, user: UserId) -> LikeToggleResponse {
        let p = self.posts.entry(post).or_default();
        if !p.likes.remove(&user) {
            p.likes.insert(user);
        }
        let resp = p.like_response(&user);
        self.broadcast(
            Channel::PostLikes(post),
            FeedData::LikeCount {
                post,
                like_count: resp.like_count,
            },
        );
        resp
    }

    fn route(&mut self, req: &ApiRequest) -> Result<ApiResponse, Error> {
        let path = req.path.split('?').next().unwrap_or(&req.path);
        let segments = path.trim_start_matches('/').split('/').collect::<Vec<_>>();
        let unauthorized = ApiResponse::new(StatusCode::UNAUTHORIZED, Vec::new());
        let ok = |body: Vec<u8>| ApiResponse::new(StatusCode::OK, body);

        match (req.method.as_str(), segments.as_slice()) {
            ("POST", ["api", "auth", "login"]) => {
                let s: NewSession = parse_body(req)?;
                s.validate()?;
                let found = self
                    .users
                    .iter()
                    .find(|(_, u)| u.name == s.user && u.pass == s.password)
                    .map(|(id, _)| *id);
                let id = found.ok_or(Error::PermissionDenied)?;
                self.session = Some(Session {
                    user: id,
                    expired: false,
                });
                json(&self.user(&id))
            }
            ("POST", ["api", "auth", "logout"]) => {
                self.session = None;
                Ok(ok(Vec::new()))
            }
            ("POST", ["api", "auth", "refresh"]) => {
                self.refresh_calls += 1;
                if self.refresh_failures > 0 {
                    self.refresh_failures -= 1;
                    return Ok(unauthorized);
                }
                match &mut self.session {
                    Some(s) => {
                        s.expired = false;
                        Ok(ok(Vec::new()))
                    }
                    None => Ok(unauthorized),
                }
            }
            ("GET", ["api", "auth", "me"]) => match self.authenticated() {
                Some(id) => json(&self.user(&id)),
                None => Ok(unauthorized),
            },
            (method, ["api", "posts", post, resource]) => {
                let post = PostId(
                    Uuid::try_parse(post).map_err(|_| Error::NotFound(String::from(path)))?,
                );
                let user = match self.authenticated() {
                    Some(u) => u,
                    None => return Ok(unauthorized),
                };
                match (method, *resource) {
                    ("GET", "comments") => {
                        let listing = self.posts.entry(post).or_default().nested(None);
                        json(&listing)
                    }
                    ("POST", "comments") => {
                        let c: NewComment = parse_body(req)?;
                        let node = self.add_comment(post, user, c)?;
                        json(&node)
                    }
                    ("GET", "like") => {
                        let resp = self.posts.entry(post).or_default().like_response(&user);
                        json(&resp)
                    }
                    ("POST", "like") => {
                        let resp = self.toggle_like(post, user);
                        json(&resp)
                    }
                    _ => Err(Error::NotFound(String::from(path))),
                }
            }
            _ => Err(Error::NotFound(String::from(path))),
        }
    }
}

fn json<T: serde::Serialize>(value: &T) -> Result<ApiResponse, Error> {
    let body = serde_json::to_vec(value).map_err(|e| Error::Unknown(e.to_string()))?;
    Ok(ApiResponse::new(StatusCode::OK, body))
}

fn parse_body<T: serde::de::DeserializeOwned>(req: &ApiRequest) -> Result<T, Error> {
    let body = req
        .body
        .clone()
        .ok_or_else(|| Error::Validation(String::from("missing request body")))?;
    serde_json::from_value(body).map_err(|e| Error::Validation(e.to_string()))
}

fn route_key(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer(Mutex::new(State::default()))
    }

    pub fn create_user(&self, name: &str, pass: &str) -> User {
        let id = UserId(Uuid::new_v4());
        self.0.lock().users.insert(
            id,
            MockUser {
                name: String::from(name),
                pass: String::from(pass),
            },
        );
        User {
            id,
            name: String::from(name),
        }
    }

    /// Makes every authenticated route answer 401 until the next refresh
    pub fn expire_session(&self) {
        if let Some(s) = &mut self.0.lock().session {
            s.expired = true;
        }
    }

    pub fn is_session_valid(&self) -> bool {
        self.0.lock().authenticated().is_some()
    }

    /// Rejects the next refresh call, leaving the session expired
    pub fn fail_next_refresh(&self) {
        self.0.lock().refresh_failures += 1;
    }

    pub fn refresh_calls(&self) -> usize {
        self.0.lock().refresh_calls
    }

    /// Every request received so far, in arrival order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.0.lock().log.clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.0
            .lock()
            .log
            .iter()
            .filter(|r| route_key(&r.path) == path)
            .count()
    }

    /// The next request to `path` fails with `err` instead of being handled
    pub fn inject_failure(&self, path: &str, err: Error) {
        self.0
            .lock()
            .injected
            .entry(String::from(path))
            .or_default()
            .push_back(Injected::Api(err));
    }

    pub fn inject_transport_failure(&self, path: &str, err: TransportError) {
        self.0
            .lock()
            .injected
            .entry(String::from(path))
            .or_default()
            .push_back(Injected::Transport(err));
    }

    /// Holds the next request to `path` until the returned sender fires or is dropped
    pub fn hold_next(&self, path: &str) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        self.0
            .lock()
            .holds
            .entry(String::from(path))
            .or_default()
            .push_back(held);
        release
    }

    /// Sets how many users other than the ones created here like `post`
    pub fn seed_likes(&self, post: PostId, anonymous_likes: u64) {
        self.0.lock().posts.entry(post).or_default().anonymous_likes = anonymous_likes;
    }

    /// Another user toggles their like on `post`
    pub fn remote_toggle_like(&self, post: PostId, user: UserId) -> LikeToggleResponse {
        self.0.lock().toggle_like(post, user)
    }

    /// Another user comments on `post`
    pub fn remote_comment(
        &self,
        post: PostId,
        author: UserId,
        content: &str,
        parent: Option<CommentId>,
    ) -> Result<CommentNode, Error> {
        let c = NewComment {
            content: String::from(content),
            parent_comment_id: parent,
        };
        self.0.lock().add_comment(post, author, c)
    }

    pub fn notify(&self, user: UserId, message: &str) -> Notification {
        let n = Notification {
            id: Uuid::new_v4(),
            message: String::from(message),
            created_at: Utc::now(),
        };
        self.0
            .lock()
            .broadcast(Channel::Notifications(user), FeedData::Notification(n.clone()));
        n
    }

    /// Pushes `event` as-is, allowing to replay an event already delivered
    pub fn push(&self, channel: &Channel, event: FeedEvent) {
        self.0.lock().relay(channel, event);
    }

    /// Number of live feed connections on `channel`
    pub fn feed_subscribers(&self, channel: &Channel) -> usize {
        let mut state = self.0.lock();
        match state.feeds.get_mut(&channel.topic()) {
            None => 0,
            Some(feeds) => {
                feeds.retain(|f| !f.is_closed());
                feeds.len()
            }
        }
    }
}

#[async_trait]
impl Transport for MockServer {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> {
        // Let concurrent requests interleave like they would over the network
        tokio::task::yield_now().await;
        let held = {
            let mut state = self.0.lock();
            state.log.push(req.clone());
            state
                .holds
                .get_mut(route_key(&req.path))
                .and_then(|h| h.pop_front())
        };
        if let Some(held) = held {
            let _ = held.await;
        }

        let mut state = self.0.lock();
        let injected = state
            .injected
            .get_mut(route_key(&req.path))
            .and_then(|i| i.pop_front());
        let res = match injected {
            Some(Injected::Transport(e)) => return Err(e),
            Some(Injected::Api(e)) => Err(e),
            None => state.route(&req),
        };
        let resp = res.unwrap_or_else(|e| ApiResponse::new(e.status_code(), e.contents()));
        tracing::trace!(method = %req.method, path = %req.path, status = %resp.status, "mock server answered");
        Ok(resp)
    }
}

#[async_trait]
impl FeedSource for MockServer {
    async fn open(
        &self,
        channel: &Channel,
    ) -> Result<BoxStream<'static, FeedEvent>, TransportError> {
        let (sender, receiver) = mpsc::unbounded();
        self.0
            .lock()
            .feeds
            .entry(channel.topic())
            .or_default()
            .push(sender);
        Ok(receiver.boxed())
    }
}

#[cfg(test)]
mod tests {
    use gymlink_api::paths;

    use super::*;

    async fn logged_in() -> (MockServer, User) {
        let server = MockServer::new();
        let user = server.create_user("alice", "hunter2");
        let login = ApiRequest::post(paths::LOGIN)
            .with_json(&NewSession::new(String::from("alice"), String::from("hunter2")))
            .unwrap();
        let resp = server.send(login).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        (server, user)
    }

    #[tokio::test]
    async fn expired_session_answers_401_until_refreshed() {
        let (server, _) = logged_in().await;
        let post = PostId::stub();
        server.expire_session();
        let resp = server.send(ApiRequest::get(paths::like(&post))).await.unwrap();
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

        let resp = server.send(ApiRequest::post(paths::REFRESH)).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        let resp = server.send(ApiRequest::get(paths::like(&post))).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(server.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn replies_are_listed_nested() {
        let (server, user) = logged_in().await;
        let post = PostId::stub();
        let root = server.remote_comment(post, user.id, "root", None).unwrap();
        server
            .remote_comment(post, user.id, "reply", Some(root.id))
            .unwrap();
        let resp = server.send(ApiRequest::get(paths::comments(&post))).await.unwrap();
        let listing: Vec<CommentNode> = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].children.len(), 1);
        assert_eq!(listing[0].children[0].content, "reply");
    }

    #[tokio::test]
    async fn unknown_parent_is_not_found() {
        let (server, user) = logged_in().await;
        let res = server.remote_comment(PostId::stub(), user.id, "x", Some(CommentId(Uuid::new_v4())));
        assert!(matches!(res, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn like_toggles_and_broadcasts() {
        let (server, _) = logged_in().await;
        let post = PostId::stub();
        server.seed_likes(post, 5);
        let mut feed = server.open(&Channel::PostLikes(post)).await.unwrap();

        let resp = server.send(ApiRequest::post(paths::like(&post))).await.unwrap();
        let resp: LikeToggleResponse = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(
            resp,
            LikeToggleResponse {
                like_count: 6,
                is_liked_by_current_user: true
            }
        );
        let event = feed.next().await.unwrap();
        assert_eq!(
            event.data,
            FeedData::LikeCount {
                post,
                like_count: 6
            }
        );
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let (server, _) = logged_in().await;
        let path = paths::like(&PostId::stub());
        server.inject_failure(&path, Error::Conflict(String::from("busy")));
        let resp = server.send(ApiRequest::post(path.clone())).await.unwrap();
        assert_eq!(resp.status, StatusCode::CONFLICT);
        let resp = server.send(ApiRequest::post(path)).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn dropped_feeds_are_pruned() {
        let server = MockServer::new();
        let channel = Channel::PostComments(PostId::stub());
        let feed = server.open(&channel).await.unwrap();
        assert_eq!(server.feed_subscribers(&channel), 1);
        drop(feed);
        assert_eq!(server.feed_subscribers(&channel), 0);
    }

    #[tokio::test]
    async fn identity_is_answered_as_json() {
        let (server, user) = logged_in().await;
        let resp = server.send(ApiRequest::get(paths::WHOAMI)).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        let me: User = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(me, user);
    }
}
