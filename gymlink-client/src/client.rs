use std::sync::Arc;

use crate::{
    api::{Channel, FeedSource, NewComment, NewSession, PostId, Transport, TransportError, User},
    AuthenticatedRequestClient, ClientConfig, Comment, CommentTree, Error, LikeState, LikeToggler,
    RealtimeSubscription, ReqwestTransport, SessionEvent, SessionEventBus, SessionListener, Store,
    ToggleOutcome, WsFeedSource,
};

/// Everything a front-end needs to talk to the gym server
///
/// Server answers and push events all land in the `Store`. The store is
/// wiped when the session is invalidated.
pub struct GymClient<T, F> {
    requests: AuthenticatedRequestClient<T>,
    feed: Arc<F>,
    store: Store,
    likes: LikeToggler<T>,
    bus: SessionEventBus,
    _on_invalidated: SessionListener,
}

impl GymClient<ReqwestTransport, WsFeedSource> {
    pub fn connect(config: ClientConfig) -> Result<Self, TransportError> {
        let transport = Arc::new(ReqwestTransport::new(config.clone())?);
        let feed = Arc::new(WsFeedSource::new(config.clone()));
        Ok(GymClient::new(transport, feed, &config))
    }
}

impl<T: Transport, F: FeedSource + 'static> GymClient<T, F> {
    pub fn new(transport: Arc<T>, feed: Arc<F>, config: &ClientConfig) -> GymClient<T, F> {
        let bus = SessionEventBus::new();
        let store = Store::new();
        let requests = AuthenticatedRequestClient::new(transport, bus.clone());
        let likes = LikeToggler::new(requests.clone(), store.clone(), config.like_debounce());
        let _on_invalidated = {
            let store = store.clone();
            bus.subscribe(move |event| match event {
                SessionEvent::Invalidated => store.clear(),
            })
        };
        GymClient {
            requests,
            feed,
            store,
            likes,
            bus,
            _on_invalidated,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn requests(&self) -> &AuthenticatedRequestClient<T> {
        &self.requests
    }

    pub fn session_events(&self) -> &SessionEventBus {
        &self.bus
    }

    pub async fn login(&self, session: &NewSession) -> Result<User, Error> {
        self.requests.login(session).await
    }

    pub async fn logout(&self) -> Result<(), Error> {
        self.requests.logout().await?;
        self.store.clear();
        Ok(())
    }

    pub async fn whoami(&self) -> Result<Option<User>, Error> {
        self.requests.whoami().await
    }

    /// Seeds the store with the current comments and like state of `post`
    pub async fn load_post(&self, post: PostId) -> Result<(CommentTree, LikeState), Error> {
        let (comments, like) = futures::try_join!(
            self.requests.fetch_comments(&post),
            self.requests.fetch_like(&post),
        )?;
        let tree = CommentTree::from_nodes(comments);
        let like = LikeState::from(like);
        self.store.replace_comments(post, tree.clone());
        self.store.set_like(post, like);
        tracing::debug!(?post, comments = tree.len(), likes = like.count, "loaded post");
        Ok((tree, like))
    }

    /// Posts a comment and merges the server's copy into the local tree
    ///
    /// The realtime echo of the same comment is then a no-op.
    pub async fn post_comment(&self, post: PostId, comment: NewComment) -> Result<Comment, Error> {
        let node = self.requests.create_comment(&post, &comment).await?;
        let comment = Comment::from(node);
        self.store.merge_comment(post, comment.clone());
        Ok(comment)
    }

    pub async fn toggle_like(&self, post: PostId) -> Result<ToggleOutcome, Error> {
        self.likes.toggle(post).await
    }

    /// Opens `channel` and folds its events into the store
    pub async fn watch(&self, channel: Channel) -> Result<RealtimeSubscription<F>, Error> {
        let mut sub = RealtimeSubscription::new(self.feed.clone());
        let store = self.store.clone();
        sub.subscribe(channel, move |event| {
            store.apply_feed_event(&channel, event);
        })
        .await?;
        Ok(sub)
    }
}
