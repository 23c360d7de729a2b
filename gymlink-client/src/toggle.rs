use std::{collections::HashMap, time::Duration};

use parking_lot::Mutex;

use crate::{
    api::{PostId, Transport},
    AuthenticatedRequestClient, Cooldown, Error, LikeState, Store,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IgnoreReason {
    /// A toggle on the same post has not settled yet
    InFlight,

    /// The previous accepted toggle on the same post is too recent
    Debounced,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ToggleOutcome {
    Ignored(IgnoreReason),
    Settled(LikeState),
}

struct ToggleGate {
    cooldown: Cooldown,
    in_flight: bool,
}

impl ToggleGate {
    fn is_open(&self) -> bool {
        !self.in_flight && !self.cooldown.is_cooling()
    }
}

/// Optimistic like/unlike
///
/// The local state flips before the request is sent, is then reconciled to
/// exactly what the server answered, or restored to the pre-toggle snapshot if
/// the request failed.
pub struct LikeToggler<T> {
    client: AuthenticatedRequestClient<T>,
    store: Store,
    debounce: Duration,
    gates: Mutex<HashMap<PostId, ToggleGate>>,
}

impl<T: Transport> LikeToggler<T> {
    pub fn new(
        client: AuthenticatedRequestClient<T>,
        store: Store,
        debounce: Duration,
    ) -> LikeToggler<T> {
        LikeToggler {
            client,
            store,
            debounce,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_in_flight(&self, post: &PostId) -> bool {
        self.gates.lock().get(post).map(|g| g.in_flight).unwrap_or(false)
    }

    /// Number of posts whose toggle is in flight or debounced
    pub fn guarded_posts(&self) -> usize {
        self.gates.lock().values().filter(|g| !g.is_open()).count()
    }

    /// Checks both guards and, if the call is accepted, closes them
    fn admit(&self, post: PostId) -> Option<IgnoreReason> {
        let mut gates = self.gates.lock();
        // gates left cooling when their toggle settled are swept once the window is over
        gates.retain(|_, g| !g.is_open());
        let gate = gates.entry(post).or_insert_with(|| ToggleGate {
            cooldown: Cooldown::new(self.debounce),
            in_flight: false,
        });
        if gate.in_flight {
            return Some(IgnoreReason::InFlight);
        }
        if gate.cooldown.is_cooling() {
            return Some(IgnoreReason::Debounced);
        }
        gate.in_flight = true;
        gate.cooldown.arm();
        None
    }

    pub async fn toggle(&self, post: PostId) -> Result<ToggleOutcome, Error> {
        if let Some(reason) = self.admit(post) {
            tracing::trace!(?post, ?reason, "ignoring like toggle");
            return Ok(ToggleOutcome::Ignored(reason));
        }
        let _flight = InFlight { toggler: self, post };

        let snapshot = self.store.like(&post).unwrap_or_default();
        self.store.set_like(post, snapshot.flipped());
        match self.client.toggle_like(&post).await {
            Ok(resp) => {
                let settled = LikeState::from(resp);
                self.store.set_like(post, settled);
                Ok(ToggleOutcome::Settled(settled))
            }
            Err(err) => {
                tracing::warn!(?post, ?err, "like toggle failed, rolling back");
                self.store.set_like(post, snapshot);
                Err(err)
            }
        }
    }
}

/// Clears the in-flight flag however the toggle future ends, forgetting the
/// gate if it no longer guards anything
struct InFlight<'a, T> {
    toggler: &'a LikeToggler<T>,
    post: PostId,
}

impl<'a, T> Drop for InFlight<'a, T> {
    fn drop(&mut self) {
        let mut gates = self.toggler.gates.lock();
        let open = match gates.get_mut(&self.post) {
            Some(g) => {
                g.in_flight = false;
                g.is_open()
            }
            None => false,
        };
        if open {
            gates.remove(&self.post);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures::channel::oneshot;
    use http::StatusCode;

    use super::*;
    use crate::{
        api::{self, ApiRequest, ApiResponse, LikeToggleResponse, TransportError},
        SessionEventBus,
    };

    /// Like endpoint answering with whatever the test pushes in `answers`
    #[derive(Default)]
    struct ScriptedLikes {
        answers: Mutex<Vec<oneshot::Receiver<Result<ApiResponse, TransportError>>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedLikes {
        fn expect(&self) -> oneshot::Sender<Result<ApiResponse, TransportError>> {
            let (tx, rx) = oneshot::channel();
            self.answers.lock().push(rx);
            tx
        }
    }

    #[async_trait]
    impl Transport for ScriptedLikes {
        async fn send(&self, _req: ApiRequest) -> Result<ApiResponse, TransportError> {
            *self.calls.lock() += 1;
            let answer = self.answers.lock().remove(0);
            answer
                .await
                .unwrap_or(Err(TransportError::Network(String::from("script dropped"))))
        }
    }

    fn answer(
        like_count: u64,
        is_liked_by_current_user: bool,
    ) -> Result<ApiResponse, TransportError> {
        let body = LikeToggleResponse {
            like_count,
            is_liked_by_current_user,
        };
        Ok(ApiResponse::new(StatusCode::OK, serde_json::to_vec(&body).unwrap()))
    }

    fn liked(count: u64) -> Result<ApiResponse, TransportError> {
        answer(count, true)
    }

    fn setup(debounce: Duration) -> (Arc<ScriptedLikes>, Store, Arc<LikeToggler<ScriptedLikes>>) {
        let transport = Arc::new(ScriptedLikes::default());
        let client = AuthenticatedRequestClient::new(transport.clone(), SessionEventBus::new());
        let store = Store::new();
        store.set_like(
            PostId::stub(),
            LikeState {
                count: 5,
                liked_by_me: false,
            },
        );
        let toggler = Arc::new(LikeToggler::new(client, store.clone(), debounce));
        (transport, store, toggler)
    }

    #[tokio::test(start_paused = true)]
    async fn optimistic_flip_then_reconcile_to_server() {
        let (transport, store, toggler) = setup(Duration::from_millis(500));
        let post = PostId::stub();
        let answer = transport.expect();
        let call = tokio::spawn({
            let toggler = toggler.clone();
            async move { toggler.toggle(post).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(
            store.like(&post),
            Some(LikeState {
                count: 6,
                liked_by_me: true
            })
        );

        // somebody else liked concurrently
        answer.send(liked(7)).unwrap();
        let settled = LikeState {
            count: 7,
            liked_by_me: true,
        };
        assert_eq!(call.await.unwrap(), Ok(ToggleOutcome::Settled(settled)));
        assert_eq!(store.like(&post), Some(settled));
        assert!(!toggler.is_in_flight(&post));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_restores_the_snapshot() {
        let (transport, store, toggler) = setup(Duration::from_millis(500));
        let post = PostId::stub();
        let answer = transport.expect();
        answer
            .send(Ok(ApiResponse::new(
                StatusCode::CONFLICT,
                api::Error::Conflict(String::from("post was archived")).contents(),
            )))
            .unwrap();
        assert_eq!(
            toggler.toggle(post).await,
            Err(Error::Api(api::Error::Conflict(String::from(
                "post was archived"
            ))))
        );
        assert_eq!(
            store.like(&post),
            Some(LikeState {
                count: 5,
                liked_by_me: false
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_guard_ignores_overlapping_calls() {
        // no debounce, so only the in-flight guard is at play
        let (transport, _store, toggler) = setup(Duration::ZERO);
        let post = PostId::stub();
        let answer = transport.expect();
        let first = tokio::spawn({
            let toggler = toggler.clone();
            async move { toggler.toggle(post).await }
        });
        tokio::task::yield_now().await;
        assert!(toggler.is_in_flight(&post));
        assert_eq!(
            toggler.toggle(post).await,
            Ok(ToggleOutcome::Ignored(IgnoreReason::InFlight))
        );

        answer.send(liked(6)).unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(*transport.calls.lock(), 1);

        // settled: the next call goes through
        transport.expect().send(liked(6)).unwrap();
        assert!(matches!(
            toggler.toggle(post).await,
            Ok(ToggleOutcome::Settled(_))
        ));
        assert_eq!(*transport.calls.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_ignores_rapid_second_activation() {
        let (transport, store, toggler) = setup(Duration::from_millis(500));
        let post = PostId::stub();
        transport.expect().send(liked(6)).unwrap();
        toggler.toggle(post).await.unwrap();

        assert_eq!(
            toggler.toggle(post).await,
            Ok(ToggleOutcome::Ignored(IgnoreReason::Debounced))
        );
        assert_eq!(store.like(&post).map(|s| s.count), Some(6));

        tokio::time::sleep(Duration::from_millis(501)).await;
        transport
            .expect()
            .send(answer(5, false))
            .unwrap();
        assert_eq!(
            toggler.toggle(post).await,
            Ok(ToggleOutcome::Settled(LikeState {
                count: 5,
                liked_by_me: false
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn guards_are_per_post() {
        let (transport, _store, toggler) = setup(Duration::from_millis(500));
        transport.expect().send(liked(6)).unwrap();
        toggler.toggle(PostId::stub()).await.unwrap();
        let other = PostId(uuid::Uuid::new_v4());
        transport.expect().send(liked(1)).unwrap();
        assert_eq!(
            toggler.toggle(other).await,
            Ok(ToggleOutcome::Settled(LikeState {
                count: 1,
                liked_by_me: true
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn settled_gates_are_forgotten() {
        let (transport, _store, toggler) = setup(Duration::ZERO);
        transport.expect().send(liked(6)).unwrap();
        toggler.toggle(PostId::stub()).await.unwrap();
        assert_eq!(toggler.gates.lock().len(), 0);
        assert_eq!(toggler.guarded_posts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cooled_down_gates_are_swept() {
        let (transport, _store, toggler) = setup(Duration::from_millis(500));
        transport.expect().send(liked(6)).unwrap();
        toggler.toggle(PostId::stub()).await.unwrap();
        assert_eq!(toggler.gates.lock().len(), 1, "still debouncing");
        assert_eq!(toggler.guarded_posts(), 1);

        tokio::time::sleep(Duration::from_millis(501)).await;
        assert_eq!(toggler.guarded_posts(), 0);
        let other = PostId(uuid::Uuid::new_v4());
        transport.expect().send(liked(1)).unwrap();
        toggler.toggle(other).await.unwrap();
        assert_eq!(toggler.gates.lock().len(), 1, "only the fresh gate is left");
        assert!(toggler.gates.lock().contains_key(&other));
    }
}
