mod client;
mod comment;
mod config;
mod cooldown;
mod error;
mod likes;
mod net;
mod refresh;
mod request;
mod scenarios;
mod session_bus;
mod store;
mod subscription;
mod toggle;
mod ws;

pub use client::GymClient;
pub use comment::{Comment, CommentTree, Walk};
pub use config::{ClientConfig, ConfigError};
pub use cooldown::Cooldown;
pub use error::{Error, RefreshFailure};
pub use likes::{LikeBook, LikeState};
pub use net::ReqwestTransport;
pub use refresh::RefreshCoordinator;
pub use request::AuthenticatedRequestClient;
pub use session_bus::{SessionEvent, SessionEventBus, SessionListener};
pub use store::Store;
pub use subscription::{DedupFilter, RealtimeSubscription, DEDUP_CAPACITY};
pub use toggle::{IgnoreReason, LikeToggler, ToggleOutcome};
pub use ws::WsFeedSource;

pub mod api {
    pub use gymlink_api::*;
}
