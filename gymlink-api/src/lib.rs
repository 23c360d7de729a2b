use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
pub use auth::NewSession;

mod comment;
pub use comment::{CommentId, CommentNode, NewComment, PostId};

mod error;
pub use error::Error;

mod feed;
pub use feed::{Channel, DedupKey, FeedData, FeedEvent, FeedMessage, FeedRequest, Notification};

mod like;
pub use like::LikeToggleResponse;

pub mod paths;

mod transport;
pub use transport::{ApiRequest, ApiResponse, FeedSource, Transport, TransportError};

mod user;
pub use user::{User, UserId};

// Strings that reach the server must not carry null bytes, as they could not be stored
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}
