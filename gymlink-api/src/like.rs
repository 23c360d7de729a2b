/// Answer of both the like read and the like toggle endpoints
///
/// The toggle endpoint has no separate like/unlike verbs: calling it again
/// performs the inverse action for the current user.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeToggleResponse {
    pub like_count: u64,
    pub is_liked_by_current_user: bool,
}
