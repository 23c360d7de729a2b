use uuid::Uuid;

use crate::{Error, Time, User, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

impl PostId {
    pub fn stub() -> PostId {
        PostId(STUB_UUID)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

/// A comment as the server sends it, possibly with its replies nested inside
///
/// Missing `parentId` and `children` fields deserialize to a top-level node
/// without replies.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    pub id: CommentId,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
    pub author: User,
    pub content: String,
    pub created_at: Time,
    #[serde(default)]
    pub children: Vec<CommentNode>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<CommentId>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.content)?;
        if self.content.trim().is_empty() {
            return Err(Error::Validation(String::from(
                "comment content must not be empty",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_deserialize_as_top_level_leaf() {
        let node: CommentNode = serde_json::from_str(
            r#"{
                "id": "00000000-0000-0000-0000-00000000000a",
                "author": { "id": "00000000-0000-0000-0000-000000000001", "name": "sam" },
                "content": "first!",
                "createdAt": "2024-03-01T10:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(node.parent_id, None);
        assert!(node.children.is_empty());
    }

    #[test]
    fn top_level_comment_omits_parent() {
        let json = serde_json::to_value(NewComment {
            content: String::from("nice squat form"),
            parent_comment_id: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "content": "nice squat form" }));
    }

    #[test]
    fn blank_comment_is_invalid() {
        let c = NewComment {
            content: String::from("  "),
            parent_comment_id: None,
        };
        assert!(matches!(c.validate(), Err(Error::Validation(_))));
    }
}
