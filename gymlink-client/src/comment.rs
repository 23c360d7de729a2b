use std::sync::Arc;

use crate::api::{self, CommentId, Time, User};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Comment {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub author: User,
    pub content: String,
    pub created_at: Time,

    /// Replies, in arrival order
    pub children: Arc<Vec<Comment>>,
}

impl From<api::CommentNode> for Comment {
    fn from(n: api::CommentNode) -> Comment {
        let id = n.id;
        let children = n
            .children
            .into_iter()
            .filter(|c| {
                let belongs = c.parent_id == Some(id);
                if !belongs {
                    tracing::warn!(parent = ?id, child = ?c.id, "dropping reply nested under the wrong parent");
                }
                belongs
            })
            .map(Comment::from)
            .collect();
        Comment {
            id,
            parent_id: n.parent_id,
            author: n.author,
            content: n.content,
            created_at: n.created_at,
            children: Arc::new(children),
        }
    }
}

impl Comment {
    /// The node that replaces `self` when `incoming` carries the same id
    ///
    /// Push events carry a single node without its replies, so an incoming
    /// node without children keeps the replies already known locally.
    fn replaced_by(&self, incoming: Comment) -> Comment {
        if incoming.children.is_empty() && !self.children.is_empty() {
            Comment {
                children: self.children.clone(),
                ..incoming
            }
        } else {
            incoming
        }
    }
}

/// Replace-or-append `incoming` into `siblings`, `None` if nothing changed
fn upsert(siblings: &Arc<Vec<Comment>>, incoming: Comment) -> Option<Arc<Vec<Comment>>> {
    match siblings.iter().position(|c| c.id == incoming.id) {
        Some(i) => {
            let replacement = siblings[i].replaced_by(incoming);
            if replacement == siblings[i] {
                return None;
            }
            let mut res = (**siblings).clone();
            res[i] = replacement;
            Some(Arc::new(res))
        }
        None => {
            let mut res = Vec::with_capacity(siblings.len() + 1);
            res.extend(siblings.iter().cloned());
            res.push(incoming);
            Some(Arc::new(res))
        }
    }
}

/// Locally held comment tree of a post
///
/// The tree is never mutated in place: `merge` returns a new tree sharing the
/// untouched subtrees, or `self` (same allocation) when nothing changed, so
/// `ptr_eq` is a valid change check.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommentTree {
    roots: Arc<Vec<Comment>>,
}

impl CommentTree {
    pub fn new() -> CommentTree {
        CommentTree::default()
    }

    /// Builds the tree from a server listing, merging nodes in listing order
    pub fn from_nodes(nodes: Vec<api::CommentNode>) -> CommentTree {
        nodes
            .into_iter()
            .fold(CommentTree::new(), |tree, n| tree.merge(Comment::from(n)))
    }

    pub fn roots(&self) -> &[Comment] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn ptr_eq(&self, other: &CommentTree) -> bool {
        Arc::ptr_eq(&self.roots, &other.roots)
    }

    pub fn merge(&self, incoming: Comment) -> CommentTree {
        let parent_id = match incoming.parent_id {
            None => {
                return match upsert(&self.roots, incoming) {
                    None => self.clone(),
                    Some(roots) => CommentTree { roots },
                }
            }
            Some(p) => p,
        };
        let path = match self.path_to(&parent_id) {
            Some(path) => path,
            None => {
                tracing::debug!(
                    comment = ?incoming.id,
                    parent = ?parent_id,
                    "dropping reply to a comment that is not known yet"
                );
                return self.clone();
            }
        };

        // Collect the chain of nodes from the root down to the parent
        let mut chain = Vec::with_capacity(path.len());
        let mut siblings = &self.roots;
        for &i in &path {
            let node = &siblings[i];
            chain.push(node);
            siblings = &node.children;
        }

        let parent = chain[chain.len() - 1];
        let children = match upsert(&parent.children, incoming) {
            None => return self.clone(),
            Some(c) => c,
        };
        let mut rebuilt = Comment {
            children,
            ..parent.clone()
        };
        for depth in (0..chain.len() - 1).rev() {
            let ancestor = chain[depth];
            let mut children = (*ancestor.children).clone();
            children[path[depth + 1]] = rebuilt;
            rebuilt = Comment {
                children: Arc::new(children),
                ..ancestor.clone()
            };
        }
        let mut roots = (*self.roots).clone();
        roots[path[0]] = rebuilt;
        CommentTree {
            roots: Arc::new(roots),
        }
    }

    /// Index path from the top-level list down to comment `id`
    ///
    /// Iterative depth-first search: reply chains can be arbitrarily deep.
    fn path_to(&self, id: &CommentId) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut stack = self
            .roots
            .iter()
            .enumerate()
            .rev()
            .map(|(i, c)| (0, i, c))
            .collect::<Vec<_>>();
        while let Some((depth, idx, node)) = stack.pop() {
            path.truncate(depth);
            path.push(idx);
            if node.id == *id {
                return Some(path);
            }
            stack.extend(
                node.children
                    .iter()
                    .enumerate()
                    .rev()
                    .map(|(i, c)| (depth + 1, i, c)),
            );
        }
        None
    }

    pub fn find(&self, id: &CommentId) -> Option<&Comment> {
        self.walk().map(|(_, c)| c).find(|c| c.id == *id)
    }

    /// Total number of comments, replies included
    pub fn len(&self) -> usize {
        self.walk().count()
    }

    /// Depth-first, document-order traversal yielding each comment and its depth
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: self.roots.iter().rev().map(|c| (0, c)).collect(),
        }
    }
}

pub struct Walk<'a> {
    stack: Vec<(usize, &'a Comment)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a Comment);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, c) = self.stack.pop()?;
        self.stack
            .extend(c.children.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, c))
    }
}
