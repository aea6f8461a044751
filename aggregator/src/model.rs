//! Upstream resources and the merged view built from them.
//!
//! Unknown fields in upstream payloads are ignored and every descriptive
//! field is optional, so partial records still deserialize.

use serde::{Deserialize, Serialize};

pub type PostId = u32;
pub type UserId = u32;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub user_id: UserId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub company: Option<Company>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Address {
    pub street: Option<String>,
    pub suite: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub geo: Option<Geo>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Geo {
    pub lat: Option<String>,
    pub lng: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub name: Option<String>,
    pub catch_phrase: Option<String>,
    pub bs: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u32,
    pub post_id: PostId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// A post joined with its author and comments.
///
/// `comment_count` always equals `comments.len()`; both are only set through
/// [`MergedPost::new`].
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MergedPost {
    pub id: PostId,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author: Option<User>,
    pub comment_count: usize,
    pub comments: Vec<Comment>,
}

impl MergedPost {
    pub fn new(post: Post, author: Option<User>, comments: Vec<Comment>) -> Self {
        MergedPost {
            id: post.id,
            title: post.title,
            body: post.body,
            author,
            comment_count: comments.len(),
            comments,
        }
    }

    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().and_then(|a| a.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_ignores_unknown_fields() {
        let user: User = serde_json::from_value(json!({
            "id": 1,
            "name": "Leanne Graham",
            "address": {"city": "Gwenborough", "geo": {"lat": "-37.3159", "lng": "81.1496"}},
            "company": {"name": "Romaguera-Crona", "catchPhrase": "Multi-layered"},
            "favouriteColour": "green"
        }))
        .unwrap();

        assert_eq!(user.name.as_deref(), Some("Leanne Graham"));
        let address = user.address.unwrap();
        assert_eq!(address.geo.unwrap().lng.as_deref(), Some("81.1496"));
        assert_eq!(
            user.company.unwrap().catch_phrase.as_deref(),
            Some("Multi-layered")
        );
        assert_eq!(user.email, None);
    }

    #[test]
    fn test_merged_post_counts_comments() {
        let post = Post {
            id: 7,
            user_id: 1,
            title: Some("t".into()),
            body: Some("b".into()),
        };
        let comments = vec![
            Comment {
                id: 1,
                post_id: 7,
                name: None,
                email: Some("c@x.com".into()),
                body: Some("c".into()),
            };
            3
        ];

        let merged = MergedPost::new(post, None, comments);
        assert_eq!(merged.comment_count, 3);
        assert_eq!(merged.comments.len(), 3);
        assert_eq!(merged.author_name(), None);
    }

    #[test]
    fn test_merged_post_serializes_camel_case() {
        let post = Post {
            id: 1,
            user_id: 1,
            title: Some("t".into()),
            body: None,
        };
        let value = serde_json::to_value(MergedPost::new(post, None, vec![])).unwrap();
        assert_eq!(value["commentCount"], 0);
        assert_eq!(value["comments"], json!([]));
        assert!(value["author"].is_null());
    }
}
