//! In-memory search, ordering, pagination and statistics over merged posts.
//!
//! Nothing here rejects input: unknown sort keys fall back to id and page
//! numbers and sizes are clamped into range.

use crate::model::MergedPost;
use indexmap::IndexMap;
use serde::Serialize;
use std::cmp::Ordering;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Author id used in stats for posts without an author.
pub const MISSING_AUTHOR: i64 = -1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Id,
    Title,
    CommentCount,
    Author,
}

impl SortKey {
    /// Case-insensitive. Anything unrecognized sorts by id.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("title") {
            SortKey::Title
        } else if value.eq_ignore_ascii_case("commentCount") {
            SortKey::CommentCount
        } else if value.eq_ignore_ascii_case("author") {
            SortKey::Author
        } else {
            SortKey::Id
        }
    }

    fn compare(&self, a: &MergedPost, b: &MergedPost) -> Ordering {
        match self {
            SortKey::Id => a.id.cmp(&b.id),
            SortKey::Title => text(&a.title).cmp(text(&b.title)),
            SortKey::CommentCount => a.comment_count.cmp(&b.comment_count),
            SortKey::Author => a
                .author_name()
                .unwrap_or_default()
                .cmp(b.author_name().unwrap_or_default()),
        }
    }
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or_default()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryParams {
    pub q: Option<String>,
    pub sort_by: SortKey,
    pub order: SortOrder,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub items: Vec<MergedPost>,
    /// Number of posts before slicing
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub posts_total: usize,
    /// Post count per author id, in order of first appearance
    pub posts_by_user: IndexMap<i64, usize>,
    pub max_comments_in_a_post: usize,
    pub avg_comments_per_post: f64,
}

/// Keeps posts whose title, body or author name contains `query`, ignoring
/// case. A missing or blank query keeps everything.
pub fn search(mut posts: Vec<MergedPost>, query: Option<&str>) -> Vec<MergedPost> {
    let Some(needle) = query.map(str::trim).filter(|q| !q.is_empty()) else {
        return posts;
    };
    let needle = needle.to_lowercase();
    let matches = |field: Option<&str>| field.is_some_and(|v| v.to_lowercase().contains(&needle));

    posts.retain(|p| {
        matches(p.title.as_deref()) || matches(p.body.as_deref()) || matches(p.author_name())
    });
    posts
}

/// Stable in both directions: equal posts keep their relative order.
pub fn sort(posts: &mut [MergedPost], key: SortKey, order: SortOrder) {
    match order {
        SortOrder::Asc => posts.sort_by(|a, b| key.compare(a, b)),
        SortOrder::Desc => posts.sort_by(|a, b| key.compare(b, a)),
    }
}

pub fn paginate(posts: Vec<MergedPost>, page: Option<i64>, size: Option<i64>) -> Page {
    let total = posts.len();
    let page = page.map_or(1, |p| clamp_to_usize(p, 1, usize::MAX));
    let size = match size {
        Some(s) => clamp_to_usize(s, 1, MAX_PAGE_SIZE),
        None => DEFAULT_PAGE_SIZE.min(total.max(1)),
    };

    let from = (page - 1).saturating_mul(size).min(total);
    let to = from.saturating_add(size).min(total);

    let items = posts.into_iter().skip(from).take(to - from).collect();
    Page {
        items,
        total,
        page,
        size,
    }
}

fn clamp_to_usize(value: i64, min: usize, max: usize) -> usize {
    usize::try_from(value).unwrap_or(0).clamp(min, max)
}

pub fn stats(posts: &[MergedPost]) -> Stats {
    let mut posts_by_user: IndexMap<i64, usize> = IndexMap::new();
    for post in posts {
        let author_id = post
            .author
            .as_ref()
            .map_or(MISSING_AUTHOR, |a| i64::from(a.id));
        *posts_by_user.entry(author_id).or_default() += 1;
    }

    let max_comments_in_a_post = posts.iter().map(|p| p.comment_count).max().unwrap_or(0);
    let avg_comments_per_post = if posts.is_empty() {
        0.0
    } else {
        posts.iter().map(|p| p.comment_count).sum::<usize>() as f64 / posts.len() as f64
    };

    Stats {
        posts_total: posts.len(),
        posts_by_user,
        max_comments_in_a_post,
        avg_comments_per_post,
    }
}

/// Search, then sort, then slice.
pub fn apply(posts: Vec<MergedPost>, params: &QueryParams) -> Page {
    let mut posts = search(posts, params.q.as_deref());
    sort(&mut posts, params.sort_by, params.order);
    paginate(posts, params.page, params.size)
}
