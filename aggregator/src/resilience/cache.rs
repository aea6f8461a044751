// Read-through cache for user lookups, bounded in size and expiring entries
// after the configured TTL.
use crate::config::UserCacheConfig;
use crate::metrics_defs::{USER_CACHE_HIT, USER_CACHE_MISS};
use crate::model::{User, UserId};
use moka::sync::Cache;
use shared::counter;

pub struct UserCache {
    cache: Cache<UserId, User>,
}

impl UserCache {
    pub fn new(config: &UserCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl())
            .build();

        UserCache { cache }
    }

    pub fn get(&self, id: UserId) -> Option<User> {
        let cached = self.cache.get(&id);
        let metric_def = if cached.is_some() {
            USER_CACHE_HIT
        } else {
            USER_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        cached
    }

    pub fn insert(&self, user: User) {
        self.cache.insert(user.id, user);
    }
}
