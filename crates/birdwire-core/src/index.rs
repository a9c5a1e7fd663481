//! Lookup indexes over an [`Includes`] side-table.
//!
//! The maps are built on first use and memoized for the lifetime of the
//! index. The index is a separate object constructed per envelope, so the
//! envelope itself stays immutable data with no hidden caches.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::entities::{Media, Place, Poll, Tweet, User};
use crate::envelope::Includes;

/// Memoized id-keyed (and, for users, username-keyed) lookups over one
/// side-table. Cheap to construct; each map is built on the first lookup
/// that needs it.
pub struct EntityIndex<'a> {
    includes: &'a Includes,
    tweets_by_id: OnceLock<HashMap<&'a str, &'a Tweet>>,
    users_by_id: OnceLock<HashMap<&'a str, &'a User>>,
    users_by_username: OnceLock<HashMap<&'a str, &'a User>>,
    media_by_key: OnceLock<HashMap<&'a str, &'a Media>>,
    polls_by_id: OnceLock<HashMap<&'a str, &'a Poll>>,
    places_by_id: OnceLock<HashMap<&'a str, &'a Place>>,
}

impl<'a> EntityIndex<'a> {
    pub fn new(includes: &'a Includes) -> Self {
        Self {
            includes,
            tweets_by_id: OnceLock::new(),
            users_by_id: OnceLock::new(),
            users_by_username: OnceLock::new(),
            media_by_key: OnceLock::new(),
            polls_by_id: OnceLock::new(),
            places_by_id: OnceLock::new(),
        }
    }

    /// Look up an included tweet by id.
    pub fn tweet(&self, id: &str) -> Option<&'a Tweet> {
        self.tweets_by_id
            .get_or_init(|| self.includes.tweets.iter().map(|t| (t.id.as_str(), t)).collect())
            .get(id)
            .copied()
    }

    /// Look up an included user by id.
    pub fn user(&self, id: &str) -> Option<&'a User> {
        self.users_by_id
            .get_or_init(|| self.includes.users.iter().map(|u| (u.id.as_str(), u)).collect())
            .get(id)
            .copied()
    }

    /// Look up an included user by exact username. Mentions carry the
    /// username, not the id.
    pub fn user_by_username(&self, username: &str) -> Option<&'a User> {
        self.users_by_username
            .get_or_init(|| {
                self.includes
                    .users
                    .iter()
                    .map(|u| (u.username.as_str(), u))
                    .collect()
            })
            .get(username)
            .copied()
    }

    /// Look up an included media object by media key.
    pub fn media(&self, media_key: &str) -> Option<&'a Media> {
        self.media_by_key
            .get_or_init(|| {
                self.includes
                    .media
                    .iter()
                    .map(|m| (m.media_key.as_str(), m))
                    .collect()
            })
            .get(media_key)
            .copied()
    }

    /// Look up an included poll by id.
    pub fn poll(&self, id: &str) -> Option<&'a Poll> {
        self.polls_by_id
            .get_or_init(|| self.includes.polls.iter().map(|p| (p.id.as_str(), p)).collect())
            .get(id)
            .copied()
    }

    /// Look up an included place by id.
    pub fn place(&self, id: &str) -> Option<&'a Place> {
        self.places_by_id
            .get_or_init(|| self.includes.places.iter().map(|p| (p.id.as_str(), p)).collect())
            .get(id)
            .copied()
    }
}
