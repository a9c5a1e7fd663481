//! Includes-denormalization: rebuild a self-contained object graph for one
//! tweet from the flat primary payload plus its side-tables.

use std::collections::HashSet;

use crate::entities::{Media, Place, Poll, ReferenceKind, Tweet, User};
use crate::index::EntityIndex;

/// A denormalized view of one tweet: the tweet itself plus every relation
/// the side-table could resolve. Relations the side-table did not cover
/// are absent, never an error.
#[derive(Debug, Clone)]
pub struct Dictionary {
    pub tweet: Tweet,
    pub author: Option<User>,
    pub mentions: Vec<ResolvedMention>,
    pub media: Vec<Media>,
    pub polls: Vec<Poll>,
    pub place: Option<Place>,
    pub references: Vec<Reference>,
}

/// An @-mention with the mentioned user attached when the side-table had it.
#[derive(Debug, Clone)]
pub struct ResolvedMention {
    pub username: String,
    pub user: Option<User>,
}

/// A referenced tweet. `dictionary` is `None` when the referenced tweet is
/// not in the side-table, or when expanding it would revisit a tweet
/// already on the current resolution path — the unexpanded marker that
/// keeps reference chains from recursing forever.
#[derive(Debug, Clone)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: String,
    pub dictionary: Option<Box<Dictionary>>,
}

/// Resolve `tweet` against `index`.
///
/// Referenced tweets are expanded recursively with a visited-set carried
/// through the recursion, so resolution terminates in time proportional to
/// the number of distinct entities in the side-tables even when the source
/// returns self-referential or cyclic reference chains.
pub fn resolve(tweet: &Tweet, index: &EntityIndex<'_>) -> Dictionary {
    let mut visited = HashSet::new();
    resolve_visited(tweet, index, &mut visited)
}

fn resolve_visited(
    tweet: &Tweet,
    index: &EntityIndex<'_>,
    visited: &mut HashSet<String>,
) -> Dictionary {
    // Mark before expanding references so a self-reference is cut.
    visited.insert(tweet.id.clone());

    let author = tweet
        .author_id
        .as_deref()
        .and_then(|id| index.user(id))
        .cloned();

    let mentions = tweet
        .entities
        .iter()
        .flat_map(|e| e.mentions.iter())
        .map(|m| ResolvedMention {
            username: m.username.clone(),
            user: index.user_by_username(&m.username).cloned(),
        })
        .collect();

    let media = tweet
        .attachments
        .iter()
        .flat_map(|a| a.media_keys.iter())
        .filter_map(|key| index.media(key))
        .cloned()
        .collect();

    let polls = tweet
        .attachments
        .iter()
        .flat_map(|a| a.poll_ids.iter())
        .filter_map(|id| index.poll(id))
        .cloned()
        .collect();

    let place = tweet
        .geo
        .as_ref()
        .and_then(|g| g.place_id.as_deref())
        .and_then(|id| index.place(id))
        .cloned();

    let references = tweet
        .referenced_tweets
        .iter()
        .flatten()
        .map(|r| {
            let dictionary = if visited.contains(&r.id) {
                None
            } else {
                index
                    .tweet(&r.id)
                    .map(|t| Box::new(resolve_visited(t, index, visited)))
            };
            Reference {
                kind: r.kind,
                id: r.id.clone(),
                dictionary,
            }
        })
        .collect();

    Dictionary {
        tweet: tweet.clone(),
        author,
        mentions,
        media,
        polls,
        place,
        references,
    }
}
