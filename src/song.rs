//! Songs and tag snapshots
//!
//! A [`DetachedSong`] is a self-contained description of one playable item:
//! URI, play range, and the tag snapshot it was enqueued with. It is
//! immutable once enqueued; the decoder may later produce an updated tag
//! snapshot which the player publishes back as the "tagged song".

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::SongTime;

/// The tag categories the core cares about.
///
/// Metadata extraction is external; these are only carried through chunks
/// and published back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Artist,
    Album,
    Title,
    Track,
    Name,
    Genre,
    Date,
    Comment,
}

/// One tag entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagItem {
    pub kind: TagKind,
    pub value: String,
}

/// A snapshot of a song's tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub items: Vec<TagItem>,
}

impl Tag {
    pub fn new() -> Self {
        Tag::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add(&mut self, kind: TagKind, value: impl Into<String>) {
        self.items.push(TagItem {
            kind,
            value: value.into(),
        });
    }

    pub fn get(&self, kind: TagKind) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.kind == kind)
            .map(|item| item.value.as_str())
    }

    /// Overlay `other` on top of this snapshot: entries in `other` replace
    /// same-kind entries here, everything else is kept.
    pub fn merge(&self, other: &Tag) -> Tag {
        let mut merged = other.clone();
        for item in &self.items {
            if other.get(item.kind).is_none() {
                merged.items.push(item.clone());
            }
        }
        merged
    }
}

/// A value describing one playable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachedSong {
    /// Stable identity across copies of the same enqueued item.
    pub id: Uuid,

    pub uri: String,

    /// Initial seek position, e.g. the start of a sub-track.
    pub start_time: SongTime,

    /// The decoder stops when it reaches this position; zero means play to
    /// the end of the file.
    pub end_time: SongTime,

    pub tag: Tag,
}

impl DetachedSong {
    pub fn new(uri: impl Into<String>) -> Self {
        DetachedSong {
            id: Uuid::new_v4(),
            uri: uri.into(),
            start_time: SongTime::ZERO,
            end_time: SongTime::ZERO,
            tag: Tag::new(),
        }
    }

    pub fn with_range(mut self, start: SongTime, end: SongTime) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    /// A copy of this song carrying an updated tag snapshot, keeping the
    /// identity so the external queue can match it up.
    pub fn retagged(&self, tag: &Tag) -> DetachedSong {
        DetachedSong {
            id: self.id,
            uri: self.uri.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            tag: self.tag.merge(tag),
        }
    }

    /// Whether the two values reference the same underlying stream.
    pub fn is_same_song(&self, other: &DetachedSong) -> bool {
        self.uri == other.uri
            && self.start_time == other.start_time
            && self.end_time == other.end_time
    }
}
