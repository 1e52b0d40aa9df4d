//! Subscription filters

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Event;

/// A subscriber-supplied predicate over events.
///
/// Every present criterion must hold (AND across criteria, OR within a
/// list). An empty list counts as absent, so `{}` and `{"kinds":[]}` both
/// match every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFilter")]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Generic tag filters keyed `#<letter>`
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

/// Wire shape of a filter; unknown keys are tolerated and dropped
#[derive(Deserialize)]
struct RawFilter {
    ids: Option<Vec<String>>,
    authors: Option<Vec<String>>,
    kinds: Option<Vec<u16>>,
    since: Option<u64>,
    until: Option<u64>,
    limit: Option<usize>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<RawFilter> for Filter {
    fn from(raw: RawFilter) -> Self {
        let tags = raw
            .extra
            .into_iter()
            .filter(|(key, _)| is_tag_key(key))
            .filter_map(|(key, value)| match value {
                Value::Array(items) => Some((
                    key,
                    items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect(),
                )),
                _ => None,
            })
            .collect();

        Filter {
            ids: raw.ids,
            authors: raw.authors,
            kinds: raw.kinds,
            since: raw.since,
            until: raw.until,
            limit: raw.limit,
            tags,
        }
    }
}

fn is_tag_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars.next() == Some('#')
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.next().is_none()
}

fn present<T>(list: &Option<Vec<T>>) -> Option<&[T]> {
    list.as_deref().filter(|items| !items.is_empty())
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds<I: IntoIterator<Item = u16>>(mut self, kinds: I) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add a `#<letter>` tag criterion
    pub fn tag<I, S>(mut self, letter: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.insert(
            format!("#{}", letter),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Whether the event satisfies every present criterion
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = present(&self.ids) {
            if !ids.iter().any(|id| *id == event.id) {
                return false;
            }
        }

        if let Some(authors) = present(&self.authors) {
            if !authors.iter().any(|author| *author == event.pubkey) {
                return false;
            }
        }

        if let Some(kinds) = present(&self.kinds) {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(key, values)| {
            if values.is_empty() {
                return true;
            }
            let name = &key[1..];
            event
                .tag_values(name)
                .any(|value| values.iter().any(|wanted| wanted == value))
        })
    }
}
