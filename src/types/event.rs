//! Event types and kind classification

use serde::{Deserialize, Serialize};

/// Kind 0: user metadata
pub const KIND_METADATA: u16 = 0;
/// Kind 3: contact list
pub const KIND_CONTACTS: u16 = 3;
/// Kind 5: deletion request
pub const KIND_DELETION: u16 = 5;

/// A signed, content-addressed event as it travels on the wire.
///
/// Field names are part of the interop contract and are never renamed.
/// Identity and equality are by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    pub sig: String,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Event {
    /// Storage class of this event's kind
    pub fn class(&self) -> KindClass {
        KindClass::of(self.kind)
    }

    /// Values of every tag whose name is `name`, in tag order
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// Ids referenced by `e` tags (deletion targets for kind 5)
    pub fn referenced_ids(&self) -> Vec<String> {
        self.tag_values("e").map(str::to_string).collect()
    }
}

/// How the store retains events of a given kind.
///
/// Ephemeral kinds (20000-29999) are not distinguished and are kept
/// like regular events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClass {
    /// Every accepted instance is retained separately
    Regular,
    /// Only the newest instance per `(kind, pubkey)` survives
    Replaceable,
    /// Retained like a regular event; referenced ids are deleted first
    Deletion,
}

impl KindClass {
    /// Classify a kind number
    pub fn of(kind: u16) -> Self {
        match kind {
            KIND_METADATA | KIND_CONTACTS | 10000..=19999 => KindClass::Replaceable,
            KIND_DELETION => KindClass::Deletion,
            _ => KindClass::Regular,
        }
    }

    pub fn is_replaceable(self) -> bool {
        self == KindClass::Replaceable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(KindClass::of(0), KindClass::Replaceable);
        assert_eq!(KindClass::of(3), KindClass::Replaceable);
        assert_eq!(KindClass::of(10000), KindClass::Replaceable);
        assert_eq!(KindClass::of(19999), KindClass::Replaceable);
        assert_eq!(KindClass::of(5), KindClass::Deletion);
        assert_eq!(KindClass::of(1), KindClass::Regular);
        assert_eq!(KindClass::of(9999), KindClass::Regular);
        assert_eq!(KindClass::of(20000), KindClass::Regular);
        assert_eq!(KindClass::of(25000), KindClass::Regular);
        assert_eq!(KindClass::of(30023), KindClass::Regular);
    }

    #[test]
    fn test_event_wire_format() {
        let json = r#"{"id":"aa","pubkey":"bb","created_at":10,"kind":1,"tags":[["e","cc"],["p","dd"]],"content":"hi","sig":"ee"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, 1);
        assert_eq!(event.referenced_ids(), vec!["cc".to_string()]);
        assert_eq!(event.tag_values("p").collect::<Vec<_>>(), vec!["dd"]);

        let back = serde_json::to_value(&event).unwrap();
        for field in ["id", "pubkey", "created_at", "kind", "tags", "content", "sig"] {
            assert!(back.get(field).is_some(), "missing field {}", field);
        }
    }

    #[test]
    fn test_equality_is_by_id() {
        let a = Event {
            id: "x".into(),
            pubkey: "p".into(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "one".into(),
            sig: "s".into(),
        };
        let mut b = a.clone();
        b.content = "two".into();
        assert_eq!(a, b);
    }
}
