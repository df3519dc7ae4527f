//! Element and Board data model.
//!
//! An [`Element`] is a passthrough record: the engine reads `id`, `version`,
//! `isDeleted` and `locked`, and carries every other field untouched so the
//! drawing layer can evolve its schema without the sync engine noticing.
//!
//! ```text
//! Board
//!   └── elements: Vec<Element>   (paint order, back to front)
//!         ├── id        ElementId ("7" == 7)
//!         ├── version   per-element counter, bumped on every edit
//!         ├── isDeleted tombstone
//!         ├── locked    being edited on some client
//!         └── …         opaque fields
//! ```

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of an element within a board.
///
/// Producers send ids either as JSON strings or as integers. Two ids are the
/// same element when their textual values match, so `7` and `"7"` compare
/// equal and hash identically. The original representation is kept so the
/// id serializes back the way it arrived.
#[derive(Clone, Debug)]
pub struct ElementId {
    key: String,
    numeric: bool,
}

impl ElementId {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            numeric: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Whether the id arrived as a JSON integer.
    pub fn is_numeric(&self) -> bool {
        self.numeric
    }
}

impl PartialEq for ElementId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ElementId {}

impl Hash for ElementId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<&str> for ElementId {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ElementId {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<i64> for ElementId {
    fn from(n: i64) -> Self {
        Self {
            key: n.to_string(),
            numeric: true,
        }
    }
}

impl Serialize for ElementId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.numeric {
            if let Ok(n) = self.key.parse::<i64>() {
                return serializer.serialize_i64(n);
            }
        }
        serializer.serialize_str(&self.key)
    }
}

struct ElementIdVisitor;

impl<'de> Visitor<'de> for ElementIdVisitor {
    type Value = ElementId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or integer element id")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ElementId, E> {
        Ok(ElementId::new(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<ElementId, E> {
        Ok(ElementId::new(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ElementId, E> {
        Ok(ElementId::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ElementId, E> {
        Ok(ElementId {
            key: v.to_string(),
            numeric: true,
        })
    }
}

impl<'de> Deserialize<'de> for ElementId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ElementIdVisitor)
    }
}

/// A single drawable element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    /// Per-element edit counter. Higher wins on the server.
    pub version: u64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub locked: bool,
    /// Domain fields the engine never interprets.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Element {
    pub fn new(id: impl Into<ElementId>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
            is_deleted: false,
            locked: false,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Tombstone for this element, one version past the current one.
    /// Saturates at `u64::MAX`.
    pub fn tombstone(&self) -> Self {
        Self {
            version: self.version.saturating_add(1),
            is_deleted: true,
            ..self.clone()
        }
    }

    /// Record an edit: bump the version counter.
    pub fn touch(&mut self) {
        self.version = self.version.saturating_add(1);
    }
}

/// The full ordered state of one document.
///
/// `elements` order is paint order and is application state in its own
/// right; it is never derived from ids or map iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Board {
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Board {
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, id: &ElementId) -> Option<&Element> {
        self.elements.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.get(id).is_some()
    }

    /// Ids of live elements in paint order.
    pub fn ids(&self) -> Vec<ElementId> {
        self.elements
            .iter()
            .filter(|e| !e.is_deleted)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Ids of elements currently flagged as being edited somewhere.
    pub fn locked_ids(&self) -> HashSet<ElementId> {
        self.elements
            .iter()
            .filter(|e| e.locked && !e.is_deleted)
            .map(|e| e.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_element_id_string_and_number_compare_equal() {
        let a: ElementId = serde_json::from_value(json!("42")).unwrap();
        let b: ElementId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_numeric());
        assert!(b.is_numeric());

        let mut map = HashMap::new();
        map.insert(a, "first");
        assert_eq!(map.get(&b), Some(&"first"));
    }

    #[test]
    fn test_element_id_keeps_wire_form() {
        let numeric: ElementId = serde_json::from_value(json!(7)).unwrap();
        let text: ElementId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(serde_json::to_value(&numeric).unwrap(), json!(7));
        assert_eq!(serde_json::to_value(&text).unwrap(), json!("abc"));
    }

    #[test]
    fn test_element_id_rejects_objects() {
        assert!(serde_json::from_value::<ElementId>(json!({"id": 1})).is_err());
    }

    #[test]
    fn test_element_passthrough_fields() {
        let raw = json!({
            "id": "rect-1",
            "version": 3,
            "isDeleted": false,
            "locked": true,
            "type": "rectangle",
            "x": 10.5,
            "strokeColor": "#000000"
        });
        let el: Element = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(el.id, ElementId::from("rect-1"));
        assert_eq!(el.version, 3);
        assert!(el.locked);
        assert_eq!(el.fields.get("type"), Some(&json!("rectangle")));

        // Unknown fields survive a round trip through the engine untouched.
        assert_eq!(serde_json::to_value(&el).unwrap(), raw);
    }

    #[test]
    fn test_element_flags_default_false() {
        let el: Element = serde_json::from_value(json!({"id": 1, "version": 1})).unwrap();
        assert!(!el.is_deleted);
        assert!(!el.locked);
    }

    #[test]
    fn test_tombstone_bumps_version() {
        let el = Element::new("a", 4).with_field("type", "ellipse");
        let dead = el.tombstone();
        assert!(dead.is_deleted);
        assert_eq!(dead.version, 5);
        assert_eq!(dead.fields, el.fields);
    }

    #[test]
    fn test_version_bump_saturates() {
        let raw = json!({"id": "a", "version": u64::MAX});
        let mut el: Element = serde_json::from_value(raw).unwrap();
        assert_eq!(el.tombstone().version, u64::MAX);
        el.touch();
        assert_eq!(el.version, u64::MAX);
    }

    #[test]
    fn test_board_ids_skip_tombstones() {
        let board = Board::new(vec![
            Element::new("a", 1),
            Element::new("b", 1).tombstone(),
            Element::new("c", 1).with_locked(true),
        ]);
        assert_eq!(board.ids(), vec![ElementId::from("a"), ElementId::from("c")]);
        assert_eq!(board.locked_ids().len(), 1);
        assert!(board.contains(&"b".into()));
        assert!(board.get(&"z".into()).is_none());
    }
}
