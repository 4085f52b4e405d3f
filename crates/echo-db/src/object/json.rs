use std::collections::HashSet;

use echo_model::Cell;
use echo_types::ObjectId;
use serde_json::{json, Map, Value as JsonValue};

use crate::object::EchoObject;

impl EchoObject {
    /// Serialize to a map with the reserved `@id`, `@type`, `@model` and
    /// `@meta` keys plus the data fields. Linked objects appear as
    /// `{"@id": ..}`.
    pub fn to_json(&self) -> JsonValue {
        self.to_json_with(&|_| false)
    }

    /// Like [`to_json`](Self::to_json), but linked objects for which
    /// `expand` returns `true` are serialized inline. An object already
    /// being serialized is never expanded again.
    pub fn to_json_with(&self, expand: &dyn Fn(&EchoObject) -> bool) -> JsonValue {
        let mut visiting = HashSet::new();
        self.write_json(expand, &mut visiting)
    }

    fn write_json(
        &self,
        expand: &dyn Fn(&EchoObject) -> bool,
        visiting: &mut HashSet<ObjectId>,
    ) -> JsonValue {
        visiting.insert(self.id());

        let mut map = Map::new();
        map.insert("@id".into(), JsonValue::String(self.id().to_hex()));
        map.insert(
            "@type".into(),
            self.type_ref()
                .map(|r| JsonValue::String(r.to_string()))
                .unwrap_or(JsonValue::Null),
        );
        map.insert("@model".into(), JsonValue::String(self.model().to_string()));
        map.insert(
            "@meta".into(),
            serde_json::to_value(self.meta()).unwrap_or(JsonValue::Null),
        );
        if self.is_deleted() {
            map.insert("@deleted".into(), JsonValue::Bool(true));
        }

        if let Ok(Some(Cell::Record(data))) = self.read_cell(&[]) {
            for (key, cell) in &data {
                map.insert(key.clone(), self.cell_json(cell, expand, visiting));
            }
        }

        visiting.remove(&self.id());
        JsonValue::Object(map)
    }

    fn cell_json(
        &self,
        cell: &Cell,
        expand: &dyn Fn(&EchoObject) -> bool,
        visiting: &mut HashSet<ObjectId>,
    ) -> JsonValue {
        match cell {
            Cell::Scalar(scalar) => scalar.to_json(),
            Cell::Reference(reference) => match self.lookup_link(reference) {
                Some(target) if !visiting.contains(&target.id()) && expand(&target) => {
                    target.write_json(expand, visiting)
                }
                Some(target) => json!({ "@id": target.id().to_hex() }),
                None => json!({ "@id": reference.item_id }),
            },
            Cell::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|c| self.cell_json(c, expand, visiting))
                    .collect(),
            ),
            Cell::List(list) => JsonValue::Array(
                list.values()
                    .into_iter()
                    .map(|c| self.cell_json(c, expand, visiting))
                    .collect(),
            ),
            Cell::Record(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, c)| (k.clone(), self.cell_json(c, expand, visiting)))
                    .collect(),
            ),
        }
    }
}
