use serde::{Deserialize, Serialize};

/// Key of an object in a foreign system (e.g. an import source).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Name of the foreign system, e.g. `github.com`.
    pub source: String,
    /// Id of the object within that system.
    pub id: String,
}

impl ForeignKey {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }
}

/// Metadata attached to every object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub keys: Vec<ForeignKey>,
}

impl ObjectMeta {
    pub fn with_keys(keys: Vec<ForeignKey>) -> Self {
        Self { keys }
    }

    /// Returns `true` if any of `keys` is present.
    pub fn has_any_key(&self, keys: &[ForeignKey]) -> bool {
        keys.iter().any(|key| self.keys.contains(key))
    }
}
