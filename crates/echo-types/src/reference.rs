use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{ObjectId, SpaceKey};

/// Protocol tag carried by references to statically defined types.
pub const PROTOCOL_PROTOBUF: &str = "protobuf";

/// Host assumed for `protobuf` references that do not carry one.
pub const LEGACY_TYPE_HOST: &str = "dxos.org";

/// Encoded pointer to another object (or, for type references, to a type).
///
/// References are never followed when written; the owning database resolves
/// them on read.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Target object id, or a typename for legacy type references.
    pub item_id: String,
    /// Encoding protocol, `None` for plain object references.
    pub protocol: Option<String>,
    /// Origin qualifier; for object references this is the space key of
    /// the space holding the target.
    pub host: Option<String>,
}

impl Reference {
    pub fn new(item_id: impl Into<String>, protocol: Option<String>, host: Option<String>) -> Self {
        Self {
            item_id: item_id.into(),
            protocol,
            host,
        }
    }

    /// Reference to an object in the same space as the referrer.
    pub fn local(id: &ObjectId) -> Self {
        Self::new(id.to_hex(), None, None)
    }

    /// Reference to an object held by another space.
    pub fn remote(id: &ObjectId, space: &SpaceKey) -> Self {
        Self::new(id.to_hex(), None, Some(space.to_hex()))
    }

    /// Type reference for a statically registered typename.
    pub fn from_legacy_typename(typename: impl Into<String>) -> Self {
        Self::new(
            typename,
            Some(PROTOCOL_PROTOBUF.to_string()),
            Some(LEGACY_TYPE_HOST.to_string()),
        )
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn is_protobuf(&self) -> bool {
        self.protocol.as_deref() == Some(PROTOCOL_PROTOBUF)
    }

    /// The target parsed as an object id, if it is one.
    pub fn object_id(&self) -> Option<ObjectId> {
        ObjectId::from_hex(&self.item_id).ok()
    }

    /// The host parsed as a space key, if it is one.
    pub fn space_key(&self) -> Option<SpaceKey> {
        self.host.as_deref().and_then(|h| SpaceKey::from_hex(h).ok())
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({self})")
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(protocol) = &self.protocol {
            write!(f, "{protocol}:")?;
        }
        if let Some(host) = &self.host {
            write!(f, "//{host}/")?;
        }
        write!(f, "{}", self.item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_typename_reference() {
        let reference = Reference::from_legacy_typename("example.test.Task");
        assert!(reference.is_protobuf());
        assert_eq!(reference.host.as_deref(), Some(LEGACY_TYPE_HOST));
        assert_eq!(reference.object_id(), None);
    }

    #[test]
    fn local_reference_parses_back() {
        let id = ObjectId::random();
        let reference = Reference::local(&id);
        assert_eq!(reference.object_id(), Some(id));
        assert!(reference.host.is_none());
    }

    #[test]
    fn remote_reference_carries_space() {
        let id = ObjectId::random();
        let space = SpaceKey::random();
        let reference = Reference::remote(&id, &space);
        assert_eq!(reference.space_key(), Some(space));
    }

    #[test]
    fn display_includes_protocol_and_host() {
        let reference = Reference::from_legacy_typename("a.B");
        assert_eq!(reference.to_string(), "protobuf://dxos.org/a.B");
    }
}
