use std::sync::Arc;

use echo_model::Backend;

use crate::object::EchoObject;

/// Batch held open for the lifetime of the scope.
///
/// Bound objects batch in their backend; only the scope that opened the
/// backend batch commits it. Detached objects count nesting depth locally
/// and notify their listeners when the outermost scope closes.
pub(crate) struct BatchScope {
    kind: ScopeKind,
}

enum ScopeKind {
    Backend {
        backend: Arc<dyn Backend>,
        opened: bool,
    },
    Local(EchoObject),
}

impl BatchScope {
    pub(crate) fn open(object: &EchoObject) -> Self {
        match object.backend() {
            Some(backend) => Self::backend(backend),
            None => {
                object.begin_local_batch();
                Self {
                    kind: ScopeKind::Local(object.clone()),
                }
            }
        }
    }

    pub(crate) fn backend(backend: Arc<dyn Backend>) -> Self {
        let opened = backend.begin_batch();
        Self {
            kind: ScopeKind::Backend { backend, opened },
        }
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        match &self.kind {
            ScopeKind::Backend { backend, opened } => {
                if *opened {
                    backend.commit_batch();
                }
            }
            ScopeKind::Local(object) => object.end_local_batch(),
        }
    }
}
