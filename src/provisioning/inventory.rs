use tracing::debug;

use crate::core::{ObjectId, ObjectKind};
use crate::errors::{ProvisionError, ProvisionResult};
use crate::platform::ManagementApi;

/// Name lookups against the host inventory.
///
/// The host does not promise unique names; when several objects share one,
/// the first in enumeration order wins.
pub struct InventoryResolver<'a> {
    api: &'a dyn ManagementApi,
}

impl<'a> InventoryResolver<'a> {
    pub fn new(api: &'a dyn ManagementApi) -> Self {
        Self { api }
    }

    /// Exact, case-sensitive match. Absence is `Ok(None)`, not an error.
    pub async fn resolve(&self, kind: ObjectKind, name: &str) -> ProvisionResult<Option<ObjectId>> {
        let objects = self.api.list_objects(kind).await?;
        let found = objects
            .into_iter()
            .find(|o| o.kind == kind && o.name == name)
            .map(|o| o.id);
        debug!(%kind, name, found = found.is_some(), "Resolved inventory object");
        Ok(found)
    }

    /// Like `resolve`, but a missing object is a `Lookup` error.
    pub async fn require(&self, kind: ObjectKind, name: &str) -> ProvisionResult<ObjectId> {
        self.resolve(kind, name)
            .await?
            .ok_or_else(|| ProvisionError::Lookup {
                kind,
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;

    #[tokio::test]
    async fn finds_exact_names_only() {
        let platform = SimulatedPlatform::new()
            .with_machine("web1")
            .with_machine("web10")
            .with_network("VM Network");
        let resolver = InventoryResolver::new(&platform);

        assert!(resolver.resolve(ObjectKind::Machine, "web1").await.unwrap().is_some());
        assert!(resolver.resolve(ObjectKind::Machine, "web").await.unwrap().is_none());
        assert!(resolver.resolve(ObjectKind::Machine, "WEB1").await.unwrap().is_none());
        // names are scoped by kind
        assert!(resolver.resolve(ObjectKind::Machine, "VM Network").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_match_wins_on_duplicates() {
        let platform = SimulatedPlatform::new().with_network("dup").with_network("dup");
        let expected = platform.objects(ObjectKind::Network).await[0].id.clone();

        let found = InventoryResolver::new(&platform)
            .resolve(ObjectKind::Network, "dup")
            .await
            .unwrap();
        assert_eq!(found, Some(expected));
    }

    #[tokio::test]
    async fn require_turns_absence_into_lookup_error() {
        let platform = SimulatedPlatform::new();
        let err = InventoryResolver::new(&platform)
            .require(ObjectKind::Network, "Backend")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Lookup { kind: ObjectKind::Network, ref name } if name == "Backend"
        ));
    }
}
