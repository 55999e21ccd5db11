use std::cmp::Reverse;
use tracing::debug;

use crate::core::{InventoryObject, ObjectKind};
use crate::errors::ProvisionResult;
use crate::platform::ManagementApi;

/// Volume names ordered by free space, largest first. Equal capacities are
/// ordered by name so every volume appears exactly once.
pub fn rank_volumes(volumes: &[InventoryObject]) -> Vec<String> {
    let mut ranked: Vec<(u64, &str)> = volumes
        .iter()
        .filter(|v| v.kind == ObjectKind::Volume)
        .map(|v| (v.free_space_bytes.unwrap_or(0), v.name.as_str()))
        .collect();
    ranked.sort_by_key(|&(free, name)| (Reverse(free), name));
    ranked.into_iter().map(|(_, name)| name.to_string()).collect()
}

pub struct StorageRanker<'a> {
    api: &'a dyn ManagementApi,
}

impl<'a> StorageRanker<'a> {
    pub fn new(api: &'a dyn ManagementApi) -> Self {
        Self { api }
    }

    /// Snapshot of the host's volumes at call time.
    pub async fn rank(&self) -> ProvisionResult<Vec<String>> {
        let volumes = self.api.list_objects(ObjectKind::Volume).await?;
        let ranking = rank_volumes(&volumes);
        debug!(?ranking, "Ranked volumes by free space");
        Ok(ranking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;

    fn volume(name: &str, free: u64) -> InventoryObject {
        InventoryObject::volume(format!("id-{}", name), name, free)
    }

    #[test]
    fn equal_capacities_are_neither_lost_nor_duplicated() {
        let volumes = vec![
            volume("ds-c", 500),
            volume("ds-b", 200),
            volume("ds-a", 500),
            volume("ds-d", 100),
        ];
        assert_eq!(rank_volumes(&volumes), vec!["ds-a", "ds-c", "ds-b", "ds-d"]);
    }

    #[test]
    fn missing_capacity_ranks_last() {
        let mut unknown = volume("nfs", 0);
        unknown.free_space_bytes = None;
        let volumes = vec![unknown, volume("local", 10)];
        assert_eq!(rank_volumes(&volumes), vec!["local", "nfs"]);
    }

    #[test]
    fn ignores_non_volumes() {
        let volumes = vec![
            InventoryObject::new(ObjectKind::Network, "net-1", "VM Network"),
            volume("datastore1", 1),
        ];
        assert_eq!(rank_volumes(&volumes), vec!["datastore1"]);
    }

    #[tokio::test]
    async fn ranks_what_the_host_reports() {
        let platform = SimulatedPlatform::new()
            .with_volume("datastore1", 100 << 30)
            .with_volume("datastore2", 900 << 30)
            .with_volume("datastore3", 400 << 30);
        let ranking = StorageRanker::new(&platform).rank().await.unwrap();
        assert_eq!(ranking, vec!["datastore2", "datastore3", "datastore1"]);
    }

    #[tokio::test]
    async fn no_volumes_means_empty_ranking() {
        let platform = SimulatedPlatform::new();
        assert!(StorageRanker::new(&platform).rank().await.unwrap().is_empty());
    }
}
