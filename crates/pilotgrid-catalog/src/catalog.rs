//! The per-cycle catalog build and connector cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use pilotgrid_core::{QueueConnector, QueueDescriptor, QueueId, SiteTree};

use crate::error::{CatalogError, CatalogResult};
use crate::factory::ConnectorFactory;
use crate::merge::merge_queue;

/// One usable queue: its resolved descriptor plus a live connector.
#[derive(Clone)]
pub struct CatalogEntry {
    pub descriptor: Arc<QueueDescriptor>,
    pub connector: Arc<dyn QueueConnector>,
}

/// Result of one catalog build.
pub struct CatalogBuild {
    pub entries: Vec<CatalogEntry>,
    /// Queues excluded this cycle, with the reason.
    pub excluded: Vec<(QueueId, CatalogError)>,
}

struct CacheSlot {
    hash: String,
    connector: Arc<dyn QueueConnector>,
}

/// Turns the site tree into flat queue entries, reusing connectors while a
/// queue's parameter hash is unchanged.
pub struct Catalog {
    factory: ConnectorFactory,
    max_queue_length: u64,
    cache: HashMap<QueueId, CacheSlot>,
}

impl Catalog {
    pub fn new(factory: ConnectorFactory) -> Self {
        Self {
            factory,
            max_queue_length: 3 * 86_400,
            cache: HashMap::new(),
        }
    }

    /// Cap applied to CPU time derived from legacy queue parameters.
    pub fn with_max_queue_length(mut self, secs: u64) -> Self {
        self.max_queue_length = secs;
        self
    }

    /// Build the catalog for one cycle.
    ///
    /// Queues that fail to merge or to obtain a connector are excluded and
    /// reported; cached connectors for queues that left the configuration
    /// are dropped.
    pub fn build(&mut self, tree: &SiteTree) -> CatalogBuild {
        let mut entries = Vec::new();
        let mut excluded = Vec::new();
        let mut seen = HashSet::new();

        for (site, site_entry) in &tree.sites {
            for (ce_name, ce) in &site_entry.ces {
                for (queue_name, queue) in &ce.queues {
                    let id = QueueId::new(site, ce_name, queue_name);
                    seen.insert(id.clone());

                    let descriptor =
                        match merge_queue(id.clone(), ce, queue, self.max_queue_length) {
                            Ok(d) => d,
                            Err(e) => {
                                warn!(queue = %id, error = %e, "queue excluded: bad definition");
                                excluded.push((id, e));
                                continue;
                            }
                        };

                    match self.connector_for(&descriptor) {
                        Ok(connector) => entries.push(CatalogEntry {
                            descriptor: Arc::new(descriptor),
                            connector,
                        }),
                        Err(e) => {
                            warn!(queue = %id, error = %e, "queue excluded: no connector");
                            excluded.push((id, e));
                        }
                    }
                }
            }
        }

        let before = self.cache.len();
        self.cache.retain(|id, _| seen.contains(id));
        let dropped = before - self.cache.len();
        if dropped > 0 {
            debug!(dropped, "dropped connectors for queues no longer configured");
        }

        info!(
            usable = entries.len(),
            excluded = excluded.len(),
            "catalog built"
        );
        CatalogBuild { entries, excluded }
    }

    fn connector_for(
        &mut self,
        descriptor: &QueueDescriptor,
    ) -> CatalogResult<Arc<dyn QueueConnector>> {
        if let Some(slot) = self.cache.get(&descriptor.id)
            && slot.hash == descriptor.param_hash
        {
            debug!(queue = %descriptor.id, "connector reused");
            return Ok(slot.connector.clone());
        }

        let connector = self.factory.build(descriptor)?;
        self.cache.insert(
            descriptor.id.clone(),
            CacheSlot {
                hash: descriptor.param_hash.clone(),
                connector: connector.clone(),
            },
        );
        debug!(queue = %descriptor.id, ce_type = %descriptor.ce_type, "connector created");
        Ok(connector)
    }

    /// Number of cached connectors (exposed for tests).
    pub fn cached_connectors(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ConnectorBuilder;
    use pilotgrid_core::SiteTree;
    use pilotgrid_testkit::FakeConnector;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_builder(counter: Arc<AtomicU32>) -> ConnectorBuilder {
        Box::new(move |_descriptor| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(Arc::new(FakeConnector::new()) as Arc<dyn QueueConnector>)
        })
    }

    fn tree(toml: &str) -> SiteTree {
        SiteTree::from_toml(toml).unwrap()
    }

    const BASIC_TREE: &str = r#"
[sites.SITE_A.ces."ce01.site-a.org"]
ce_type = "arc"

[sites.SITE_A.ces."ce01.site-a.org".queues.long]
cpu_time = 86400
"#;

    #[test]
    fn build_produces_entries() {
        let built = Arc::new(AtomicU32::new(0));
        let factory = ConnectorFactory::new().register("arc", counting_builder(built.clone()));
        let mut catalog = Catalog::new(factory);

        let build = catalog.build(&tree(BASIC_TREE));
        assert_eq!(build.entries.len(), 1);
        assert!(build.excluded.is_empty());
        assert_eq!(built.load(Ordering::Relaxed), 1);

        let descriptor = &build.entries[0].descriptor;
        assert_eq!(descriptor.id.key(), "SITE_A/ce01.site-a.org/long");
        assert_eq!(descriptor.cpu_time, 86_400);
    }

    #[test]
    fn unchanged_hash_reuses_connector() {
        let built = Arc::new(AtomicU32::new(0));
        let factory = ConnectorFactory::new().register("arc", counting_builder(built.clone()));
        let mut catalog = Catalog::new(factory);

        catalog.build(&tree(BASIC_TREE));
        catalog.build(&tree(BASIC_TREE));
        assert_eq!(built.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn changed_parameters_rebuild_connector() {
        let built = Arc::new(AtomicU32::new(0));
        let factory = ConnectorFactory::new().register("arc", counting_builder(built.clone()));
        let mut catalog = Catalog::new(factory);

        catalog.build(&tree(BASIC_TREE));
        let changed = BASIC_TREE.replace("cpu_time = 86400", "cpu_time = 172800");
        catalog.build(&tree(&changed));
        assert_eq!(built.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn vanished_queue_is_evicted() {
        let built = Arc::new(AtomicU32::new(0));
        let factory = ConnectorFactory::new().register("arc", counting_builder(built.clone()));
        let mut catalog = Catalog::new(factory);

        catalog.build(&tree(BASIC_TREE));
        assert_eq!(catalog.cached_connectors(), 1);

        catalog.build(&tree(""));
        assert_eq!(catalog.cached_connectors(), 0);

        // Reappearing queue gets a fresh connector.
        catalog.build(&tree(BASIC_TREE));
        assert_eq!(built.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unknown_ce_type_excludes_queue_only() {
        let built = Arc::new(AtomicU32::new(0));
        let factory = ConnectorFactory::new().register("arc", counting_builder(built.clone()));
        let mut catalog = Catalog::new(factory);

        let mixed = format!(
            "{BASIC_TREE}\n{}",
            r#"
[sites.SITE_B.ces."ce02.site-b.org"]
ce_type = "mystery"

[sites.SITE_B.ces."ce02.site-b.org".queues.short]
cpu_time = 3600
"#
        );
        let build = catalog.build(&tree(&mixed));
        assert_eq!(build.entries.len(), 1);
        assert_eq!(build.excluded.len(), 1);
        assert!(matches!(
            build.excluded[0].1,
            CatalogError::UnknownCeType(_)
        ));
    }

    #[test]
    fn failing_builder_excludes_queue_only() {
        let factory = ConnectorFactory::new().register(
            "arc",
            Box::new(|_| anyhow::bail!("endpoint unreachable")),
        );
        let mut catalog = Catalog::new(factory);

        let build = catalog.build(&tree(BASIC_TREE));
        assert!(build.entries.is_empty());
        assert_eq!(build.excluded.len(), 1);
        assert!(matches!(build.excluded[0].1, CatalogError::Connector { .. }));
    }
}
