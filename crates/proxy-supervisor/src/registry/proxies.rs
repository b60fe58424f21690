//! Registry of proxy definitions on top of a [`Store`].

use super::{normalize_proxy_name, ProxyDefinition, ProxyDraft, Store, PROXY_COLLECTION};
use crate::error::SupervisorError;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable proxy definitions keyed by name.
///
/// Reads go straight to the store. Every write path runs under a single
/// writer lock so read-modify-write sequences from the control API and the
/// status poller cannot interleave.
pub struct ProxyRegistry {
    store: Store,
    writer: Mutex<()>,
}

impl ProxyRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    /// List definitions newest first. With a filter, only the exact name.
    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<ProxyDefinition>, SupervisorError> {
        let mut definitions: Vec<ProxyDefinition> = self.store.read_all(PROXY_COLLECTION).await?;

        if let Some(name) = filter {
            definitions.retain(|d| d.name == name);
        }
        definitions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });

        Ok(definitions)
    }

    /// Number of stored definitions.
    pub async fn count(&self) -> Result<usize, SupervisorError> {
        Ok(self.list(None).await?.len())
    }

    pub async fn get(&self, name: &str) -> Result<ProxyDefinition, SupervisorError> {
        self.store
            .read(PROXY_COLLECTION, name)
            .await?
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    /// Insert or replace a definition.
    pub async fn put(&self, definition: &ProxyDefinition) -> Result<(), SupervisorError> {
        let _guard = self.writer.lock().await;
        self.store
            .write(PROXY_COLLECTION, &definition.name, definition)
            .await
    }

    /// Create a new definition. Fails if the name is taken.
    pub async fn add(&self, draft: ProxyDraft) -> Result<ProxyDefinition, SupervisorError> {
        let name = normalize_proxy_name(&draft.name).map_err(SupervisorError::Validation)?;

        let _guard = self.writer.lock().await;

        if self
            .store
            .read::<ProxyDefinition>(PROXY_COLLECTION, &name)
            .await?
            .is_some()
        {
            warn!(proxy = %name, "Rejected duplicate proxy name");
            return Err(SupervisorError::Validation(format!(
                "Proxy name already exists: {}",
                name
            )));
        }

        let created_at = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let definition = ProxyDefinition::from_draft(ProxyDraft { name, ..draft }, created_at)?;

        self.store
            .write(PROXY_COLLECTION, &definition.name, &definition)
            .await?;

        info!(
            proxy = %definition.name,
            remote_name = %definition.remote_name,
            "Proxy added"
        );
        Ok(definition)
    }

    /// Read-modify-write one definition. Nothing is written if `f` fails.
    pub async fn update<F>(&self, name: &str, f: F) -> Result<ProxyDefinition, SupervisorError>
    where
        F: FnOnce(&mut ProxyDefinition) -> Result<(), SupervisorError>,
    {
        let _guard = self.writer.lock().await;

        let original = self.get(name).await?;
        let mut definition = original.clone();
        f(&mut definition)?;

        if definition != original {
            self.store
                .write(PROXY_COLLECTION, &definition.name, &definition)
                .await?;
            debug!(proxy = %name, "Proxy updated");
        }
        Ok(definition)
    }

    /// Remove a definition and return what was stored.
    pub async fn delete(&self, name: &str) -> Result<ProxyDefinition, SupervisorError> {
        let _guard = self.writer.lock().await;

        let definition = self.get(name).await?;
        if !self.store.delete(PROXY_COLLECTION, name).await? {
            return Err(SupervisorError::NotFound(name.to_string()));
        }

        info!(proxy = %name, "Proxy deleted");
        Ok(definition)
    }

    /// Apply `f` to every definition and persist the ones it changed.
    /// A failed write is logged and the remaining records still get updated.
    pub async fn update_all<F>(&self, mut f: F) -> Result<usize, SupervisorError>
    where
        F: FnMut(&mut ProxyDefinition),
    {
        let _guard = self.writer.lock().await;

        let definitions: Vec<ProxyDefinition> = self.store.read_all(PROXY_COLLECTION).await?;
        let mut changed = 0;

        for original in definitions {
            let mut definition = original.clone();
            f(&mut definition);
            if definition == original {
                continue;
            }
            match self
                .store
                .write(PROXY_COLLECTION, &definition.name, &definition)
                .await
            {
                Ok(()) => changed += 1,
                Err(e) => warn!(proxy = %definition.name, "Failed to persist proxy: {}", e),
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frpc_client::ProxyPhase;

    fn draft(name: &str, local_port: u16, remote_port: u16) -> ProxyDraft {
        ProxyDraft {
            name: name.into(),
            local_port,
            remote_port,
        }
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let registry = ProxyRegistry::new(Store::memory());

        let added = registry.add(draft(" web ", 8080, 9000)).await.unwrap();
        assert_eq!(added.name, "web");
        assert!(added.remote_name.starts_with("web_"));

        let fetched = registry.get("web").await.unwrap();
        assert_eq!(fetched, added);
    }

    #[tokio::test]
    async fn test_add_duplicate_rejected() {
        let registry = ProxyRegistry::new(Store::memory());

        let first = registry.add(draft("web", 8080, 9000)).await.unwrap();
        let result = registry.add(draft("web", 3000, 9100)).await;
        assert!(matches!(result, Err(SupervisorError::Validation(_))));

        let all = registry.list(None).await.unwrap();
        assert_eq!(all, vec![first]);
    }

    #[tokio::test]
    async fn test_add_invalid_port_writes_nothing() {
        let registry = ProxyRegistry::new(Store::memory());

        assert!(registry.add(draft("web", 0, 9000)).await.is_err());
        assert_eq!(registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_filter() {
        let registry = ProxyRegistry::new(Store::memory());

        let mut old = ProxyDefinition::from_draft(draft("old", 1000, 2000), 10).unwrap();
        old.desired_enabled = true;
        registry.put(&old).await.unwrap();
        registry
            .put(&ProxyDefinition::from_draft(draft("new", 1001, 2001), 30).unwrap())
            .await
            .unwrap();
        registry
            .put(&ProxyDefinition::from_draft(draft("mid", 1002, 2002), 20).unwrap())
            .await
            .unwrap();

        let names: Vec<String> = registry
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["new", "mid", "old"]);

        let filtered = registry.list(Some("old")).await.unwrap();
        assert_eq!(filtered, vec![old]);
        assert!(registry.list(Some("ol")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let registry = ProxyRegistry::new(Store::memory());
        assert!(matches!(
            registry.get("ghost").await,
            Err(SupervisorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_failure_leaves_record() {
        let registry = ProxyRegistry::new(Store::memory());
        let added = registry.add(draft("web", 8080, 9000)).await.unwrap();

        let result = registry.update("web", |d| d.set_ports(0, 1)).await;
        assert!(result.is_err());
        assert_eq!(registry.get("web").await.unwrap(), added);

        let updated = registry.update("web", |d| d.set_ports(3000, 9100)).await.unwrap();
        assert_eq!(updated.local_port, 3000);
        assert_eq!(registry.get("web").await.unwrap().remote_port, 9100);
    }

    #[tokio::test]
    async fn test_delete() {
        let registry = ProxyRegistry::new(Store::memory());
        registry.add(draft("web", 8080, 9000)).await.unwrap();

        let removed = registry.delete("web").await.unwrap();
        assert_eq!(removed.name, "web");
        assert!(matches!(
            registry.delete("web").await,
            Err(SupervisorError::NotFound(_))
        ));
        assert_eq!(registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_all_counts_changes() {
        let registry = ProxyRegistry::new(Store::memory());

        let mut running = ProxyDefinition::from_draft(draft("web", 8080, 9000), 1).unwrap();
        running.run_status = ProxyPhase::Running;
        running.remote_addr = "frp.example.com:9000".into();
        registry.put(&running).await.unwrap();
        registry
            .put(&ProxyDefinition::from_draft(draft("db", 5432, 9001), 2).unwrap())
            .await
            .unwrap();

        let changed = registry.update_all(|d| d.mark_closed()).await.unwrap();
        assert_eq!(changed, 1);

        let web = registry.get("web").await.unwrap();
        assert_eq!(web.run_status, ProxyPhase::Closed);
        assert_eq!(web.remote_addr, "none");
    }

    #[tokio::test]
    async fn test_file_backed_registry_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let added = {
            let registry = ProxyRegistry::new(Store::file(dir.path()));
            registry.add(draft("web", 8080, 9000)).await.unwrap()
        };

        let registry = ProxyRegistry::new(Store::file(dir.path()));
        assert_eq!(registry.get("web").await.unwrap(), added);
        assert!(dir.path().join("proxys").join("web.json").exists());
    }
}
