//! Two fixed registry sources and a heartbeat poller.
//!
//! ```bash
//! ROLLCALL_IGNORED_SERVICES='db-*' cargo run -p rollcall-runtime --example static_registry
//! ```

use rollcall_runtime::prelude::*;
use std::time::Duration;

struct StaticRegistry(Vec<DiscoveredInstance>);

#[async_trait]
impl DiscoveryClient for StaticRegistry {
    async fn services(&self) -> Result<Vec<String>, SyncError> {
        let mut ids: Vec<String> = self.0.iter().map(|i| i.service_id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn instances(&self, service: &str) -> Result<Vec<DiscoveredInstance>, SyncError> {
        Ok(self
            .0
            .iter()
            .filter(|i| i.service_id == service)
            .cloned()
            .collect())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rollcall_runtime::run(|wiring| async move {
        let events = wiring.events();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            let mut generation = 0u64;
            loop {
                tick.tick().await;
                generation += 1;
                let value = Fingerprint::from(generation);
                if events.send(TriggerEvent::Heartbeat { value }).await.is_err() {
                    break;
                }
            }
        });

        Ok(wiring
            .source(
                "eu-west",
                Arc::new(StaticRegistry(vec![
                    DiscoveredInstance::new("billing", "10.1.0.4", 8080),
                    DiscoveredInstance::new("db-main", "10.1.0.9", 5432),
                ])),
            )
            .source(
                "us-east",
                Arc::new(StaticRegistry(vec![
                    DiscoveredInstance::new("billing", "10.2.0.4", 8080)
                        .with_metadata("management.port", "9090"),
                ])),
            ))
    })
    .await
}
