// resourcery demo
// Runs a wizard-managed pool of simulated connections under concurrent load

use resourcery::{BoxError, PoolConfiguration, Resource, Wizard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct DemoConnection {
    id: usize,
    healthy: Arc<AtomicBool>,
}

impl Resource for DemoConnection {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn terminate(self) {
        tracing::info!(id = self.id, "connection closed");
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let next_id = AtomicUsize::new(1);
    let factory = move || -> Result<DemoConnection, BoxError> {
        Ok(DemoConnection {
            id: next_id.fetch_add(1, Ordering::Relaxed),
            healthy: Arc::new(AtomicBool::new(true)),
        })
    };

    let config = PoolConfiguration::new()
        .with_name("demo")
        .with_timeout(Duration::from_secs(2));
    let wizard = Arc::new(Wizard::with_configuration(factory, 3, config).await?);

    let mut workers = Vec::new();
    for worker in 0..10 {
        let wizard = Arc::clone(&wizard);
        workers.push(tokio::spawn(async move {
            let pool = wizard.pool();
            let conn = pool.get_resource_default().await?;
            tracing::info!(worker, conn = conn.id, "borrowed");
            tokio::time::sleep(Duration::from_millis(20)).await;

            let health = Arc::clone(&conn.healthy);
            pool.add_resource(conn)?;

            // Drop one connection while it sits in the queue; the next
            // borrower discards it and the wizard builds a replacement
            if worker == 4 {
                health.store(false, Ordering::Relaxed);
            }
            Ok::<_, resourcery::PoolError>(())
        }));
    }
    for worker in workers {
        worker.await??;
    }

    let metrics = wizard.pool().get_metrics();
    println!("Available: {}", wizard.pool().size());
    println!("Retrieved: {}", metrics.total_retrieved);
    println!("Discarded: {}", metrics.unhealthy_terminated);
    println!("Replaced:  {}", metrics.replacements_created);
    println!("Healthy:   {}", wizard.health_status().is_healthy());

    wizard.pool().shutdown();
    Ok(())
}
