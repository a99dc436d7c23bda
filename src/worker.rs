//! Delivery worker.
//!
//! Background loop that consumes published events, polls the store for due
//! retries, and drives everything through the coordinator's attempt path on
//! a bounded task pool. First attempts and retries share the same pool and
//! the same path. Handles stale-claim release, queue-depth sampling, and
//! graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::Semaphore;
use tokio::time::interval;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::services::coordinator::DeliveryCoordinator;
use crate::services::event_publisher::WebhookEvent;
use crate::services::health::HealthMonitor;
use crate::store::DeliveryStore;

/// Background worker processing deliveries for the engine.
pub struct DeliveryWorker {
    coordinator: Arc<DeliveryCoordinator>,
    deliveries: Arc<dyn DeliveryStore>,
    health: Arc<HealthMonitor>,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl DeliveryWorker {
    #[must_use]
    pub fn new(
        coordinator: Arc<DeliveryCoordinator>,
        deliveries: Arc<dyn DeliveryStore>,
        health: Arc<HealthMonitor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            coordinator,
            deliveries,
            health,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the worker until shutdown is requested.
    ///
    /// `events` is the receiving end of the publisher's broadcast channel.
    pub async fn run(&self, mut events: broadcast::Receiver<WebhookEvent>) {
        tracing::info!(
            target: "delivery_worker",
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting delivery worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut stale_interval =
            interval(Duration::from_secs(self.config.stale_release_interval_secs));
        let mut depth_interval =
            interval(Duration::from_secs(self.config.depth_sample_interval_secs));

        let mut events_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => {
                    match event {
                        Ok(event) => self.handle_event(event, &semaphore).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::error!(
                                target: "delivery_worker",
                                missed,
                                "Event channel lagged; events were lost before fan-out"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!(
                                target: "delivery_worker",
                                "Event channel closed; continuing with retries only"
                            );
                            events_open = false;
                        }
                    }
                }
                _ = poll_interval.tick() => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        tracing::info!(
                            target: "delivery_worker",
                            "Worker shutdown requested, stopping poll loop"
                        );
                        break;
                    }
                    self.poll_and_dispatch(&semaphore).await;
                }
                _ = stale_interval.tick() => {
                    self.release_stale_claims().await;
                }
                _ = depth_interval.tick() => {
                    if let Err(e) = self.health.sample_queue_depth().await {
                        tracing::error!(
                            target: "delivery_worker",
                            error = %e,
                            "Failed to sample queue depth"
                        );
                    }
                }
            }
        }

        // Wait for in-flight attempts to complete.
        tracing::info!(target: "delivery_worker", "Waiting for in-flight deliveries to complete");
        let _ = semaphore.acquire_many(self.config.concurrency as u32).await;
        tracing::info!(target: "delivery_worker", "Worker stopped");
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!(target: "delivery_worker", "Shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Fan an event out and dispatch the created deliveries to the pool.
    async fn handle_event(&self, event: WebhookEvent, semaphore: &Arc<Semaphore>) {
        let deliveries = self.coordinator.fan_out(&event).await;
        for delivery in deliveries {
            self.dispatch(delivery.id, semaphore).await;
        }
    }

    /// Claim due deliveries (new and retrying) and dispatch them.
    async fn poll_and_dispatch(&self, semaphore: &Arc<Semaphore>) {
        let claimed = match self
            .deliveries
            .claim_due(
                Utc::now(),
                Duration::from_secs(self.config.claim_lease_secs),
                self.config.batch_size,
            )
            .await
        {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::error!(
                    target: "delivery_worker",
                    error = %e,
                    "Failed to claim due deliveries"
                );
                return;
            }
        };

        if claimed.is_empty() {
            return;
        }

        tracing::debug!(
            target: "delivery_worker",
            count = claimed.len(),
            "Claimed due deliveries for processing"
        );

        for delivery in claimed {
            self.dispatch(delivery.id, semaphore).await;
        }
    }

    /// Run one delivery attempt on the pool.
    ///
    /// Waits for a permit rather than dropping work: a saturated pool slows
    /// intake instead of losing deliveries.
    async fn dispatch(&self, delivery_id: Uuid, semaphore: &Arc<Semaphore>) {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            // Semaphore closed during shutdown.
            return;
        };
        let coordinator = self.coordinator.clone();

        tokio::spawn(async move {
            let _permit = permit; // Hold permit until the attempt completes
            if let Err(e) = coordinator.process_delivery(delivery_id).await {
                tracing::error!(
                    target: "delivery_worker",
                    delivery_id = %delivery_id,
                    error = %e,
                    "Delivery attempt failed internally"
                );
            }
        });
    }

    /// Release claims stuck past their lease (crashed or wedged workers).
    async fn release_stale_claims(&self) {
        match self.deliveries.release_stale_claims(Utc::now()).await {
            Ok(count) if count > 0 => {
                tracing::warn!(
                    target: "delivery_worker",
                    count,
                    "Released stale delivery claims"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    target: "delivery_worker",
                    error = %e,
                    "Failed to release stale claims"
                );
            }
        }
    }
}
