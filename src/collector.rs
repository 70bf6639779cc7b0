use crate::device::{DeviceConfig, DeviceDriver};
use crate::metrics::{CommonLabels, GaugeFamily};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Scrape bookkeeping shared by all pollers: one series per device, keyed
/// by the common label set and registered once at the root.
#[derive(Clone, Default)]
pub struct PollerFamilies {
    successes: Family<CommonLabels, Counter>,
    failures: Family<CommonLabels, Counter>,
    last_scrape_duration: GaugeFamily,
}

impl PollerFamilies {
    pub fn register(registry: &mut Registry) -> Self {
        let families = Self::default();
        registry.register(
            "scrape_successes",
            "Polls that produced a full report",
            families.successes.clone(),
        );
        registry.register(
            "scrape_failures",
            "Polls that errored and reset the device's gauges",
            families.failures.clone(),
        );
        registry.register(
            "last_scrape_duration_seconds",
            "Wall-clock duration of the most recent poll",
            families.last_scrape_duration.clone(),
        );
        families
    }
}

/// One device's view of the shared scrape families.
pub struct PollerMetrics {
    labels: CommonLabels,
    families: PollerFamilies,
}

impl PollerMetrics {
    pub fn new(families: &PollerFamilies, config: &DeviceConfig) -> Self {
        let metrics = Self {
            labels: CommonLabels::from_config(config),
            families: families.clone(),
        };
        // The device's series exist from startup, before the first event.
        let _ = metrics.families.successes.get_or_create(&metrics.labels);
        let _ = metrics.families.failures.get_or_create(&metrics.labels);
        let _ = metrics
            .families
            .last_scrape_duration
            .get_or_create(&metrics.labels);
        metrics
    }

    fn record_success(&self) {
        self.families.successes.get_or_create(&self.labels).inc();
    }

    fn record_failure(&self) {
        self.families.failures.get_or_create(&self.labels).inc();
    }

    fn record_duration(&self, elapsed: Duration) {
        self.families
            .last_scrape_duration
            .get_or_create(&self.labels)
            .set(elapsed.as_secs_f64());
    }
}

/// Polls one device until shutdown. Each tick waits a further random delay
/// so the devices' polls stay de-correlated on the home LAN.
pub async fn run_poller(
    mut driver: DeviceDriver,
    metrics: PollerMetrics,
    interval: Duration,
    max_jitter: Duration,
    cancel: CancellationToken,
) {
    let (name, ip) = {
        let config = driver.config();
        (config.name.clone(), config.ip.clone())
    };
    tracing::info!(device = %name, ip = %ip, "starting device poller");

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let jitter = random_jitter(max_jitter);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(jitter) => {}
        }

        let started = Instant::now();
        match driver.poll_and_update_metrics().await {
            Ok(()) => {
                metrics.record_success();
            }
            Err(err) => {
                metrics.record_failure();
                driver.reset_metrics_to_rogue_values();
                tracing::warn!(device = %name, ip = %ip, error = %err, "device poll failed");
            }
        }
        metrics.record_duration(started.elapsed());
    }

    tracing::info!(device = %name, "device poller stopped");
}

fn random_jitter(max_jitter: Duration) -> Duration {
    let max_millis = max_jitter.as_millis() as u64;
    if max_millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_millis))
}
