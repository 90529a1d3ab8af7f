use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use log::{info, warn};

/// Tracks arrivals on one input channel of a tag
#[derive(Clone, Debug)]
pub struct ChannelHealth {
    pub name: String,
    pub last_update: Arc<Mutex<Instant>>,
    pub silence_threshold: Duration,
    pub updates: Arc<Mutex<u64>>,
}

impl ChannelHealth {
    pub fn new(name: &str, silence_threshold: Duration) -> Self {
        ChannelHealth {
            name: name.to_string(),
            last_update: Arc::new(Mutex::new(Instant::now())),
            silence_threshold,
            updates: Arc::new(Mutex::new(0)),
        }
    }

    pub fn update(&self) {
        if let Ok(mut time) = self.last_update.lock() {
            *time = Instant::now();
        }
        if let Ok(mut updates) = self.updates.lock() {
            *updates += 1;
        }
    }

    pub fn time_since_last_update(&self) -> Option<Duration> {
        self.last_update.lock().ok().map(|t| t.elapsed())
    }

    pub fn is_silent(&self) -> bool {
        self.time_since_last_update()
            .map(|d| d > self.silence_threshold)
            .unwrap_or(false)
    }

    pub fn update_count(&self) -> u64 {
        self.updates.lock().ok().map(|u| *u).unwrap_or(0)
    }

    fn status(&self) -> String {
        if !self.is_silent() {
            return "✓".to_string();
        }
        format!(
            "⚠ (silent {:.2}s)",
            self.time_since_last_update()
                .unwrap_or(Duration::from_secs(0))
                .as_secs_f64()
        )
    }
}

/// Position and inertial channel health of one tag
pub struct TagHealthMonitor {
    pub tag: String,
    pub position: ChannelHealth,
    pub inertial: ChannelHealth,
    check_interval: Duration,
}

impl TagHealthMonitor {
    /// Thresholds follow the filter horizons: the position channel is
    /// silent once acceleration-only tracking would give up, the inertial
    /// channel once a gap would stop integration.
    pub fn new(tag: &str, position_silence: Duration, inertial_silence: Duration) -> Self {
        TagHealthMonitor {
            tag: tag.to_string(),
            position: ChannelHealth::new("Position", position_silence),
            inertial: ChannelHealth::new("Inertial", inertial_silence),
            check_interval: Duration::from_millis(500),
        }
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn check_health(&self) -> HealthReport {
        HealthReport {
            position_healthy: !self.position.is_silent(),
            position_silence_duration: self.position.time_since_last_update(),
            inertial_healthy: !self.inertial.is_silent(),
            inertial_silence_duration: self.inertial.time_since_last_update(),
        }
    }

    /// Format health status for logging
    pub fn format_status(&self) -> String {
        format!(
            "Health [{}]: Position {} | Inertial {}",
            self.tag,
            self.position.status(),
            self.inertial.status()
        )
    }
}

pub struct HealthReport {
    pub position_healthy: bool,
    pub position_silence_duration: Option<Duration>,
    pub inertial_healthy: bool,
    pub inertial_silence_duration: Option<Duration>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.position_healthy && self.inertial_healthy
    }
}

/// Periodically check the tag channels until `shutdown` flips to `true`
/// (or its sender is dropped). Returns the number of checks with at least
/// one silent channel.
pub async fn health_monitor_task(
    monitor: Arc<TagHealthMonitor>,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = interval(monitor.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut unhealthy_checks = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let report = monitor.check_health();
        if report.all_healthy() {
            continue;
        }
        unhealthy_checks += 1;

        if let (false, Some(duration)) = (report.position_healthy, report.position_silence_duration) {
            warn!(
                "[HEALTH] {} position SILENT for {:.2}s",
                monitor.tag,
                duration.as_secs_f64()
            );
        }
        if let (false, Some(duration)) = (report.inertial_healthy, report.inertial_silence_duration) {
            warn!(
                "[HEALTH] {} inertial SILENT for {:.2}s",
                monitor.tag,
                duration.as_secs_f64()
            );
        }
    }

    info!("[HEALTH] {} monitor stopped", monitor.tag);
    unhealthy_checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_channel_silence_detection() {
        let health = ChannelHealth::new("test", Duration::from_millis(100));

        // Initially healthy (just created)
        assert!(!health.is_silent());

        thread::sleep(Duration::from_millis(150));
        assert!(health.is_silent());

        // Update should reset
        health.update();
        assert!(!health.is_silent());
        assert_eq!(health.update_count(), 1);
    }

    #[test]
    fn test_tag_monitor_status() {
        let monitor = TagHealthMonitor::new(
            "tag-1",
            Duration::from_millis(50),
            Duration::from_secs(10),
        );
        let report = monitor.check_health();
        assert!(report.all_healthy());
        assert!(monitor.format_status().contains("tag-1"));

        thread::sleep(Duration::from_millis(80));
        let report = monitor.check_health();
        assert!(!report.position_healthy);
        assert!(report.inertial_healthy);
        assert!(monitor.format_status().contains("silent"));
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let monitor = Arc::new(
            TagHealthMonitor::new("tag-1", Duration::from_millis(1), Duration::from_millis(1))
                .with_check_interval(Duration::from_millis(10)),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(health_monitor_task(monitor, rx));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        let unhealthy = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
        assert!(unhealthy > 0);
    }
}
