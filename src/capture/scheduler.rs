use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::capture::CaptureOrchestrator;
use crate::config::Config;

/// Page events that schedule an extra capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The active page finished loading
    Navigated,
    /// Another tab or window got focus
    Focused,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleOptions {
    pub interval: Duration,
    pub navigation_settle: Duration,
    pub focus_settle: Duration,
}

impl ScheduleOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.capture_interval(),
            navigation_settle: Duration::from_millis(config.navigation_settle_ms),
            focus_settle: Duration::from_millis(config.focus_settle_ms),
        }
    }

    fn settle(&self, trigger: Trigger) -> Duration {
        match trigger {
            Trigger::Navigated => self.navigation_settle,
            Trigger::Focused => self.focus_settle,
        }
    }
}

/// Captures on a fixed interval, and once more after page events have
/// settled. A trigger arriving while another is settling restarts the delay,
/// so a burst of events yields a single capture. Runs until the trigger
/// channel closes.
pub async fn run_scheduler(
    orchestrator: Arc<CaptureOrchestrator>,
    mut triggers: mpsc::UnboundedReceiver<Trigger>,
    options: ScheduleOptions,
) {
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    let settle = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(settle);
    let mut settling: Option<Trigger> = None;

    log::info!("auto-capture started (every {}s)", options.interval.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                orchestrator.run_tick(false).await;
            }
            () = &mut settle, if settling.is_some() => {
                if let Some(trigger) = settling.take() {
                    log::trace!("{trigger:?} settled, capturing");
                }
                orchestrator.run_tick(false).await;
            }
            trigger = triggers.recv() => {
                let Some(trigger) = trigger else {
                    break;
                };
                settle
                    .as_mut()
                    .reset(Instant::now() + options.settle(trigger));
                settling = Some(trigger);
            }
        }
    }

    log::debug!("capture scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_per_trigger() {
        let options = ScheduleOptions::from_config(&Config::default());
        assert_eq!(options.settle(Trigger::Navigated), Duration::from_secs(2));
        assert_eq!(options.settle(Trigger::Focused), Duration::from_secs(1));
        assert_eq!(options.interval, Duration::from_secs(15));
    }
}
