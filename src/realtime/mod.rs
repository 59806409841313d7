// Real-time matcher
// One polling task per running profile; new matches above the threshold
// become deduplicated alerts


pub mod notify;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{MatcherConfig, MatcherConfigUpdate};
use crate::matching::{MatchFilters, MatchingEngine};
use crate::models::{CompanyProfile, MatchAlert};
use crate::{BidMatchError, Result, with_timeout};

pub use notify::{AlertNotifier, LogNotifier};

/// What a single matching cycle did for one profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub profile_id: String,
    pub matches_found: usize,
    pub above_threshold: usize,
    pub new_alerts: usize,
    pub dropped_by_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherStats {
    pub running_profiles: usize,
    pub total_alerts: usize,
    pub unread_alerts: usize,
    /// Cycles attempted, failed ones included
    pub cycles_run: u64,
    pub cycles_failed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub config: MatcherConfig,
}

struct ProfileTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// State shared between the matcher and its profile tasks
struct MatcherShared {
    engine: Arc<MatchingEngine>,
    notifier: Arc<dyn AlertNotifier>,
    config: RwLock<MatcherConfig>,
    alerts: tokio::sync::Mutex<HashMap<String, Vec<MatchAlert>>>,
    /// Held for the whole of a cycle so one profile never has two in flight
    cycle_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cycles_run: AtomicU64,
    cycles_failed: AtomicU64,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
}

impl MatcherShared {
    fn config(&self) -> MatcherConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cycle_lock(&self, profile_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .cycle_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(profile_id.to_string()).or_default())
    }

    async fn run_cycle(&self, profile: &CompanyProfile) -> Result<CycleReport> {
        let lock = self.cycle_lock(&profile.id);
        let _running = lock.lock().await;
        let result = self.try_cycle(profile).await;

        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        *self
            .last_cycle_at
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

        match result {
            Ok(report) => {
                if report.new_alerts > 0 {
                    info!(
                        "Created {} new alerts for profile {}",
                        report.new_alerts, report.profile_id
                    );
                }
                Ok(report)
            }
            Err(e) => {
                self.cycles_failed.fetch_add(1, Ordering::Relaxed);
                error!("Matching cycle failed for profile {}: {}", profile.id, e);
                Err(e)
            }
        }
    }

    async fn try_cycle(&self, profile: &CompanyProfile) -> Result<CycleReport> {
        let config = self.config();
        let matching = self.engine.config();

        let outcome = with_timeout(
            matching.call_timeout(),
            "profile match",
            self.engine
                .match_profile(profile, matching.top_k, &MatchFilters::default()),
        )
        .await?;

        let qualifying: Vec<_> = outcome
            .results
            .iter()
            .filter(|r| r.score * 100.0 >= config.min_match_score)
            .collect();
        debug!(
            "Profile {}: {} of {} matches at or above {}",
            profile.id,
            qualifying.len(),
            outcome.results.len(),
            config.min_match_score
        );

        let mut report = CycleReport {
            profile_id: profile.id.clone(),
            matches_found: outcome.results.len(),
            above_threshold: qualifying.len(),
            ..CycleReport::default()
        };

        let survivors = {
            let mut alerts = self.alerts.lock().await;
            let profile_alerts = alerts.entry(profile.id.clone()).or_default();

            let mut seen: HashSet<String> = profile_alerts
                .iter()
                .map(|a| a.opportunity_id.clone())
                .collect();
            let mut created = Vec::new();
            for result in qualifying {
                if seen.insert(result.opportunity.id.clone()) {
                    let alert = MatchAlert::new(&profile.id, result);
                    created.push(alert.id.clone());
                    profile_alerts.push(alert);
                }
            }

            report.dropped_by_cap =
                enforce_alert_cap(profile_alerts, config.max_alerts_per_profile);

            profile_alerts
                .iter()
                .filter(|a| created.contains(&a.id))
                .cloned()
                .collect::<Vec<_>>()
        };
        report.new_alerts = survivors.len();

        if config.enable_notifications {
            for alert in survivors {
                let notifier = Arc::clone(&self.notifier);
                tokio::spawn(async move {
                    if let Err(e) = notifier.notify(&alert).await {
                        warn!("Failed to deliver alert {}: {}", alert.id, e);
                    }
                });
            }
        }

        Ok(report)
    }
}

/// Keep the `max` best alerts. Among equal scores the alert already held wins,
/// so a match dropped by the cap stays dropped on later cycles.
///
/// Returns how many were dropped.
fn enforce_alert_cap(alerts: &mut Vec<MatchAlert>, max: usize) -> usize {
    if alerts.len() <= max {
        return 0;
    }
    // Stable: alerts created in the same instant keep insertion order
    alerts.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    let dropped = alerts.len() - max;
    alerts.truncate(max);
    dropped
}

async fn profile_loop(
    shared: Arc<MatcherShared>,
    profile: CompanyProfile,
    cancel: CancellationToken,
) {
    info!("Matcher started for profile {}", profile.id);
    loop {
        if cancel.is_cancelled() {
            break;
        }
        // Failures are counted and logged inside; the next tick retries
        let _ = shared.run_cycle(&profile).await;

        let config = shared.config();
        if !config.auto_refresh {
            debug!("Auto refresh disabled; profile {} ran once", profile.id);
            break;
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(config.check_interval()) => {}
        }
    }
    info!("Matcher stopped for profile {}", profile.id);
}

/// Schedules matching cycles per profile and owns the alert store
pub struct RealTimeMatcher {
    shared: Arc<MatcherShared>,
    tasks: Mutex<HashMap<String, ProfileTask>>,
}

impl RealTimeMatcher {
    #[inline]
    pub fn new(
        engine: Arc<MatchingEngine>,
        notifier: Arc<dyn AlertNotifier>,
        config: MatcherConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(MatcherShared {
                engine,
                notifier,
                config: RwLock::new(config),
                alerts: tokio::sync::Mutex::new(HashMap::new()),
                cycle_locks: Mutex::new(HashMap::new()),
                cycles_run: AtomicU64::new(0),
                cycles_failed: AtomicU64::new(0),
                last_cycle_at: RwLock::new(None),
            }),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Begin polling for `profile`, replacing any task already running for it.
    ///
    /// The first cycle runs immediately, or once a cycle still in flight for
    /// the replaced task has finished.
    #[inline]
    pub fn start(&self, profile: CompanyProfile) -> Result<()> {
        if profile.id.trim().is_empty() {
            return Err(BidMatchError::InvalidArgument(
                "profile id is empty".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let profile_id = profile.id.clone();
        let handle = tokio::spawn(profile_loop(
            Arc::clone(&self.shared),
            profile,
            cancel.clone(),
        ));

        let previous = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(profile_id.clone(), ProfileTask { cancel, handle });
        if let Some(previous) = previous {
            debug!("Restarting matcher for profile {}", profile_id);
            previous.cancel.cancel();
        }
        Ok(())
    }

    /// Cancel every profile. In-flight cycles still complete.
    #[inline]
    pub fn stop(&self) {
        let tasks: Vec<ProfileTask> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, task)| task)
            .collect();
        for task in &tasks {
            task.cancel.cancel();
        }
        if !tasks.is_empty() {
            info!("Stopped matcher for {} profiles", tasks.len());
        }
    }

    /// Returns whether a task existed for the profile
    #[inline]
    pub fn stop_profile(&self, profile_id: &str) -> bool {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(profile_id);
        match task {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop everything and wait for the tasks to finish
    #[inline]
    pub async fn shutdown(&self) {
        let tasks: Vec<ProfileTask> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, task)| task)
            .collect();
        for task in &tasks {
            task.cancel.cancel();
        }
        for task in tasks {
            if let Err(e) = task.handle.await {
                warn!("Matcher task ended abnormally: {}", e);
            }
        }
        info!("Real-time matcher shut down");
    }

    /// Run one cycle now, outside the schedule. Waits for a scheduled cycle of
    /// the same profile that is already in flight.
    #[inline]
    pub async fn run_cycle(&self, profile: &CompanyProfile) -> Result<CycleReport> {
        self.shared.run_cycle(profile).await
    }

    /// Takes effect from the next cycle
    #[inline]
    pub fn update_config(&self, update: &MatcherConfigUpdate) -> Result<MatcherConfig> {
        let mut config = self
            .shared
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update.apply_to(&mut config)?;
        info!("Matcher configuration updated: {:?}", *config);
        Ok(config.clone())
    }

    #[inline]
    pub fn config(&self) -> MatcherConfig {
        self.shared.config()
    }

    #[inline]
    pub fn is_running(&self, profile_id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(profile_id)
            .is_some_and(|task| !task.handle.is_finished())
    }

    #[inline]
    pub async fn get_stats(&self) -> MatcherStats {
        let running_profiles = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|task| !task.handle.is_finished())
            .count();

        let (total_alerts, unread_alerts) = {
            let alerts = self.shared.alerts.lock().await;
            alerts.values().flatten().fold((0, 0), |(total, unread), alert| {
                (total + 1, unread + usize::from(!alert.read))
            })
        };

        MatcherStats {
            running_profiles,
            total_alerts,
            unread_alerts,
            cycles_run: self.shared.cycles_run.load(Ordering::Relaxed),
            cycles_failed: self.shared.cycles_failed.load(Ordering::Relaxed),
            last_cycle_at: *self
                .shared
                .last_cycle_at
                .read()
                .unwrap_or_else(PoisonError::into_inner),
            config: self.shared.config(),
        }
    }

    /// Alerts for a profile, newest first
    #[inline]
    pub async fn get_alerts(&self, profile_id: &str) -> Vec<MatchAlert> {
        let mut alerts = self
            .shared
            .alerts
            .lock()
            .await
            .get(profile_id)
            .cloned()
            .unwrap_or_default();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    #[inline]
    pub async fn mark_alert_as_read(&self, alert_id: &str, profile_id: &str) -> Result<()> {
        self.update_alert(alert_id, profile_id, |alert| alert.read = true)
            .await
    }

    /// Record the action taken on an alert; this also marks it read
    #[inline]
    pub async fn mark_alert_action_taken(
        &self,
        alert_id: &str,
        profile_id: &str,
        action: &str,
    ) -> Result<()> {
        self.update_alert(alert_id, profile_id, |alert| {
            alert.read = true;
            alert.action_taken = Some(action.to_string());
        })
        .await
    }

    /// Returns how many alerts were removed
    #[inline]
    pub async fn clear_alerts(&self, profile_id: &str) -> usize {
        let removed = self
            .shared
            .alerts
            .lock()
            .await
            .remove(profile_id)
            .map_or(0, |alerts| alerts.len());
        debug!("Cleared {} alerts for profile {}", removed, profile_id);
        removed
    }

    async fn update_alert(
        &self,
        alert_id: &str,
        profile_id: &str,
        apply: impl FnOnce(&mut MatchAlert),
    ) -> Result<()> {
        let mut alerts = self.shared.alerts.lock().await;
        let alert = alerts
            .get_mut(profile_id)
            .and_then(|alerts| alerts.iter_mut().find(|a| a.id == alert_id))
            .ok_or_else(|| {
                BidMatchError::NotFound(format!(
                    "alert '{}' for profile '{}'",
                    alert_id, profile_id
                ))
            })?;
        apply(alert);
        Ok(())
    }
}

impl Drop for RealTimeMatcher {
    #[inline]
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.values() {
            task.cancel.cancel();
        }
    }
}
