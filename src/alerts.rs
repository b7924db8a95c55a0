// Threshold rule evaluation with a per-(rule, target) state machine:
// OK -> PENDING (for_seconds pending) -> FIRING -> OK, with COOLDOWN
// suppressing re-fires inside cooldown_seconds of the last firing.

use crate::models::{AlertRule, AlertState, Container};
use crate::notifier::Notifier;
use crate::repo::Repository;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const NOTIFY_ATTEMPTS: u32 = 3;
const NOTIFY_BACKOFF: Duration = Duration::from_millis(300);
/// A running container not listed for this long counts as unavailable.
const UNAVAILABLE_AFTER_SECS: i64 = 60;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct AlertEngine {
    repo: Arc<Repository>,
    notify: Arc<dyn Notifier>,
    now: Clock,
    last_host: HashMap<String, f64>,
    last_restarts: HashMap<String, i64>,
    last_service_container: HashMap<String, String>,
    debug_restarts: bool,
}

impl AlertEngine {
    pub fn new(repo: Arc<Repository>, notify: Arc<dyn Notifier>, debug_restarts: bool) -> Self {
        Self::with_clock(repo, notify, debug_restarts, Utc::now)
    }

    /// Construct with an injected clock (tests pin evaluation time).
    pub fn with_clock(
        repo: Arc<Repository>,
        notify: Arc<dyn Notifier>,
        debug_restarts: bool,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        Self {
            repo,
            notify,
            now: Box::new(clock),
            last_host: HashMap::new(),
            last_restarts: HashMap::new(),
            last_service_container: HashMap::new(),
            debug_restarts,
        }
    }

    /// One evaluation pass over every enabled rule and its targets.
    pub async fn evaluate(&mut self) {
        let rules = match self.repo.list_rules().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "load rules");
                return;
            }
        };
        if let Ok(Some(latest)) = self.repo.latest_host_metric().await {
            self.last_host
                .insert("host_cpu_pct".to_string(), latest.cpu_pct);
            if latest.mem_total_bytes > 0 {
                self.last_host.insert(
                    "host_mem_pct".to_string(),
                    latest.mem_used_bytes as f64 / latest.mem_total_bytes as f64 * 100.0,
                );
            }
            if latest.disk_total_bytes > 0 {
                self.last_host.insert(
                    "host_disk_pct".to_string(),
                    latest.disk_used_bytes as f64 / latest.disk_total_bytes as f64 * 100.0,
                );
            }
        }
        let containers = self.repo.list_containers().await.unwrap_or_default();

        for rule in rules.iter().filter(|r| r.enabled) {
            match rule.target_type.as_str() {
                "host" => {
                    let value = self
                        .last_host
                        .get(&rule.metric_key)
                        .copied()
                        .unwrap_or(0.0);
                    self.eval_target(rule, "host", "host", value).await;
                }
                "container" => match rule.metric_key.as_str() {
                    "container_unavailable" => self.eval_unavailable(rule, &containers).await,
                    "container_restarts" => self.eval_restarts(rule, &containers).await,
                    _ => {}
                },
                _ => {}
            }
        }
    }

    async fn eval_unavailable(&self, rule: &AlertRule, containers: &[Container]) {
        let now = (self.now)();
        for c in containers {
            let stale = (now - c.last_seen_at).num_seconds() > UNAVAILABLE_AFTER_SECS;
            let value = if c.status.eq_ignore_ascii_case("running") && stale {
                1.0
            } else {
                0.0
            };
            self.eval_target(rule, &c.id, short_target(&c.id), value)
                .await;
        }
    }

    async fn eval_restarts(&mut self, rule: &AlertRule, containers: &[Container]) {
        let mut evaluated: HashSet<&str> = HashSet::new();
        for c in containers {
            // Rows kept only as history do not participate; without this,
            // a replaced container's old row would re-trigger forever.
            if c.status.eq_ignore_ascii_case("missing") {
                continue;
            }
            evaluated.insert(c.id.as_str());

            let prev = self.last_restarts.get(&c.id).copied();
            let mut value = 0.0;
            let mut reason = "counter";
            if let Some(prev) = prev {
                if c.restart_count > prev {
                    value = 1.0;
                }
            }
            if let Some(prev_id) = self.last_service_container.get(&c.service_id) {
                if prev_id != &c.id {
                    value = 1.0;
                    reason = "service_container_changed";
                }
            }
            self.last_service_container
                .insert(c.service_id.clone(), c.id.clone());
            self.last_restarts.insert(c.id.clone(), c.restart_count);

            if self.debug_restarts {
                info!(
                    service = %c.service_id,
                    container = %short_target(&c.id),
                    status = %c.status,
                    restart_count = c.restart_count,
                    prev_restart_count = prev.unwrap_or(-1),
                    seen_before = prev.is_some(),
                    triggered = value == 1.0,
                    reason,
                    "restart eval"
                );
            }
            self.eval_target(rule, &c.id, short_target(&c.id), value)
                .await;
        }
        self.recover_stale_targets(rule, &evaluated).await;
    }

    /// Recover firing restart alerts whose container no longer exists; no
    /// evaluation pass would ever close them otherwise.
    async fn recover_stale_targets(&self, rule: &AlertRule, evaluated: &HashSet<&str>) {
        let active = match self
            .repo
            .active_alert_targets_by_metric(&rule.metric_key)
            .await
        {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "load active alert targets");
                return;
            }
        };
        let now = (self.now)();
        for target in active {
            if evaluated.contains(target.target_fingerprint.as_str()) {
                continue;
            }
            info!(target = %short_target(&target.target_fingerprint), "recover stale alert");
            if let Err(e) = self
                .repo
                .close_alert(target.rule_id, &target.target_fingerprint, now)
                .await
            {
                error!(error = %e, "close stale alert");
                continue;
            }
            let _ = self
                .repo
                .upsert_alert_state(
                    target.rule_id,
                    &target.target_fingerprint,
                    AlertState::Ok,
                    now,
                    None,
                    Some(now),
                )
                .await;
        }
    }

    async fn eval_target(&self, rule: &AlertRule, target: &str, label: &str, value: f64) {
        if value.is_nan() {
            return;
        }
        let should_fire = compare(value, &rule.operator, rule.threshold);
        let now = (self.now)();
        let stored = match self.repo.get_alert_state(rule.id, target).await {
            Ok(s) => s,
            Err(e) => {
                error!(rule_id = rule.id, error = %e, "get alert state");
                return;
            }
        };
        // Never-evaluated pairs start from OK as of now.
        let (state, since, last_fired) = match stored {
            Some(s) => (s.state, s.since_ts, s.last_fired_ts),
            None => (AlertState::Ok, now, None),
        };

        if should_fire {
            match state {
                AlertState::Ok if rule.for_seconds <= 0 => {
                    if in_cooldown(now, last_fired, rule.cooldown_seconds) {
                        self.set_state(rule.id, target, AlertState::Cooldown, now, last_fired, None)
                            .await;
                        return;
                    }
                    self.fire(rule, target, label, value, now, now).await;
                }
                AlertState::Ok => {
                    self.set_state(rule.id, target, AlertState::Pending, now, last_fired, None)
                        .await;
                }
                AlertState::Pending if (now - since).num_seconds() >= rule.for_seconds => {
                    if in_cooldown(now, last_fired, rule.cooldown_seconds) {
                        self.set_state(rule.id, target, AlertState::Cooldown, now, last_fired, None)
                            .await;
                        return;
                    }
                    // The pending start survives as the alert's start.
                    self.fire(rule, target, label, value, since, now).await;
                }
                _ => {}
            }
            return;
        }

        if matches!(
            state,
            AlertState::Firing | AlertState::Pending | AlertState::Cooldown
        ) {
            let closed = match self.repo.close_alert(rule.id, target, now).await {
                Ok(id) => id,
                Err(e) => {
                    error!(rule_id = rule.id, error = %e, "close alert");
                    None
                }
            };
            if state == AlertState::Firing {
                let msg = format!(
                    "RECOVERY {} [{}] value={:.2}",
                    rule.name, label, value
                );
                self.send_notification(closed.unwrap_or_default(), &msg)
                    .await;
            }
            self.set_state(rule.id, target, AlertState::Ok, now, last_fired, Some(now))
                .await;
        }
    }

    async fn fire(
        &self,
        rule: &AlertRule,
        target: &str,
        label: &str,
        value: f64,
        started: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let msg = format!(
            "ALERT {} [{}] value={:.2} {} {:.2}",
            rule.name, label, value, rule.operator, rule.threshold
        );
        let details = serde_json::json!({"value": value, "target": label});
        match self
            .repo
            .create_alert(rule.id, target, "firing", &msg, &details, started)
            .await
        {
            Ok(alert_id) => self.send_notification(alert_id, &msg).await,
            Err(e) => error!(rule_id = rule.id, error = %e, "create alert"),
        }
        self.set_state(rule.id, target, AlertState::Firing, started, Some(now), None)
            .await;
    }

    async fn set_state(
        &self,
        rule_id: i64,
        target: &str,
        state: AlertState,
        since: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
        last_recovered: Option<DateTime<Utc>>,
    ) {
        if let Err(e) = self
            .repo
            .upsert_alert_state(rule_id, target, state, since, last_fired, last_recovered)
            .await
        {
            error!(rule_id, error = %e, "upsert alert state");
        }
    }

    /// Up to three attempts with linear backoff; the terminal outcome is
    /// persisted either way.
    async fn send_notification(&self, alert_id: i64, msg: &str) {
        let mut attempts = 0u32;
        let mut last_err = String::new();
        while attempts < NOTIFY_ATTEMPTS {
            attempts += 1;
            match self.notify.send(msg).await {
                Ok(()) => {
                    let now = (self.now)();
                    let _ = self
                        .repo
                        .insert_notification_event(
                            alert_id,
                            self.notify.channel(),
                            "sent",
                            attempts as i64,
                            "",
                            Some(now),
                        )
                        .await;
                    return;
                }
                Err(e) => last_err = e.to_string(),
            }
            if attempts < NOTIFY_ATTEMPTS {
                tokio::time::sleep(NOTIFY_BACKOFF * attempts).await;
            }
        }
        let _ = self
            .repo
            .insert_notification_event(
                alert_id,
                self.notify.channel(),
                "failed",
                attempts as i64,
                &last_err,
                None,
            )
            .await;
        warn!(error = %last_err, "notify failed");
    }
}

fn in_cooldown(now: DateTime<Utc>, last_fired: Option<DateTime<Utc>>, cooldown_seconds: i64) -> bool {
    match last_fired {
        Some(fired) => (now - fired).num_seconds() < cooldown_seconds,
        None => false,
    }
}

/// True when `value op threshold` holds; unknown operators never match.
pub fn compare(value: f64, op: &str, threshold: f64) -> bool {
    match op {
        ">" => value > threshold,
        ">=" => value >= threshold,
        "<" => value < threshold,
        "<=" => value <= threshold,
        "==" => value == threshold,
        _ => false,
    }
}

/// Container ids trimmed for readability; anything else passes through.
pub fn short_target(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
