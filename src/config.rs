use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub data_dir: String,
    pub db_path: String,
    pub docker_socket: String,
    pub metrics_interval: Duration,
    pub rules_interval: Duration,
    pub logs_interval: Duration,
    pub retention_interval: Duration,
    pub retention_days: i64,
    pub debug_restarts: bool,
    pub skip_self_logs: bool,
    pub telegram_token: String,
    pub telegram_chat_id: String,
}

impl Config {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = getenv("APP_DATA_DIR", "./data");
        let config = Self {
            addr: getenv("APP_ADDR", "0.0.0.0:8080"),
            db_path: getenv("APP_DB_PATH", &format!("{data_dir}/app.db")),
            docker_socket: getenv("DOCKER_SOCKET", "/var/run/docker.sock"),
            metrics_interval: getenv_duration("APP_METRICS_INTERVAL", Duration::from_secs(10)),
            rules_interval: getenv_duration("APP_RULES_INTERVAL", Duration::from_secs(15)),
            logs_interval: getenv_duration("APP_LOGS_INTERVAL", Duration::from_secs(10)),
            retention_interval: getenv_duration(
                "APP_RETENTION_INTERVAL",
                Duration::from_secs(6 * 3600),
            ),
            retention_days: getenv_int("APP_RETENTION_DAYS", 14),
            debug_restarts: getenv_bool("APP_DEBUG_RESTART_ALERTS", false),
            skip_self_logs: getenv_bool("APP_SKIP_SELF_LOGS", true),
            telegram_token: std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default(),
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.addr.is_empty(), "APP_ADDR must be non-empty");
        anyhow::ensure!(!self.db_path.is_empty(), "APP_DB_PATH must be non-empty");
        anyhow::ensure!(
            !self.docker_socket.is_empty(),
            "DOCKER_SOCKET must be non-empty"
        );
        anyhow::ensure!(
            !self.metrics_interval.is_zero(),
            "APP_METRICS_INTERVAL must be > 0"
        );
        anyhow::ensure!(
            !self.rules_interval.is_zero(),
            "APP_RULES_INTERVAL must be > 0"
        );
        anyhow::ensure!(
            !self.logs_interval.is_zero(),
            "APP_LOGS_INTERVAL must be > 0"
        );
        Ok(())
    }
}

fn getenv(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn getenv_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn getenv_bool(key: &str, default: bool) -> bool {
    let v = std::env::var(key).unwrap_or_default();
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn getenv_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

/// Parse `90`, `90s`, `15m`, or `6h` into a duration. Bare numbers are seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (num, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let n: u64 = num.parse().ok()?;
    let secs = match unit.trim() {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        _ => return None,
    };
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_units_and_bare_seconds() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("6h"), Some(Duration::from_secs(21600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172800)));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("0s"), None);
    }
}
