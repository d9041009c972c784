use std::path::PathBuf;
use std::time::Duration;

/// Fixed-delay retry budget for one retry site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with the given attempt count and delay.
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Same attempt count, no pause between attempts.
    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    /// Sleep for the configured delay, skipping the call entirely when zero.
    pub(crate) async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Retry budgets for every retry site of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// A-record lookups for the mirror hostname.
    pub resolve: RetryPolicy,
    /// TXT lookups for the version record.
    pub record: RetryPolicy,
    /// Passes over the mirror set for a full artifact.
    pub full_fetch: RetryPolicy,
    /// Passes over the mirror set for a single diff.
    pub diff_fetch: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let delay = Duration::from_secs(5);
        Self {
            resolve: RetryPolicy::new(5, delay),
            record: RetryPolicy::new(4, delay),
            full_fetch: RetryPolicy::new(5, delay),
            diff_fetch: RetryPolicy::new(5, delay),
        }
    }
}

impl RetrySettings {
    /// Same attempt counts as the defaults, without any sleeping.
    pub fn immediate() -> Self {
        let defaults = Self::default();
        Self {
            resolve: RetryPolicy::immediate(defaults.resolve.attempts),
            record: RetryPolicy::immediate(defaults.record.attempts),
            full_fetch: RetryPolicy::immediate(defaults.full_fetch.attempts),
            diff_fetch: RetryPolicy::immediate(defaults.diff_fetch.attempts),
        }
    }
}

/// Settings for one mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Logical upstream hostname; resolved for mirrors and sent as `Host`.
    pub hostname: String,
    /// TXT record carrying the version manifest.
    pub txt_record: String,
    /// Staging directory for downloads.
    pub work_dir: PathBuf,
    /// Published mirror directory.
    pub mirror_dir: PathBuf,
    /// Owner applied to deployed files, best effort.
    pub user: Option<String>,
    /// Group applied to deployed files, best effort.
    pub group: Option<String>,
    /// Directory holding the instance lock file.
    pub lock_dir: PathBuf,
    /// Name of the lock file inside `lock_dir`.
    pub lock_name: String,
    /// TCP port mirrors are contacted on.
    pub http_port: u16,
    /// Retry budgets.
    pub retry: RetrySettings,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            hostname: "database.clamav.net".to_string(),
            txt_record: "current.cvd.clamav.net".to_string(),
            work_dir: PathBuf::from("/var/spool/clamav-mirror"),
            mirror_dir: PathBuf::from("/srv/www/datafeeds.baruwa.com/clamav"),
            user: Some("nginx".to_string()),
            group: Some("nginx".to_string()),
            lock_dir: PathBuf::from("/var/lock/subsys"),
            lock_name: "cvd-mirror".to_string(),
            http_port: 80,
            retry: RetrySettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_budgets() {
        let retry = RetrySettings::default();
        assert_eq!(retry.resolve.attempts, 5);
        assert_eq!(retry.record.attempts, 4);
        assert_eq!(retry.full_fetch.attempts, 5);
        assert_eq!(retry.diff_fetch.attempts, 5);
        assert_eq!(retry.full_fetch.delay, Duration::from_secs(5));
    }

    #[test]
    fn immediate_keeps_attempt_counts() {
        let retry = RetrySettings::immediate();
        assert_eq!(retry.record, RetryPolicy::new(4, Duration::ZERO));
        assert_eq!(retry.resolve.attempts, 5);
    }
}
