use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_CHILD_CONTEXT_NAME: &str = "ielts-suite-mode-tab";
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_FALLBACK_RECORD_CAP: usize = 1000;
pub const DEFAULT_CLEANUP_WINDOW: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_REDELIVERY_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TYPE_LABEL: &str = "Reading";

/// Maps a base exercise id pattern to the number of sub-suites it is known to have.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuiteCountHint {
    pub pattern: String,
    pub count: u32,
}

impl SuiteCountHint {
    #[must_use]
    pub fn new(pattern: impl Into<String>, count: u32) -> Self {
        Self {
            pattern: pattern.into(),
            count,
        }
    }

    #[must_use]
    pub fn matches(&self, base_id: &str) -> bool {
        base_id.to_lowercase().contains(&self.pattern)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuiteSettings {
    child_context_name: String,
    open_timeout: Duration,
    ready_poll_interval: Duration,
    fallback_record_cap: usize,
    cleanup_window: Duration,
    redelivery_window: Duration,
    type_label: String,
    suite_count_hints: Vec<SuiteCountHint>,
    multi_idle_finalize_after: Option<Duration>,
    shuffle: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SuiteSettingsDraft {
    pub child_context_name: Option<String>,
    pub open_timeout: Option<Duration>,
    pub ready_poll_interval: Option<Duration>,
    pub fallback_record_cap: Option<usize>,
    pub cleanup_window: Option<Duration>,
    pub redelivery_window: Option<Duration>,
    pub type_label: Option<String>,
    pub suite_count_hints: Option<Vec<SuiteCountHint>>,
    pub multi_idle_finalize_after: Option<Duration>,
    pub shuffle: Option<bool>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("child context name cannot be empty")]
    EmptyContextName,
    #[error("open timeout must be > 0")]
    InvalidOpenTimeout,
    #[error("ready poll interval must be > 0 and not exceed the open timeout")]
    InvalidPollInterval,
    #[error("fallback record cap must be > 0")]
    InvalidRecordCap,
    #[error("suite count hint `{0}` needs a non-empty pattern and a count > 0")]
    InvalidSuiteCountHint(String),
}

impl SuiteSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize the draft, filling unset fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` for empty names, zero durations or caps, or malformed hints.
    pub fn validate(self) -> Result<SuiteSettings, SettingsError> {
        let child_context_name = normalize_optional(self.child_context_name)
            .unwrap_or_else(|| DEFAULT_CHILD_CONTEXT_NAME.to_string());
        if child_context_name.is_empty() {
            return Err(SettingsError::EmptyContextName);
        }

        let open_timeout = self.open_timeout.unwrap_or(DEFAULT_OPEN_TIMEOUT);
        if open_timeout.is_zero() {
            return Err(SettingsError::InvalidOpenTimeout);
        }
        let ready_poll_interval = self
            .ready_poll_interval
            .unwrap_or_else(|| DEFAULT_READY_POLL_INTERVAL.min(open_timeout));
        if ready_poll_interval.is_zero() || ready_poll_interval > open_timeout {
            return Err(SettingsError::InvalidPollInterval);
        }

        let fallback_record_cap = self.fallback_record_cap.unwrap_or(DEFAULT_FALLBACK_RECORD_CAP);
        if fallback_record_cap == 0 {
            return Err(SettingsError::InvalidRecordCap);
        }

        let suite_count_hints = self
            .suite_count_hints
            .unwrap_or_else(|| vec![SuiteCountHint::new("100-p", 10)])
            .into_iter()
            .map(|hint| {
                let pattern = hint.pattern.trim().to_lowercase();
                if pattern.is_empty() || hint.count == 0 {
                    Err(SettingsError::InvalidSuiteCountHint(hint.pattern))
                } else {
                    Ok(SuiteCountHint::new(pattern, hint.count))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SuiteSettings {
            child_context_name,
            open_timeout,
            ready_poll_interval,
            fallback_record_cap,
            cleanup_window: self.cleanup_window.unwrap_or(DEFAULT_CLEANUP_WINDOW),
            redelivery_window: self.redelivery_window.unwrap_or(DEFAULT_REDELIVERY_WINDOW),
            type_label: normalize_optional(self.type_label)
                .filter(|label| !label.is_empty())
                .unwrap_or_else(|| DEFAULT_TYPE_LABEL.to_string()),
            suite_count_hints,
            multi_idle_finalize_after: self.multi_idle_finalize_after.filter(|d| !d.is_zero()),
            shuffle: self.shuffle.unwrap_or(true),
        })
    }
}

impl SuiteSettings {
    #[must_use]
    pub fn child_context_name(&self) -> &str {
        &self.child_context_name
    }

    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    #[must_use]
    pub fn ready_poll_interval(&self) -> Duration {
        self.ready_poll_interval
    }

    #[must_use]
    pub fn fallback_record_cap(&self) -> usize {
        self.fallback_record_cap
    }

    #[must_use]
    pub fn cleanup_window(&self) -> Duration {
        self.cleanup_window
    }

    /// How long after a multi-suite session finalizes a repeated sub-suite id still
    /// counts as a redelivery of the finished session.
    #[must_use]
    pub fn redelivery_window(&self) -> Duration {
        self.redelivery_window
    }

    #[must_use]
    pub fn type_label(&self) -> &str {
        &self.type_label
    }

    #[must_use]
    pub fn suite_count_hints(&self) -> &[SuiteCountHint] {
        &self.suite_count_hints
    }

    #[must_use]
    pub fn multi_idle_finalize_after(&self) -> Option<Duration> {
        self.multi_idle_finalize_after
    }

    #[must_use]
    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    /// Copy of these settings with passage shuffling toggled.
    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}

impl Default for SuiteSettings {
    fn default() -> Self {
        Self {
            child_context_name: DEFAULT_CHILD_CONTEXT_NAME.to_string(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            ready_poll_interval: DEFAULT_READY_POLL_INTERVAL,
            fallback_record_cap: DEFAULT_FALLBACK_RECORD_CAP,
            cleanup_window: DEFAULT_CLEANUP_WINDOW,
            redelivery_window: DEFAULT_REDELIVERY_WINDOW,
            type_label: DEFAULT_TYPE_LABEL.to_string(),
            suite_count_hints: vec![SuiteCountHint::new("100-p", 10)],
            multi_idle_finalize_after: None,
            shuffle: true,
        }
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.map(|val| val.trim().to_string())
}
