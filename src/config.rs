// =============================================================================
// config.rs — THE GRAND CONFIGURATION CATHEDRAL
// =============================================================================
//
// Every system needs configuration, but not every system needs THIS MUCH
// configuration for a service with two routes. We have knobs for knobs:
// per-step browser waits, a cache TTL, a deadline, and a "how many browsers"
// dial that should never leave 1.
//
// All values can be overridden via environment variables, because hardcoding
// configuration is how you end up on the front page of Hacker News for the
// wrong reasons.
//
// Default values have been carefully chosen through a rigorous process of
// "that's what survived against the live site" and "the VPS will fall over
// if we go bigger than this."
// =============================================================================

use std::env;
use std::time::Duration;

use crate::browser::BrowserTuning;

/// The Grand Configuration Struct. Every tunable parameter in the entire
/// engine lives here. Think of it as the cockpit of a fighter jet, except
/// instead of controlling weapons systems, you're controlling how patiently
/// we wait for a Brazilian court website to render a spinner.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // TARGET SITE
    // =========================================================================

    /// The PJe public-consultation base URL. Fixed per deployment; each
    /// tribunal runs its own instance of the same software with its own
    /// opinions about markup.
    /// Default: the TJMG public lookup.
    pub base_url: String,

    // =========================================================================
    // HTTP SERVER
    // =========================================================================

    /// Port the engine's own HTTP API listens on.
    pub http_port: u16,

    // =========================================================================
    // CACHE
    // =========================================================================

    /// How long a computed answer stays fresh. Default: 300 seconds.
    /// Court data moves at court speed; five minutes of staleness has
    /// never mattered and saves a full browser session per repeat ask.
    pub cache_ttl: Duration,

    // =========================================================================
    // CONCURRENCY & DEADLINE
    // Because each lookup is an entire Chromium process, and the VPS
    // has feelings.
    // =========================================================================

    /// How many browser sessions may run at once. The resource model of
    /// this engine is written for 1. Anything larger gets a warning at
    /// startup and whatever consequences it deserves.
    pub slot_capacity: usize,

    /// The overall wall-clock budget for one lookup, radio click to last
    /// popup. Default: 180 seconds, because judicial scraping is slow and
    /// pretending otherwise just converts successes into 504s.
    pub lookup_deadline: Duration,

    // =========================================================================
    // BROWSER STEP TUNING
    // The empirically-beaten waits. Change these only while staring at
    // the real site.
    // =========================================================================

    /// Settle delay after first navigation.
    pub initial_delay: Duration,
    /// Budget for the results spinner to appear.
    pub spinner_visible: Duration,
    /// Budget for a visible spinner to clear.
    pub spinner_hidden: Duration,
    /// Flat wait when no spinner ever showed.
    pub grace_delay: Duration,
    /// Budget for a case-detail popup to materialize.
    pub popup_timeout: Duration,
    /// Settle delay after a popup opens.
    pub popup_settle: Duration,
    /// Pause between keystrokes while typing the document digits.
    pub type_delay: Duration,

    /// Chrome/Chromium executable override. None = auto-detect.
    pub chrome_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    /// "Sensible" here meaning "will work out of the box without any env vars
    /// but will also respect your wishes if you set them."
    ///
    /// Every parameter can be overridden via environment variables prefixed
    /// with PJE_. Because namespacing your env vars is what separates the
    /// professionals from the amateurs.
    pub fn from_env() -> Self {
        // Try to load .env if it exists. Fail silently if it doesn't,
        // because not everyone has their life together enough to create
        // a .env file.
        let _ = dotenvy::dotenv();

        Config {
            base_url: env_or_default("PJE_BASE_URL", "https://pje-consulta-publica.tjmg.jus.br/"),

            http_port: env_or_default("PJE_HTTP_PORT", "8000").parse().unwrap_or(8000),

            cache_ttl: Duration::from_secs(
                env_or_default("PJE_CACHE_TTL_SECS", "300").parse().unwrap_or(300),
            ),

            slot_capacity: env_or_default("PJE_SLOT_CAPACITY", "1").parse().unwrap_or(1),

            lookup_deadline: Duration::from_secs(
                env_or_default("PJE_LOOKUP_DEADLINE_SECS", "180").parse().unwrap_or(180),
            ),

            initial_delay: Duration::from_millis(
                env_or_default("PJE_INITIAL_DELAY_MS", "1200").parse().unwrap_or(1200),
            ),
            spinner_visible: Duration::from_millis(
                env_or_default("PJE_SPINNER_VISIBLE_MS", "2000").parse().unwrap_or(2000),
            ),
            spinner_hidden: Duration::from_millis(
                env_or_default("PJE_SPINNER_HIDDEN_MS", "25000").parse().unwrap_or(25_000),
            ),
            grace_delay: Duration::from_millis(
                env_or_default("PJE_GRACE_DELAY_MS", "8000").parse().unwrap_or(8000),
            ),
            popup_timeout: Duration::from_millis(
                env_or_default("PJE_POPUP_TIMEOUT_MS", "20000").parse().unwrap_or(20_000),
            ),
            popup_settle: Duration::from_millis(
                env_or_default("PJE_POPUP_SETTLE_MS", "1200").parse().unwrap_or(1200),
            ),
            type_delay: Duration::from_millis(
                env_or_default("PJE_TYPE_DELAY_MS", "40").parse().unwrap_or(40),
            ),

            chrome_path: env::var("PJE_CHROME_PATH").ok().filter(|p| !p.is_empty()),
        }
    }

    /// Validate the parts of the config that can be validated without
    /// touching the network. Returns a human-readable complaint list;
    /// empty means "probably fine".
    pub fn validate(&self) -> Vec<String> {
        let mut complaints = Vec::new();

        if url::Url::parse(&self.base_url).is_err() {
            complaints.push(format!("PJE_BASE_URL is not a valid URL: {}", self.base_url));
        }
        if self.slot_capacity == 0 {
            complaints.push("PJE_SLOT_CAPACITY of 0 would deadlock every request; using 1".into());
        }
        if self.lookup_deadline < Duration::from_secs(30) {
            complaints.push(format!(
                "PJE_LOOKUP_DEADLINE_SECS of {}s is shorter than a single page load on a bad day",
                self.lookup_deadline.as_secs()
            ));
        }
        complaints
    }

    /// The browser-layer slice of this configuration.
    pub fn browser_tuning(&self) -> BrowserTuning {
        BrowserTuning {
            initial_delay: self.initial_delay,
            spinner_visible: self.spinner_visible,
            spinner_hidden: self.spinner_hidden,
            grace_delay: self.grace_delay,
            popup_timeout: self.popup_timeout,
            popup_settle: self.popup_settle,
            type_delay: self.type_delay,
            chrome_path: self.chrome_path.clone(),
        }
    }
}

/// Helper function to read an environment variable with a default fallback.
/// Because unwrap_or on env::var is ugly and we have standards.
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_the_documented_ones() {
        // Tests may run with a dirty environment; only assert the knobs
        // nobody sets in CI.
        let config = Config {
            base_url: "https://pje-consulta-publica.tjmg.jus.br/".into(),
            http_port: 8000,
            cache_ttl: Duration::from_secs(300),
            slot_capacity: 1,
            lookup_deadline: Duration::from_secs(180),
            initial_delay: Duration::from_millis(1200),
            spinner_visible: Duration::from_secs(2),
            spinner_hidden: Duration::from_secs(25),
            grace_delay: Duration::from_secs(8),
            popup_timeout: Duration::from_secs(20),
            popup_settle: Duration::from_millis(1200),
            type_delay: Duration::from_millis(40),
            chrome_path: None,
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validate_flags_bad_url() {
        let mut config = Config::from_env();
        config.base_url = "not a url".into();
        assert!(config.validate().iter().any(|c| c.contains("PJE_BASE_URL")));
    }

    #[test]
    fn test_validate_flags_zero_capacity_and_tiny_deadline() {
        let mut config = Config::from_env();
        config.slot_capacity = 0;
        config.lookup_deadline = Duration::from_secs(5);
        let complaints = config.validate();
        assert_eq!(complaints.len(), 2);
    }

    #[test]
    fn test_browser_tuning_slice_carries_waits() {
        let mut config = Config::from_env();
        config.grace_delay = Duration::from_secs(3);
        config.chrome_path = Some("/usr/bin/chromium".into());
        let tuning = config.browser_tuning();
        assert_eq!(tuning.grace_delay, Duration::from_secs(3));
        assert_eq!(tuning.chrome_path.as_deref(), Some("/usr/bin/chromium"));
    }
}
