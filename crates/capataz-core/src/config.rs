//! Supervisor, group and child configuration.
//!
//! Configuration is validated before any process action. Group configs are
//! immutable once prepared; child configs carry `Option` overrides that are
//! merged by [`ChildConfig::merged`] on every start/stop call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Result, SupervisorError};
use crate::types::Signal;

/// Top-level supervisor configuration.
///
/// # Toyota Way: Standardized Work (標準作業)
/// Every group is launched through the same contract, so a fleet of
/// workers behaves the same way no matter which executable it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Directory for per-child log files. No log capture when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Daily rotation time (`"HH:MM"`, UTC).
    #[serde(default)]
    pub log_rotate_at: Option<RotateAt>,

    /// How long rotated archives are kept.
    #[serde(default = "default_log_ttl")]
    #[serde(with = "humantime_serde")]
    pub log_ttl: Duration,

    /// Rotate a child's log files before every spawn.
    #[serde(default)]
    pub log_rotate_on_start: bool,

    /// Groups prepared at construction.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

fn default_log_ttl() -> Duration {
    Duration::from_secs(60 * 60 * 24 * 7)
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_rotate_at: None,
            log_ttl: default_log_ttl(),
            log_rotate_on_start: false,
            groups: vec![],
        }
    }
}

impl SupervisorConfig {
    /// Validates every listed group.
    ///
    /// # Errors
    /// Returns an error if any group is invalid or two groups share a name.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for group in &self.groups {
            group.validate()?;
            if !seen.insert(group.name.as_str()) {
                return Err(SupervisorError::config(format!(
                    "group {:?} is listed twice",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SupervisorError::config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SupervisorError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// A launchable workload definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group name (letters, digits, `_`, `-`).
    pub name: String,

    /// Program to execute.
    pub executable: PathBuf,

    /// Base arguments for every child.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory. Inherited when unset.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Base environment for every child.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Channel line a child sends once initialised.
    #[serde(default)]
    pub ready_event: Option<String>,

    /// How long start waits for ready before assuming success.
    #[serde(default = "default_init_timeout")]
    #[serde(with = "humantime_serde")]
    pub init_timeout: Duration,

    /// Signal delivered for a graceful stop.
    #[serde(default = "default_graceful_signal")]
    pub graceful_signal: Signal,

    /// How long stop waits before force-killing.
    #[serde(default = "default_graceful_timeout")]
    #[serde(with = "humantime_serde")]
    pub graceful_timeout: Duration,

    /// On Windows, send the graceful signal name as a channel message.
    #[serde(default)]
    pub use_message_on_windows: bool,

    /// Flag prepended to the arguments of children started with `debug`.
    #[serde(default = "default_debug_flag")]
    pub debug_flag: String,
}

fn default_init_timeout() -> Duration {
    Duration::from_millis(200)
}

fn default_graceful_signal() -> Signal {
    Signal::Term
}

fn default_graceful_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_debug_flag() -> String {
    "--debug".to_string()
}

impl GroupConfig {
    /// Creates a group configuration with default timeouts.
    #[must_use]
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: vec![],
            cwd: None,
            env: HashMap::new(),
            ready_event: None,
            init_timeout: default_init_timeout(),
            graceful_signal: default_graceful_signal(),
            graceful_timeout: default_graceful_timeout(),
            use_message_on_windows: false,
            debug_flag: default_debug_flag(),
        }
    }

    /// Creates a group named after the executable's file stem.
    #[must_use]
    pub fn from_executable(executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let name = executable
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .unwrap_or_default();
        Self::new(name, executable)
    }

    /// Sets the base arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the ready token.
    #[must_use]
    pub fn with_ready_event(mut self, event: impl Into<String>) -> Self {
        self.ready_event = Some(event.into());
        self
    }

    /// Sets the init timeout.
    #[must_use]
    pub const fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Sets the graceful stop timeout.
    #[must_use]
    pub const fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    /// Sets the graceful stop signal.
    #[must_use]
    pub const fn with_graceful_signal(mut self, signal: Signal) -> Self {
        self.graceful_signal = signal;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Adds one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        validate_group_name(&self.name)?;
        if self.executable.as_os_str().is_empty() {
            return Err(SupervisorError::config("executable cannot be empty"));
        }
        if self.ready_event.as_deref() == Some("") {
            return Err(SupervisorError::config("ready_event cannot be empty"));
        }
        Ok(())
    }
}

/// Checks that a group name contains only letters, digits, `_` and `-`.
///
/// # Errors
/// Returns a configuration error otherwise.
pub fn validate_group_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SupervisorError::config("group name cannot be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SupervisorError::config(format!(
            "group name {name:?} must contain only letters, digits, hyphens, and underscores"
        )));
    }
    Ok(())
}

/// Per-child identity plus overridable runtime flags.
///
/// `group` and `port` never change after the child is created. Every
/// other field is an override; `None` means "keep what was there".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildConfig {
    /// Group name.
    pub group: String,

    /// Port number (non-zero).
    pub port: u16,

    /// Extra arguments appended after the group arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Environment overrides (win over group env).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,

    /// Prepend the group's debug flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,

    /// Starting a running child is a no-op instead of an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_not_running: Option<bool>,

    /// Starting a running child stops it first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
}

impl ChildConfig {
    /// Creates a child config with no overrides.
    #[must_use]
    pub fn new(group: impl Into<String>, port: u16) -> Self {
        Self {
            group: group.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets extra arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Adds one environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Sets the debug flag.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Sets the if-not-running flag.
    #[must_use]
    pub const fn with_if_not_running(mut self, value: bool) -> Self {
        self.if_not_running = Some(value);
        self
    }

    /// Sets the restart flag.
    #[must_use]
    pub const fn with_restart(mut self, value: bool) -> Self {
        self.restart = Some(value);
        self
    }

    /// Returns `"group:port"`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.group, self.port)
    }

    /// Whether the debug flag is set.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// Whether start on a running child is a no-op.
    #[must_use]
    pub fn if_not_running(&self) -> bool {
        self.if_not_running.unwrap_or(false)
    }

    /// Whether start on a running child restarts it.
    #[must_use]
    pub fn wants_restart(&self) -> bool {
        self.restart.unwrap_or(false)
    }

    /// Merges `update` over `self`.
    ///
    /// Identity comes from `self`. For every override, a `Some` in `update`
    /// wins and a `None` keeps the stored value.
    #[must_use]
    pub fn merged(&self, update: &Self) -> Self {
        Self {
            group: self.group.clone(),
            port: self.port,
            args: update.args.clone().or_else(|| self.args.clone()),
            env: update.env.clone().or_else(|| self.env.clone()),
            debug: update.debug.or(self.debug),
            if_not_running: update.if_not_running.or(self.if_not_running),
            restart: update.restart.or(self.restart),
        }
    }

    /// Validates the identity.
    ///
    /// # Errors
    /// Returns an error if the group name is missing or the port is zero.
    pub fn validate(&self) -> Result<()> {
        if self.group.is_empty() {
            return Err(SupervisorError::config("a child config must name a group"));
        }
        if self.port == 0 {
            return Err(SupervisorError::config("a child config must have a non-zero port"));
        }
        Ok(())
    }
}

impl fmt::Display for ChildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.port)
    }
}

impl FromStr for ChildConfig {
    type Err = SupervisorError;

    /// Parses the `"group:port"` shorthand.
    fn from_str(s: &str) -> Result<Self> {
        let (group, port) = s
            .rsplit_once(':')
            .ok_or_else(|| SupervisorError::config(format!("expected \"group:port\", got {s:?}")))?;
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(SupervisorError::config(format!("invalid port in {s:?}")));
        }
        let port = port
            .parse()
            .map_err(|_| SupervisorError::config(format!("port out of range in {s:?}")))?;
        let config = Self::new(group, port);
        config.validate()?;
        Ok(config)
    }
}

/// Builds the argument list for a spawn.
///
/// The debug flag comes first (only if the group args do not already carry
/// it), then the group args, then the child args.
#[must_use]
pub fn spawn_args(group: &GroupConfig, child: &ChildConfig) -> Vec<String> {
    let mut args = Vec::with_capacity(group.args.len() + 1);
    if child.is_debug() && !group.args.iter().any(|a| a == &group.debug_flag) {
        args.push(group.debug_flag.clone());
    }
    args.extend(group.args.iter().cloned());
    if let Some(extra) = &child.args {
        args.extend(extra.iter().cloned());
    }
    args
}

/// Layers the environment for a spawn: inherited, then group, then child.
///
/// Inherited entries are taken as raw OS strings, so a non-Unicode
/// variable in the supervisor's environment passes through untouched.
#[must_use]
pub fn spawn_env<I>(inherited: I, group: &GroupConfig, child: &ChildConfig) -> HashMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: HashMap<OsString, OsString> = inherited.into_iter().collect();
    env.extend(group.env.iter().map(|(k, v)| (k.into(), v.into())));
    if let Some(overrides) = &child.env {
        env.extend(overrides.iter().map(|(k, v)| (k.into(), v.into())));
    }
    env
}

/// Daily wall-clock time (UTC) for log rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RotateAt {
    hour: u8,
    minute: u8,
}

impl RotateAt {
    /// Creates a rotation time.
    ///
    /// # Errors
    /// Returns an error if the time is out of range.
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(SupervisorError::config(format!(
                "rotation time {hour:02}:{minute:02} is out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Time until the next occurrence after `now`.
    ///
    /// Never zero: if `now` is exactly on the mark, the next one is a day away.
    #[must_use]
    pub fn until_next(&self, now: SystemTime) -> Duration {
        const DAY: u64 = 24 * 60 * 60;
        let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
        let into_day = since_epoch.as_secs() % DAY;
        let target = u64::from(self.hour) * 3600 + u64::from(self.minute) * 60;
        let wait = (target + DAY - into_day) % DAY;
        let wait = if wait == 0 { DAY } else { wait };
        Duration::from_secs(wait).saturating_sub(Duration::from_nanos(u64::from(
            since_epoch.subsec_nanos(),
        )))
    }
}

impl fmt::Display for RotateAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for RotateAt {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        let (hour, minute) = s
            .split_once(':')
            .ok_or_else(|| SupervisorError::config(format!("expected \"HH:MM\", got {s:?}")))?;
        let hour = hour
            .trim()
            .parse()
            .map_err(|_| SupervisorError::config(format!("bad hour in {s:?}")))?;
        let minute = minute
            .trim()
            .parse()
            .map_err(|_| SupervisorError::config(format!("bad minute in {s:?}")))?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for RotateAt {
    type Error = SupervisorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RotateAt> for String {
    fn from(at: RotateAt) -> Self {
        at.to_string()
    }
}

/// Serde helper for humantime durations.
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a human-readable string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserializes a duration from a human-readable string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn group() -> GroupConfig {
        GroupConfig::new("web", "/usr/bin/worker").with_args(["--serve"])
    }

    #[test]
    fn test_group_defaults() {
        let config = group();
        assert_eq!(config.init_timeout, Duration::from_millis(200));
        assert_eq!(config.graceful_timeout, Duration::from_secs(5));
        assert_eq!(config.graceful_signal, Signal::Term);
        assert_eq!(config.debug_flag, "--debug");
        assert!(!config.use_message_on_windows);
        assert!(config.ready_event.is_none());
    }

    #[test]
    fn test_group_from_executable() {
        let config = GroupConfig::from_executable("/opt/bin/api-worker.sh");
        assert_eq!(config.name, "api-worker");
        assert_eq!(config.executable, PathBuf::from("/opt/bin/api-worker.sh"));
    }

    #[test]
    fn test_group_name_validation() {
        assert!(validate_group_name("web_1-a").is_ok());
        assert!(validate_group_name("").is_err());
        assert!(validate_group_name("web app").is_err());
        assert!(validate_group_name("web:1").is_err());
        assert!(validate_group_name("wéb").is_err());
    }

    #[test]
    fn test_group_validate() {
        assert!(group().validate().is_ok());
        assert!(GroupConfig::new("web", "").validate().is_err());
        assert!(group().with_ready_event("").validate().is_err());
    }

    #[test]
    fn test_child_parse_shorthand() {
        let config: ChildConfig = "web:7000".parse().unwrap();
        assert_eq!(config.group, "web");
        assert_eq!(config.port, 7000);
        assert_eq!(config.key(), "web:7000");
        assert_eq!(config.to_string(), "web:7000");
    }

    #[test]
    fn test_child_parse_rejects() {
        assert!("web".parse::<ChildConfig>().is_err());
        assert!("web:".parse::<ChildConfig>().is_err());
        assert!(":7000".parse::<ChildConfig>().is_err());
        assert!("web:0".parse::<ChildConfig>().is_err());
        assert!("web:70000".parse::<ChildConfig>().is_err());
        assert!("web:-1".parse::<ChildConfig>().is_err());
    }

    #[test]
    fn test_child_merge_precedence() {
        let stored = ChildConfig::new("web", 7000)
            .with_args(["--a"])
            .with_debug(true);
        let update = ChildConfig::new("other", 1).with_restart(true);

        let merged = stored.merged(&update);
        assert_eq!(merged.group, "web", "identity is never reassigned");
        assert_eq!(merged.port, 7000);
        assert_eq!(merged.args, Some(vec!["--a".to_string()]));
        assert!(merged.is_debug());
        assert!(merged.wants_restart());
        assert!(!merged.if_not_running());

        let cleared = merged.merged(&ChildConfig::new("web", 7000).with_debug(false));
        assert!(!cleared.is_debug());
    }

    #[test]
    fn test_spawn_args_order() {
        let child = ChildConfig::new("web", 7000)
            .with_debug(true)
            .with_args(["--port", "7000"]);
        assert_eq!(
            spawn_args(&group(), &child),
            vec!["--debug", "--serve", "--port", "7000"]
        );
    }

    #[test]
    fn test_spawn_args_debug_not_duplicated() {
        let group = group().with_args(["--debug", "--serve"]);
        let child = ChildConfig::new("web", 7000).with_debug(true);
        assert_eq!(spawn_args(&group, &child), vec!["--debug", "--serve"]);
    }

    #[test]
    fn test_spawn_env_child_wins() {
        let group = group().with_env("MODE", "group").with_env("SHARED", "g");
        let child = ChildConfig::new("web", 7000).with_env("MODE", "child");
        let inherited = vec![
            (OsString::from("PATH"), OsString::from("/bin")),
            (OsString::from("SHARED"), OsString::from("parent")),
        ];

        let env = spawn_env(inherited, &group, &child);
        assert_eq!(env[OsStr::new("MODE")], "child");
        assert_eq!(env[OsStr::new("SHARED")], "g");
        assert_eq!(env[OsStr::new("PATH")], "/bin");
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_env_keeps_non_unicode_inherited() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![0xff, 0xfe]);
        let inherited = vec![
            (OsString::from("RAW_VALUE"), raw.clone()),
            (OsString::from_vec(vec![b'K', 0xff]), OsString::from("v")),
        ];
        let group = group().with_env("MODE", "group");
        let env = spawn_env(inherited, &group, &ChildConfig::new("web", 1));

        assert_eq!(env[OsStr::new("RAW_VALUE")], raw);
        assert_eq!(env[&OsString::from_vec(vec![b'K', 0xff])], "v");
        assert_eq!(env[OsStr::new("MODE")], "group");
    }

    #[test]
    fn test_rotate_at_parse() {
        let at: RotateAt = "03:30".parse().unwrap();
        assert_eq!(at.to_string(), "03:30");
        assert!("24:00".parse::<RotateAt>().is_err());
        assert!("12:60".parse::<RotateAt>().is_err());
        assert!("noon".parse::<RotateAt>().is_err());
    }

    #[test]
    fn test_rotate_at_until_next() {
        let at = RotateAt::new(1, 0).unwrap();
        let midnight = UNIX_EPOCH + Duration::from_secs(86_400 * 10);
        assert_eq!(at.until_next(midnight), Duration::from_secs(3600));

        let on_mark = midnight + Duration::from_secs(3600);
        assert_eq!(at.until_next(on_mark), Duration::from_secs(86_400));

        let after = midnight + Duration::from_secs(7200);
        assert_eq!(at.until_next(after), Duration::from_secs(86_400 - 3600));
    }

    #[test]
    fn test_supervisor_config_toml() {
        let toml = r#"
            log_dir = "/var/log/capataz"
            log_rotate_at = "00:00"
            log_ttl = "2days"

            [[groups]]
            name = "web"
            executable = "/usr/bin/worker"
            args = ["--serve"]
            ready_event = "ready"
            init_timeout = "1s"
            graceful_signal = "SIGINT"
            graceful_timeout = "200ms"
        "#;
        let config: SupervisorConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.log_ttl, Duration::from_secs(2 * 86_400));
        assert_eq!(config.log_rotate_at, Some(RotateAt::new(0, 0).unwrap()));
        let web = &config.groups[0];
        assert_eq!(web.graceful_signal, Signal::Int);
        assert_eq!(web.graceful_timeout, Duration::from_millis(200));
        assert_eq!(web.debug_flag, "--debug");
    }

    #[test]
    fn test_supervisor_config_duplicate_groups() {
        let config = SupervisorConfig {
            groups: vec![group(), group()],
            ..SupervisorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = SupervisorConfig::load("/nonexistent/capataz.toml").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capataz.toml");
        std::fs::write(&path, "log_rotate_on_start = true\n").unwrap();
        let config = SupervisorConfig::load(&path).unwrap();
        assert!(config.log_rotate_on_start);
        assert!(config.groups.is_empty());
        assert_eq!(config.log_ttl, Duration::from_secs(604_800));
    }

    proptest::proptest! {
        #[test]
        fn prop_merge_with_empty_update_is_identity(
            debug in proptest::option::of(proptest::bool::ANY),
            restart in proptest::option::of(proptest::bool::ANY),
            port in 1u16..,
        ) {
            let stored = ChildConfig {
                debug,
                restart,
                ..ChildConfig::new("g", port)
            };
            proptest::prop_assert_eq!(stored.merged(&ChildConfig::new("g", port)), stored);
        }

        #[test]
        fn prop_rotate_at_wait_within_a_day(hour in 0u8..24, minute in 0u8..60, secs in 0u64..10_000_000) {
            let at = RotateAt::new(hour, minute).unwrap();
            let wait = at.until_next(UNIX_EPOCH + Duration::from_secs(secs));
            proptest::prop_assert!(wait > Duration::ZERO);
            proptest::prop_assert!(wait <= Duration::from_secs(86_400));
        }
    }
}
