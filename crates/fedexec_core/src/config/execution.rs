use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use fedexec_error::{ExecError, Result, ResultExt};
use serde::{Deserialize, Serialize};

use crate::arrays::scalar::ScalarValue;

pub const DEFAULT_BATCH_SIZE: usize = 2048;
pub const MAX_BATCH_SIZE: usize = 8192;
pub const MAX_SOURCE_CONCURRENCY: usize = 512;
pub const DEFAULT_MAX_DEPENDENT_VALUES: usize = 262_144;
pub const DEFAULT_BACKOFF_RATIO: f64 = 0.8;
pub const DEFAULT_MAX_BUFFERED_ROWS: usize = 10_000_000;

/// What to do when a dependent join sees more distinct key values than
/// `max_dependent_values` at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Run the dependent side once without pushed criteria and join the
    /// results normally.
    #[default]
    Fallback,
    /// Fail the query with a processing error.
    Error,
}

impl FromStr for OverflowPolicy {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fallback" => Ok(OverflowPolicy::Fallback),
            "error" => Ok(OverflowPolicy::Error),
            other => Err(ExecError::new(format!("Invalid overflow policy: '{other}'"))),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fallback => write!(f, "fallback"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Configuration used during execution of a single plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Max number of rows returned in a single batch.
    pub batch_size: usize,
    /// Max number of dependent side executions open at once for a single
    /// dependent join.
    pub source_concurrency: usize,
    /// Max number of distinct key values a dependent join will push down.
    pub max_dependent_values: usize,
    pub dependent_overflow_policy: OverflowPolicy,
    /// Independent NDV to dependent cardinality ratio at which a dependent
    /// join is abandoned during planning.
    pub dependent_backoff_ratio: f64,
    /// Max number of rows that may be held in tuple buffers at once.
    pub max_buffered_rows: usize,
    /// Time the query processor waits before retrying a blocked plan.
    pub blocked_retry_interval_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            source_concurrency: num_cpus::get().clamp(1, MAX_SOURCE_CONCURRENCY),
            max_dependent_values: DEFAULT_MAX_DEPENDENT_VALUES,
            dependent_overflow_policy: OverflowPolicy::default(),
            dependent_backoff_ratio: DEFAULT_BACKOFF_RATIO,
            max_buffered_rows: DEFAULT_MAX_BUFFERED_ROWS,
            blocked_retry_interval_ms: 1,
        }
    }
}

impl ExecutionConfig {
    /// Load a config from json, using defaults for missing fields.
    pub fn from_json(s: &str) -> Result<Self> {
        let conf: ExecutionConfig =
            serde_json::from_str(s).context("Failed to parse execution config")?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize execution config")
    }

    /// Check that all values are within their allowed ranges.
    pub fn validate(&self) -> Result<()> {
        validate_range(BatchSize::NAME, self.batch_size, 1, MAX_BATCH_SIZE)?;
        validate_range(
            SourceConcurrency::NAME,
            self.source_concurrency,
            1,
            MAX_SOURCE_CONCURRENCY,
        )?;
        validate_range(
            MaxDependentValues::NAME,
            self.max_dependent_values,
            1,
            usize::MAX,
        )?;
        validate_range(MaxBufferedRows::NAME, self.max_buffered_rows, 1, usize::MAX)?;
        if !(self.dependent_backoff_ratio > 0.0 && self.dependent_backoff_ratio.is_finite()) {
            return Err(ExecError::new("Setting value out of range")
                .with_field("setting", DependentBackoffRatio::NAME)
                .with_field("value", self.dependent_backoff_ratio));
        }
        Ok(())
    }

    pub fn set_from_scalar(&mut self, name: &str, value: ScalarValue) -> Result<()> {
        let func = get_setting(name)?;
        (func.set)(value, self)
    }

    /// Set a value from its string form, e.g. a value read from an
    /// environment variable.
    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<()> {
        let scalar = if let Ok(v) = value.parse::<i64>() {
            ScalarValue::Int64(v)
        } else if let Ok(v) = value.parse::<f64>() {
            ScalarValue::Float64(v)
        } else if let Ok(v) = value.parse::<bool>() {
            ScalarValue::Boolean(v)
        } else {
            ScalarValue::Utf8(value.to_string())
        };
        self.set_from_scalar(name, scalar)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = get_setting(name)?;
        Ok((func.get)(self))
    }

    pub fn get_as_string(&self, name: &str) -> Result<String> {
        Ok(self.get_as_scalar(name)?.to_string())
    }

    /// Reset a single setting to its default value.
    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();
        let func = get_setting(name)?;
        let scalar = (func.get)(&def_conf);
        (func.set)(scalar, self)
    }

    /// Names of all settings.
    pub fn setting_names() -> impl Iterator<Item = &'static str> {
        let mut names: Vec<_> = GET_SET_FUNCTIONS.keys().copied().collect();
        names.sort_unstable();
        names.into_iter()
    }
}

fn validate_range(name: &str, val: usize, min: usize, max: usize) -> Result<()> {
    if val < min || val > max {
        return Err(ExecError::new("Setting value out of range")
            .with_field("setting", name)
            .with_field("value", val)
            .with_field("min", min)
            .with_field("max", max));
    }
    Ok(())
}

fn get_setting(name: &str) -> Result<&'static SettingFunctions> {
    GET_SET_FUNCTIONS
        .get(name)
        .ok_or_else(|| ExecError::new(format!("Missing setting for '{name}'")))
}

fn scalar_as_usize(name: &str, scalar: &ScalarValue) -> Result<usize> {
    let v = scalar.try_as_i64()?;
    usize::try_from(v).map_err(|_| {
        ExecError::new("Setting value must not be negative")
            .with_field("setting", name)
            .with_field("value", v)
    })
}

struct SettingFunctions {
    set: fn(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()>,
    get: fn(conf: &ExecutionConfig) -> ScalarValue,
}

impl SettingFunctions {
    const fn new<S: ExecutionSetting>() -> Self {
        SettingFunctions {
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

fn insert_setting<S: ExecutionSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<BatchSize>(&mut map);
    insert_setting::<SourceConcurrency>(&mut map);
    insert_setting::<MaxDependentValues>(&mut map);
    insert_setting::<DependentOverflowPolicy>(&mut map);
    insert_setting::<DependentBackoffRatio>(&mut map);
    insert_setting::<MaxBufferedRows>(&mut map);
    insert_setting::<BlockedRetryInterval>(&mut map);

    map
});

pub trait ExecutionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()>;
    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue;
}

pub struct BatchSize;

impl ExecutionSetting for BatchSize {
    const NAME: &'static str = "batch_size";
    const DESCRIPTION: &'static str = "Max number of rows returned in a single batch";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let val = scalar_as_usize(Self::NAME, &scalar)?;
        validate_range(Self::NAME, val, 1, MAX_BATCH_SIZE)?;
        conf.batch_size = val;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.batch_size as i64).into()
    }
}

pub struct SourceConcurrency;

impl ExecutionSetting for SourceConcurrency {
    const NAME: &'static str = "source_concurrency";
    const DESCRIPTION: &'static str =
        "Max number of dependent side executions open at once for a dependent join";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let val = scalar_as_usize(Self::NAME, &scalar)?;
        validate_range(Self::NAME, val, 1, MAX_SOURCE_CONCURRENCY)?;
        conf.source_concurrency = val;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.source_concurrency as i64).into()
    }
}

pub struct MaxDependentValues;

impl ExecutionSetting for MaxDependentValues {
    const NAME: &'static str = "max_dependent_values";
    const DESCRIPTION: &'static str =
        "Max number of distinct key values a dependent join will push down";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let val = scalar_as_usize(Self::NAME, &scalar)?;
        validate_range(Self::NAME, val, 1, usize::MAX)?;
        conf.max_dependent_values = val;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.max_dependent_values as i64).into()
    }
}

pub struct DependentOverflowPolicy;

impl ExecutionSetting for DependentOverflowPolicy {
    const NAME: &'static str = "dependent_overflow_policy";
    const DESCRIPTION: &'static str =
        "Behavior when a dependent join exceeds 'max_dependent_values' ('fallback' or 'error')";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        conf.dependent_overflow_policy = scalar.try_as_str()?.parse()?;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        conf.dependent_overflow_policy.to_string().into()
    }
}

pub struct DependentBackoffRatio;

impl ExecutionSetting for DependentBackoffRatio {
    const NAME: &'static str = "dependent_backoff_ratio";
    const DESCRIPTION: &'static str =
        "Ratio of independent key NDV to dependent cardinality at which dependent joins are not planned";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let val = scalar.try_as_f64()?;
        if !(val > 0.0 && val.is_finite()) {
            return Err(ExecError::new("Setting value out of range")
                .with_field("setting", Self::NAME)
                .with_field("value", val));
        }
        conf.dependent_backoff_ratio = val;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        conf.dependent_backoff_ratio.into()
    }
}

pub struct MaxBufferedRows;

impl ExecutionSetting for MaxBufferedRows {
    const NAME: &'static str = "max_buffered_rows";
    const DESCRIPTION: &'static str = "Max number of rows held in tuple buffers at once";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let val = scalar_as_usize(Self::NAME, &scalar)?;
        validate_range(Self::NAME, val, 1, usize::MAX)?;
        conf.max_buffered_rows = val;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.max_buffered_rows as i64).into()
    }
}

pub struct BlockedRetryInterval;

impl ExecutionSetting for BlockedRetryInterval {
    const NAME: &'static str = "blocked_retry_interval_ms";
    const DESCRIPTION: &'static str = "Milliseconds to wait before polling a blocked plan again";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        conf.blocked_retry_interval_ms = scalar_as_usize(Self::NAME, &scalar)? as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.blocked_retry_interval_ms as i64).into()
    }
}
