//! Provisioning requests derived from driver URLs.
//!
//! A driver URL such as `namespace:///build1?shape=4x8&ttl=2h` resolves to a
//! [`ProvisioningRequest`]. The path names an optional reuse tag and the query
//! carries shape, architecture, time-to-live, and auto-clean overrides.
//! Parsing is pure: every failure surfaces before any remote call is made.

mod duration;

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use tracing::warn;

use crate::config::ConfigError;
use duration::parse as parse_duration;

/// Default number of virtual CPUs.
pub const DEFAULT_CPU: i32 = 8;
/// Default memory size in megabytes.
pub const DEFAULT_MEMORY_MB: i32 = 16 * 1024;
/// Default instance time-to-live.
pub const DEFAULT_TTL: TimeDelta = TimeDelta::hours(1);

const MB_PER_GB: i32 = 1024;
const SHAPE_KEY: &str = "shape";
const ARCH_KEY: &str = "arch";
const TTL_KEY: &str = "ttl";
const AUTOCLEAN_KEY: &str = "autoclean";

/// CPU architecture requested for the instance.
///
/// Values other than `amd64` and `arm64` are forwarded verbatim to the
/// control plane, which decides whether it supports them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Arch {
    /// 64-bit x86.
    #[default]
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// Any other architecture label.
    Other(String),
}

impl Arch {
    /// Returns the label sent to the control plane.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Other(label) => label.as_str(),
        }
    }
}

impl From<&str> for Arch {
    fn from(value: &str) -> Self {
        match value {
            "amd64" => Self::Amd64,
            "arm64" => Self::Arm64,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated description of the instance to create or reuse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningRequest {
    cpu: i32,
    memory_mb: i32,
    arch: Arch,
    ttl: TimeDelta,
    reuse_tag: Option<String>,
    auto_clean: bool,
}

impl Default for ProvisioningRequest {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU,
            memory_mb: DEFAULT_MEMORY_MB,
            arch: Arch::Amd64,
            ttl: DEFAULT_TTL,
            reuse_tag: None,
            auto_clean: true,
        }
    }
}

impl ProvisioningRequest {
    /// Resolves a request from a driver URL.
    ///
    /// Query values that are present but empty are treated as absent. The
    /// reuse tag is the percent-decoded path without its leading slash;
    /// opaque URLs such as `namespace:build1` carry no tag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidShape`] or [`ConfigError::InvalidDuration`]
    /// when the corresponding option is malformed, and
    /// [`ConfigError::InvalidUrl`] when the path does not decode to UTF-8.
    pub fn from_url(url: &Url) -> Result<Self, ConfigError> {
        let tag = reuse_tag(url)?;

        let mut request = Self::default();

        if let Some(raw) = query_value(url, SHAPE_KEY) {
            let (cpu, memory_gb) = parse_shape(&raw)?;
            request.cpu = cpu;
            request.memory_mb =
                memory_gb
                    .checked_mul(MB_PER_GB)
                    .ok_or_else(|| ConfigError::InvalidShape {
                        shape: raw.clone(),
                        message: String::from("memory size overflows when converted to MB"),
                    })?;
        }

        if let Some(arch) = query_value(url, ARCH_KEY) {
            request.arch = Arch::from(arch.as_str());
        }

        if let Some(ttl) = query_value(url, TTL_KEY) {
            request.ttl = parse_duration(&ttl)?;
        }

        // Anonymous instances are always ephemeral; tagged ones survive by default.
        request.auto_clean = tag.is_empty();
        request.reuse_tag = (!tag.is_empty()).then_some(tag);

        if let Some(raw) = query_value(url, AUTOCLEAN_KEY) {
            request.auto_clean = parse_bool(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unrecognised autoclean value, treating as false");
                false
            });
        }

        Ok(request)
    }

    /// Number of virtual CPUs.
    #[must_use]
    pub const fn cpu(&self) -> i32 {
        self.cpu
    }

    /// Memory size in megabytes.
    #[must_use]
    pub const fn memory_mb(&self) -> i32 {
        self.memory_mb
    }

    /// Requested architecture.
    #[must_use]
    pub const fn arch(&self) -> &Arch {
        &self.arch
    }

    /// Time after which the control plane reclaims the instance.
    ///
    /// A negative value yields a deadline that has already passed.
    #[must_use]
    pub const fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Reuse tag, when the instance should be shared by tag.
    #[must_use]
    pub fn reuse_tag(&self) -> Option<&str> {
        self.reuse_tag.as_deref()
    }

    /// Whether the instance is destroyed once its last connection closes.
    #[must_use]
    pub const fn auto_clean(&self) -> bool {
        self.auto_clean
    }
}

impl FromStr for ProvisioningRequest {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
            url: raw.to_owned(),
            message: err.to_string(),
        })?;
        Self::from_url(&url)
    }
}

fn reuse_tag(url: &Url) -> Result<String, ConfigError> {
    if url.cannot_be_a_base() {
        return Ok(String::new());
    }
    let path = url.path();
    let decoded = percent_decode_str(path.strip_prefix('/').unwrap_or(path))
        .decode_utf8()
        .map_err(|err| ConfigError::InvalidUrl {
            url: url.to_string(),
            message: format!("reuse tag is not valid UTF-8: {err}"),
        })?;
    Ok(decoded.into_owned())
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Parses `{cpu}x{mem}` into vCPU count and memory in GB.
fn parse_shape(raw: &str) -> Result<(i32, i32), ConfigError> {
    let parts: Vec<&str> = raw.split('x').collect();
    let [cpu, memory] = parts.as_slice() else {
        return Err(ConfigError::InvalidShape {
            shape: raw.to_owned(),
            message: String::from("unexpected shape, expected {cpu}x{mem}"),
        });
    };

    let (cpu, memory) = match (cpu.parse::<i32>(), memory.parse::<i32>()) {
        (Ok(cpu), Ok(memory)) => (cpu, memory),
        (cpu_result, memory_result) => {
            let failures: Vec<String> = [cpu_result.err(), memory_result.err()]
                .into_iter()
                .flatten()
                .map(|err| err.to_string())
                .collect();
            return Err(ConfigError::InvalidShape {
                shape: raw.to_owned(),
                message: format!("failed to parse shape: {}", failures.join("; ")),
            });
        }
    };

    if cpu <= 0 || memory <= 0 {
        return Err(ConfigError::InvalidShape {
            shape: raw.to_owned(),
            message: String::from("cpu and memory must be positive"),
        });
    }

    Ok((cpu, memory))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
