// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! Load-once process configuration, modelled on the subset of
//! `online_config`'s dependency stack (`serde` + TOML) a stack with no
//! VTY/hot-reload surface actually needs (see SPEC_FULL.md §4.7: "no
//! `online_config_derive`-style hot-path reconfiguration is implemented").
//! `StackConfig` is deserialized once from an optional TOML file at process
//! start with `serde(default)` fallbacks for every field, and never read
//! again — spec.md §5/§6 is explicit that there is "no persisted state; all
//! configuration in-memory".

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use gsm_ns::NsTimeouts;
use serde::{Deserialize, Serialize};

fn default_udp_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 23000)
}

fn default_tns_block() -> u64 {
    3
}
fn default_tns_reset() -> u64 {
    3
}
fn default_tns_test() -> u64 {
    30
}
fn default_tns_alive() -> u64 {
    3
}
fn default_retries() -> u8 {
    3
}
fn default_bucket_size_max() -> u32 {
    10_000
}
fn default_leak_rate() -> u32 {
    2_000
}
fn default_max_queue_depth() -> u32 {
    64
}

/// NS-VC procedure timers, in whole seconds (spec.md §4.3's `Tns-*` family),
/// as they appear in the TOML config file before being turned into
/// [`gsm_ns::NsTimeouts`] by [`StackConfig::ns_timeouts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NsTimerConfig {
    pub tns_block_secs: u64,
    pub tns_block_retries: u8,
    pub tns_reset_secs: u64,
    pub tns_reset_retries: u8,
    pub tns_test_secs: u64,
    pub tns_alive_secs: u64,
    pub tns_alive_retries: u8,
}

impl Default for NsTimerConfig {
    fn default() -> Self {
        NsTimerConfig {
            tns_block_secs: default_tns_block(),
            tns_block_retries: default_retries(),
            tns_reset_secs: default_tns_reset(),
            tns_reset_retries: default_retries(),
            tns_test_secs: default_tns_test(),
            tns_alive_secs: default_tns_alive(),
            tns_alive_retries: default_retries(),
        }
    }
}

impl NsTimerConfig {
    pub fn to_ns_timeouts(self) -> NsTimeouts {
        NsTimeouts {
            tns_block: Duration::from_secs(self.tns_block_secs),
            tns_block_retries: self.tns_block_retries,
            tns_reset: Duration::from_secs(self.tns_reset_secs),
            tns_reset_retries: self.tns_reset_retries,
            tns_test: Duration::from_secs(self.tns_test_secs),
            tns_alive: Duration::from_secs(self.tns_alive_secs),
            tns_alive_retries: self.tns_alive_retries,
        }
    }
}

/// The default BSSGP leaky-bucket parameters (spec.md §3 "Flow-control
/// bucket") a freshly-registered BVC or MS context is seeded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BssgpBucketConfig {
    pub bucket_size_max: u32,
    pub leak_rate: u32,
    pub max_queue_depth: u32,
}

impl Default for BssgpBucketConfig {
    fn default() -> Self {
        BssgpBucketConfig {
            bucket_size_max: default_bucket_size_max(),
            leak_rate: default_leak_rate(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

/// The whole-process configuration: where to bind the NS transports, the
/// NS-VC procedure timers, and the default BSSGP bucket parameters. Loaded
/// once via [`StackConfig::from_file`] or [`StackConfig::default`]; nothing
/// in this stack re-reads or hot-swaps it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    #[serde(with = "socket_addr_str")]
    pub udp_bind_addr: SocketAddr,
    /// Local IPv4 address to bind the FR/GRE raw socket to, if that
    /// transport is enabled at all (spec.md §6's "FR/GRE local IP";
    /// `None` means the FR/GRE transport is not constructed).
    pub fr_gre_local_ip: Option<IpAddr>,
    pub ns_timers: NsTimerConfig,
    pub bssgp_bucket: BssgpBucketConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            udp_bind_addr: default_udp_bind_addr(),
            fr_gre_local_ip: None,
            ns_timers: NsTimerConfig::default(),
            bssgp_bucket: BssgpBucketConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

impl StackConfig {
    /// Loads a `StackConfig` from a TOML file; every field absent from the
    /// file falls back to the default above. Called exactly once, at
    /// process start (SPEC_FULL.md §6.1).
    pub fn from_file(path: impl AsRef<Path>) -> Result<StackConfig, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let data = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path_str.clone(), source })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse { path: path_str, source })
    }

    pub fn ns_timeouts(&self) -> NsTimeouts {
        self.ns_timers.to_ns_timeouts()
    }
}

mod socket_addr_str {
    use std::net::SocketAddr;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        addr.to_string().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_spec_tns_values() {
        let cfg = StackConfig::default();
        let t = cfg.ns_timeouts();
        assert_eq!(t.tns_test, Duration::from_secs(30));
        assert_eq!(t.tns_alive, Duration::from_secs(3));
        assert_eq!(t.tns_alive_retries, 3);
    }

    #[test]
    fn partial_toml_file_falls_back_to_defaults() {
        let mut file = tempfile_for_test();
        writeln!(file, "udp_bind_addr = \"0.0.0.0:9999\"").unwrap();
        writeln!(file, "[ns_timers]").unwrap();
        writeln!(file, "tns_alive_retries = 5").unwrap();
        let path = file.into_temp_path();

        let cfg = StackConfig::from_file(&path).unwrap();
        assert_eq!(cfg.udp_bind_addr.port(), 9999);
        assert_eq!(cfg.ns_timers.tns_alive_retries, 5);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.ns_timers.tns_test_secs, 30);
        assert_eq!(cfg.bssgp_bucket.bucket_size_max, 10_000);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = StackConfig::from_file("/nonexistent/path/gsm-mobile.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    fn tempfile_for_test() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }
}
