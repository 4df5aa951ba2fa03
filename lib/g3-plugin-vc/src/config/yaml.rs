/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use humanize_rs::ParseError;
use yaml_rust::{Yaml, YamlLoader, yaml};

use g3_event::EventProcessorConfig;

use super::{ConnectOptions, PluginVcConfig};

/// The full settings document used to run plugin vc tunnels.
#[derive(Clone, Debug, Default)]
pub struct PluginVcSettings {
    pub runtime: EventProcessorConfig,
    pub plugin_vc: PluginVcConfig,
    pub connect: ConnectOptions,
}

impl PluginVcSettings {
    pub fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        if let Yaml::Hash(map) = v {
            let mut settings = PluginVcSettings::default();
            foreach_kv(map, |k, v| match normalize(k).as_str() {
                "runtime" => {
                    settings.runtime = parse_event_processor_config(v)
                        .context(format!("invalid event processor config value for key {k}"))?;
                    Ok(())
                }
                "plugin_vc" => {
                    settings.plugin_vc = PluginVcConfig::parse_yaml(v)
                        .context(format!("invalid plugin vc config value for key {k}"))?;
                    Ok(())
                }
                "connect" => {
                    settings.connect = ConnectOptions::parse_yaml(v)
                        .context(format!("invalid connect options value for key {k}"))?;
                    Ok(())
                }
                _ => Err(anyhow!("invalid key {k}")),
            })?;
            Ok(settings)
        } else {
            Err(anyhow!(
                "yaml value type for 'plugin vc settings' should be 'map'"
            ))
        }
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        let docs = YamlLoader::load_from_str(&content)
            .map_err(|e| anyhow!("invalid yaml file {}: {e}", path.display()))?;
        match docs.first() {
            Some(doc) => PluginVcSettings::parse_yaml(doc)
                .context(format!("failed to load settings from {}", path.display())),
            None => Ok(PluginVcSettings::default()),
        }
    }
}

pub fn parse_event_processor_config(v: &Yaml) -> anyhow::Result<EventProcessorConfig> {
    if let Yaml::Hash(map) = v {
        let mut config = EventProcessorConfig::default();
        foreach_kv(map, |k, v| match normalize(k).as_str() {
            "thread_number" | "threads" => {
                let value = as_nonzero_usize(v)?;
                config.set_thread_number(value);
                Ok(())
            }
            "thread_stack_size" => {
                let value = as_humanize_usize(v)
                    .context(format!("invalid humanize usize value for key {k}"))?;
                config.set_thread_stack_size(value);
                Ok(())
            }
            "thread_name" => {
                let name = as_string(v)?;
                config.set_thread_name(&name);
                Ok(())
            }
            "lock_retry_time" => {
                let time = as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                config.set_lock_retry_time(time);
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        })?;
        config.check().context("invalid event processor config")?;
        Ok(config)
    } else {
        Err(anyhow!(
            "yaml value type for 'event processor config' should be 'map'"
        ))
    }
}

impl PluginVcConfig {
    pub fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        if let Yaml::Hash(map) = v {
            let mut config = PluginVcConfig::default();
            foreach_kv(map, |k, v| match normalize(k).as_str() {
                "lock_retry_time" => {
                    let time = as_duration(v)
                        .context(format!("invalid humanize duration value for key {k}"))?;
                    config.set_lock_retry_time(time);
                    Ok(())
                }
                "inactivity_check_interval" => {
                    let interval = as_duration(v)
                        .context(format!("invalid humanize duration value for key {k}"))?;
                    config.set_inactivity_check_interval(interval);
                    Ok(())
                }
                "default_max_bytes" => {
                    let size = as_humanize_usize(v)
                        .context(format!("invalid humanize usize value for key {k}"))?;
                    config.set_default_max_bytes(size);
                    Ok(())
                }
                "min_block_transfer_bytes" => {
                    let size = as_humanize_usize(v)
                        .context(format!("invalid humanize usize value for key {k}"))?;
                    config.set_min_block_transfer_bytes(size);
                    Ok(())
                }
                _ => Err(anyhow!("invalid key {k}")),
            })?;
            config.check().context("invalid plugin vc config")?;
            Ok(config)
        } else {
            Err(anyhow!(
                "yaml value type for 'plugin vc config' should be 'map'"
            ))
        }
    }
}

impl ConnectOptions {
    pub fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        if let Yaml::Hash(map) = v {
            let mut options = ConnectOptions::default();
            foreach_kv(map, |k, v| match normalize(k).as_str() {
                "plugin_tag" => {
                    let tag = as_string(v)?;
                    options.set_plugin_tag(&tag);
                    Ok(())
                }
                "plugin_id" => {
                    let id = as_i64(v)?;
                    options.set_plugin_id(id);
                    Ok(())
                }
                "buffer_block_size" => {
                    let size = as_humanize_usize(v)
                        .context(format!("invalid humanize usize value for key {k}"))?;
                    options.set_buffer_block_size(size);
                    Ok(())
                }
                "buffer_water_mark" => {
                    let size = as_humanize_usize(v)
                        .context(format!("invalid humanize usize value for key {k}"))?;
                    options.set_buffer_water_mark(size);
                    Ok(())
                }
                "active_addr" => {
                    let addr = as_string(v)?;
                    let addr = addr
                        .parse()
                        .map_err(|e| anyhow!("invalid socket address {addr}: {e}"))?;
                    options.set_active_addr(addr);
                    Ok(())
                }
                "passive_addr" => {
                    let addr = as_string(v)?;
                    let addr = addr
                        .parse()
                        .map_err(|e| anyhow!("invalid socket address {addr}: {e}"))?;
                    options.set_passive_addr(addr);
                    Ok(())
                }
                _ => Err(anyhow!("invalid key {k}")),
            })?;
            Ok(options)
        } else {
            Err(anyhow!("yaml value type for 'connect options' should be 'map'"))
        }
    }
}

fn normalize(raw: &str) -> String {
    raw.to_lowercase().replace('-', "_")
}

fn foreach_kv<F>(table: &yaml::Hash, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    for (k, v) in table.iter() {
        if let Yaml::String(key) = k {
            f(key, v).context(format!("failed to parse value of key {key}"))?;
        } else {
            return Err(anyhow!("key in hash should be string"));
        }
    }
    Ok(())
}

fn as_string(v: &Yaml) -> anyhow::Result<String> {
    match v {
        Yaml::String(s) => Ok(s.to_string()),
        Yaml::Integer(i) => Ok(i.to_string()),
        _ => Err(anyhow!(
            "yaml value type for string should be 'string' or 'integer'"
        )),
    }
}

fn as_i64(v: &Yaml) -> anyhow::Result<i64> {
    match v {
        Yaml::String(s) => Ok(i64::from_str(s)?),
        Yaml::Integer(i) => Ok(*i),
        _ => Err(anyhow!(
            "yaml value type for 'i64' should be 'string' or 'integer'"
        )),
    }
}

fn as_nonzero_usize(v: &Yaml) -> anyhow::Result<NonZeroUsize> {
    match v {
        Yaml::String(s) => Ok(NonZeroUsize::from_str(s)?),
        Yaml::Integer(i) => {
            let u = usize::try_from(*i)?;
            Ok(NonZeroUsize::try_from(u)?)
        }
        _ => Err(anyhow!(
            "yaml value type for 'nonzero usize' should be 'string' or 'integer'"
        )),
    }
}

fn as_humanize_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(value) => {
            let v = value.parse::<humanize_rs::bytes::Bytes>()?;
            Ok(v.size())
        }
        Yaml::Integer(value) => Ok(usize::try_from(*value)?),
        _ => Err(anyhow!(
            "yaml value type for humanize usize should be 'string' or 'integer'"
        )),
    }
}

fn as_duration(v: &Yaml) -> anyhow::Result<Duration> {
    match v {
        Yaml::String(value) => match humanize_rs::duration::parse(value) {
            Ok(v) => Ok(v),
            Err(ParseError::MissingUnit) => {
                let u = u64::from_str(value).map_err(|_| anyhow!("invalid duration string"))?;
                Ok(Duration::from_secs(u))
            }
            Err(e) => Err(anyhow!("invalid humanize duration string: {e}")),
        },
        Yaml::Integer(value) => {
            let u = u64::try_from(*value).map_err(|_| anyhow!("unsupported duration value"))?;
            Ok(Duration::from_secs(u))
        }
        _ => Err(anyhow!(
            "yaml value type for humanize duration should be 'string' or 'integer'"
        )),
    }
}
