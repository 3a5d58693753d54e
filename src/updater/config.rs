// SPDX-License-Identifier: MIT

//! Runtime configuration
//!
//! Read from `EXT_UPDATER_*` environment variables (a `.env` file is loaded
//! by the binary first). Every value is optional.

use crate::machine::error::MachineError;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub client_id: String,
    /// Prefix of every topic, e.g. `tedge`; empty for none
    pub topic_root: String,
    /// Events topic, relative to the topic root
    pub events_topic: String,
    pub step_delay: Duration,
    pub child_step_delay: Duration,
    pub ack_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Child identifiers containing this marker fail verification
    pub fault_marker: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            client_id: "ext-updater".to_string(),
            topic_root: String::new(),
            events_topic: "events/state_machine".to_string(),
            step_delay: Duration::from_millis(500),
            child_step_delay: Duration::from_millis(500),
            ack_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            fault_marker: "2".to_string(),
        }
    }
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, MachineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using the given variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MachineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("EXT_UPDATER_MQTT_HOST") {
            config.mqtt_host = host;
        }
        if let Some(port) = parse(&lookup, "EXT_UPDATER_MQTT_PORT")? {
            config.mqtt_port = port;
        }
        if let Some(client_id) = lookup("EXT_UPDATER_CLIENT_ID") {
            config.client_id = client_id;
        }
        if let Some(root) = lookup("EXT_UPDATER_TOPIC_ROOT") {
            config.topic_root = root.trim_matches('/').to_string();
        }
        if let Some(topic) = lookup("EXT_UPDATER_EVENTS_TOPIC") {
            config.events_topic = topic.trim_matches('/').to_string();
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "EXT_UPDATER_STEP_DELAY_MS")? {
            config.step_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "EXT_UPDATER_CHILD_STEP_DELAY_MS")? {
            config.child_step_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "EXT_UPDATER_ACK_TIMEOUT_MS")? {
            config.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "EXT_UPDATER_SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(marker) = lookup("EXT_UPDATER_FAULT_MARKER") {
            config.fault_marker = marker;
        }

        Ok(config)
    }

    /// Prefix `topic` with the topic root
    pub fn topic(&self, topic: &str) -> String {
        if self.topic_root.is_empty() {
            topic.to_string()
        } else {
            format!("{}/{}", self.topic_root, topic)
        }
    }

    /// Full events topic
    pub fn events_topic(&self) -> String {
        self.topic(&self.events_topic)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, MachineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| MachineError::config(format!("{}={}: {}", key, raw, e))),
    }
}
