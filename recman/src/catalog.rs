use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub number: u32,
    #[serde(default)]
    pub name: String,
    /// Stream locator handed to the capture launcher
    pub stream: String,
}

impl From<&Channel> for api::response::Channel {
    fn from(c: &Channel) -> Self {
        Self {
            id: c.id.clone(),
            number: c.number,
            name: c.name.clone(),
        }
    }
}

/// Immutable channel table, loaded once at startup.
#[derive(Debug, Default)]
pub struct Catalog {
    channels: Vec<Channel>,
    by_id: HashMap<String, usize>,
    by_number: HashMap<u32, usize>,
}

impl Catalog {
    pub fn new(channels: Vec<Channel>) -> anyhow::Result<Self> {
        let mut by_id = HashMap::new();
        let mut by_number = HashMap::new();
        for (i, channel) in channels.iter().enumerate() {
            if channel.id.trim().is_empty() {
                anyhow::bail!("channel #{} has an empty id", channel.number);
            }
            if channel.stream.trim().is_empty() {
                anyhow::bail!("channel {} has no stream locator", channel.id);
            }
            if by_id.insert(channel.id.clone(), i).is_some() {
                anyhow::bail!("duplicate channel id {}", channel.id);
            }
            if by_number.insert(channel.number, i).is_some() {
                anyhow::bail!("duplicate channel number {}", channel.number);
            }
        }
        Ok(Self {
            channels,
            by_id,
            by_number,
        })
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read channel catalog {}", path.display()))?;
        let channels: Vec<Channel> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse channel catalog {}", path.display()))?;
        Self::new(channels)
    }

    pub fn get(&self, id: &str) -> Option<&Channel> {
        self.by_id.get(id).map(|&i| &self.channels[i])
    }

    /// Looks a channel up by id, then by number.
    pub fn resolve(&self, channel_ref: &str) -> Option<&Channel> {
        let channel_ref = channel_ref.trim();
        self.get(channel_ref).or_else(|| {
            channel_ref
                .parse::<u32>()
                .ok()
                .and_then(|n| self.by_number.get(&n))
                .map(|&i| &self.channels[i])
        })
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }
}
