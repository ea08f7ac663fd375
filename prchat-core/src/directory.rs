//! Channel Directory: the fully materialised channel listing, and the PR
//! channels within it.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::channel_name::ChannelNamer;
use crate::model::Channel;
use crate::platform::{collect_pages, ChatPlatform};

pub struct ChannelDirectory<'a> {
    chat: &'a dyn ChatPlatform,
}

impl<'a> ChannelDirectory<'a> {
    pub fn new(chat: &'a dyn ChatPlatform) -> Self {
        Self { chat }
    }

    /// Every channel in the workspace, pages concatenated in order.
    ///
    /// Fails as a whole if any page fails. Callers must treat that as
    /// "retry later", never as an empty workspace.
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let chat = self.chat;
        let channels =
            collect_pages(|cursor| async move { chat.list_channels_page(cursor.as_deref()).await })
                .await
                .context("Failed to list channels")?;
        info!("Fetched {} channels", channels.len());
        Ok(channels)
    }

    pub async fn view(&self, namer: &ChannelNamer) -> Result<DirectoryView> {
        Ok(DirectoryView::new(self.list_channels().await?, namer))
    }
}

/// Random access over one directory listing.
#[derive(Debug, Clone, Default)]
pub struct DirectoryView {
    by_name: BTreeMap<String, Channel>,
    /// PR number → channel name, for channels that parse.
    by_number: BTreeMap<u64, String>,
}

impl DirectoryView {
    pub fn new(channels: Vec<Channel>, namer: &ChannelNamer) -> Self {
        let mut view = Self::default();
        for channel in channels {
            if ChannelNamer::has_prefix(&channel.name) {
                match namer.parse(&channel.name) {
                    Some(number) => {
                        view.by_number.insert(number, channel.name.clone());
                    }
                    None => debug!("Ignoring non-PR channel #{}", channel.name),
                }
            }
            view.by_name.insert(channel.name.clone(), channel);
        }
        view
    }

    pub fn find(&self, name: &str) -> Option<&Channel> {
        self.by_name.get(name)
    }

    pub fn for_pull_request(&self, number: u64) -> Option<&Channel> {
        self.by_number
            .get(&number)
            .and_then(|name| self.by_name.get(name))
    }

    /// PR channels with their parsed numbers, in ascending PR order.
    pub fn pr_channels(&self) -> impl Iterator<Item = (u64, &Channel)> {
        self.by_number
            .iter()
            .filter_map(|(number, name)| self.by_name.get(name).map(|c| (*number, c)))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
