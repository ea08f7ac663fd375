//! Deterministic channel names for pull requests.
//!
//! The channel name is the only join key between a PR and its channel, so
//! formatting must be injective and [`ChannelNamer::parse`] must invert
//! [`ChannelNamer::name`] exactly for every name we produce.

/// Literal prefix of every PR channel.
pub const CHANNEL_PREFIX: &str = "pr-";

/// Slack rejects channel names longer than this.
pub const MAX_CHANNEL_NAME_LEN: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNamer {
    /// Normalised repository suffix, when names are repository-qualified.
    repo_suffix: Option<String>,
}

impl ChannelNamer {
    /// `pr-{number}`.
    pub fn unqualified() -> Self {
        Self { repo_suffix: None }
    }

    /// `pr-{number}-{repo}`, with the repository normalised to Slack's
    /// channel-name alphabet.
    pub fn qualified(repo_name: &str) -> Self {
        Self {
            repo_suffix: Some(normalize_repo_name(repo_name)),
        }
    }

    pub fn new(repo_name: &str, include_repo: bool) -> Self {
        if include_repo {
            Self::qualified(repo_name)
        } else {
            Self::unqualified()
        }
    }

    pub fn name(&self, pr_number: u64) -> String {
        match &self.repo_suffix {
            None => format!("{}{}", CHANNEL_PREFIX, pr_number),
            Some(suffix) => {
                let head = format!("{}{}-", CHANNEL_PREFIX, pr_number);
                let room = MAX_CHANNEL_NAME_LEN.saturating_sub(head.len());
                // The suffix is ASCII after normalisation, so byte slicing is safe.
                let suffix = &suffix[..suffix.len().min(room)];
                format!("{}{}", head, suffix)
            }
        }
    }

    /// Extract the PR number from a channel name we would have produced.
    ///
    /// Returns `None` for names without the exact prefix, for numbers with
    /// leading zeros or signs, and (in qualified mode) for any suffix other
    /// than this repository's.
    pub fn parse(&self, channel_name: &str) -> Option<u64> {
        let rest = channel_name.strip_prefix(CHANNEL_PREFIX)?;
        let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits_len == 0 {
            return None;
        }
        let (digits, tail) = rest.split_at(digits_len);
        if digits.len() > 1 && digits.starts_with('0') {
            return None;
        }
        let number: u64 = digits.parse().ok()?;

        match &self.repo_suffix {
            None if tail.is_empty() => Some(number),
            None => None,
            Some(_) => (self.name(number) == channel_name).then_some(number),
        }
    }

    /// Exact literal prefix test, used before attempting a full parse.
    pub fn has_prefix(channel_name: &str) -> bool {
        channel_name.starts_with(CHANNEL_PREFIX)
    }
}

/// Lowercase, and replace anything outside `a-z0-9-_` with `-`.
fn normalize_repo_name(repo_name: &str) -> String {
    repo_name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
