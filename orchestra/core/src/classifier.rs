//! Command Classifier
//!
//! Decides how a piece of raw user text is routed:
//!
//! - `天气 北京` / `weather Berlin` → [`Classification::NetworkCommand`]
//! - `/summarize some text` → [`Classification::SlashCommand`]
//! - anything else → [`Classification::ModelQuery`]
//!
//! [`classify`] is total: it never fails, and input it cannot place with
//! confidence falls through to a model query. Unknown slash tokens keep their
//! leading slash as literal text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Network Commands
// =============================================================================

/// Auxiliary network services a command can target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkCommandKind {
    /// Weather lookup
    Weather,
    /// Stock quote
    Stock,
    /// News headlines
    News,
    /// Web search
    Search,
}

impl NetworkCommandKind {
    /// All kinds, in matching priority order
    pub const ALL: [Self; 4] = [Self::Weather, Self::Stock, Self::News, Self::Search];

    /// Lowercase name used in configuration and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Stock => "stock",
            Self::News => "news",
            Self::Search => "search",
        }
    }

    /// Localized keywords recognized as a prefix
    ///
    /// These may be directly followed by the query, with or without a space.
    fn localized_keywords(self) -> &'static [&'static str] {
        match self {
            Self::Weather => &["天气", "天氣"],
            Self::Stock => &["股票", "股价", "股價"],
            Self::News => &["新闻", "新聞"],
            Self::Search => &["搜索", "搜尋"],
        }
    }

    /// English aliases recognized as a prefix (case-insensitive)
    ///
    /// An alias must be followed by whitespace or `:` so that ordinary words
    /// starting with the same letters ("newsletter") are left alone.
    fn english_aliases(self) -> &'static [&'static str] {
        match self {
            Self::Weather => &["weather"],
            Self::Stock => &["stocks", "stock"],
            Self::News => &["news"],
            Self::Search => &["search"],
        }
    }
}

impl fmt::Display for NetworkCommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkCommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown network command kind: {s}"))
    }
}

// =============================================================================
// Slash Commands
// =============================================================================

/// Slash commands understood by the core
///
/// Each expands into a model prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlashCommandName {
    /// Summarize the argument text
    Summarize,
    /// Translate the argument text
    Translate,
    /// Explain the argument text
    Explain,
    /// Rewrite the argument text more clearly
    Rewrite,
    /// Produce code for the argument description
    Code,
}

impl SlashCommandName {
    /// All known commands
    pub const ALL: [Self; 5] = [
        Self::Summarize,
        Self::Translate,
        Self::Explain,
        Self::Rewrite,
        Self::Code,
    ];

    /// Command token (without the slash)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Translate => "translate",
            Self::Explain => "explain",
            Self::Rewrite => "rewrite",
            Self::Code => "code",
        }
    }

    /// Look up a command token, case-insensitively
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(token))
    }

    /// Expand the command and its arguments into a model prompt
    #[must_use]
    pub fn expand(self, args: &str) -> String {
        let instruction = match self {
            Self::Summarize => "Summarize the following concisely, keeping the key points:",
            Self::Translate => {
                "Translate the following. If it is not English, translate it to English; \
                 otherwise translate it to Chinese:"
            }
            Self::Explain => "Explain the following clearly, step by step:",
            Self::Rewrite => "Rewrite the following to be clearer and more concise:",
            Self::Code => "Write code for the following request. Reply with the code and a short explanation:",
        };

        if args.is_empty() {
            instruction.trim_end_matches(':').to_string()
        } else {
            format!("{instruction}\n\n{args}")
        }
    }
}

impl fmt::Display for SlashCommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Routing decision for one piece of user text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Classification {
    /// Free-form query for the selected model responders
    ModelQuery {
        /// The text, unchanged
        text: String,
    },
    /// Structured query for an auxiliary network service
    NetworkCommand {
        /// Which service answers it
        kind: NetworkCommandKind,
        /// The remainder after the keyword, trimmed
        query: String,
    },
    /// Known slash command
    SlashCommand {
        /// Command name
        name: SlashCommandName,
        /// Arguments after the command token, trimmed
        args: String,
    },
}

/// Classify raw user text
///
/// Deterministic, side-effect free, and total.
#[must_use]
pub fn classify(text: &str) -> Classification {
    let trimmed = text.trim_start();

    if let Some(rest) = trimmed.strip_prefix('/') {
        if let Some((name, args)) = parse_slash(rest) {
            return Classification::SlashCommand { name, args };
        }
        tracing::trace!(text, "Unknown slash command, treating as model query");
        return model_query(text);
    }

    if let Some((kind, query)) = parse_network_command(trimmed) {
        return Classification::NetworkCommand { kind, query };
    }

    model_query(text)
}

fn model_query(text: &str) -> Classification {
    Classification::ModelQuery {
        text: text.to_string(),
    }
}

fn parse_slash(rest: &str) -> Option<(SlashCommandName, String)> {
    let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let (token, args) = rest.split_at(token_end);
    let name = SlashCommandName::from_token(token)?;
    Some((name, args.trim().to_string()))
}

fn parse_network_command(text: &str) -> Option<(NetworkCommandKind, String)> {
    for kind in NetworkCommandKind::ALL {
        for keyword in kind.localized_keywords() {
            if let Some(rest) = text.strip_prefix(keyword) {
                let rest = rest.trim_start_matches([':', '：']);
                return non_empty_query(kind, rest);
            }
        }

        for alias in kind.english_aliases() {
            let Some(head) = text.get(..alias.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(alias) {
                continue;
            }
            let rest = &text[alias.len()..];
            let boundary = rest
                .chars()
                .next()
                .is_some_and(|c| c.is_whitespace() || c == ':' || c == '：');
            if boundary {
                let rest = rest.trim_start().trim_start_matches([':', '：']);
                return non_empty_query(kind, rest);
            }
        }
    }
    None
}

/// A keyword with nothing after it is ambiguous; it falls back to a model query
fn non_empty_query(kind: NetworkCommandKind, rest: &str) -> Option<(NetworkCommandKind, String)> {
    let query = rest.trim();
    if query.is_empty() {
        tracing::trace!(kind = %kind, "Network keyword without query, treating as model query");
        None
    } else {
        Some((kind, query.to_string()))
    }
}
