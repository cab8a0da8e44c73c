//! Sound card discovery from `/proc/asound/cards`

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

pub const CARDS_PATH: &str = "/proc/asound/cards";

static CARD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s+\[([^\]]*?)\s*\]:\s*(.*)$").expect("card line pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub index: u32,
    /// Short ALSA id, e.g. `Ultra`
    pub id: String,
    pub description: String,
}

/// Parse the cards listing; the indented second line of each entry is skipped
pub fn parse_cards(text: &str) -> Vec<CardInfo> {
    text.lines()
        .filter_map(|line| CARD_LINE.captures(line))
        .filter_map(|caps| {
            Some(CardInfo {
                index: caps[1].parse().ok()?,
                id: caps[2].to_string(),
                description: caps[3].trim().to_string(),
            })
        })
        .collect()
}

pub fn read_cards(path: &Path) -> std::io::Result<Vec<CardInfo>> {
    let text = std::fs::read_to_string(path)?;
    let cards = parse_cards(&text);
    debug!(count = cards.len(), "Sound cards listed");
    Ok(cards)
}

/// First card whose id is one of `names`
pub fn find_card<'a>(cards: &'a [CardInfo], names: &[String]) -> Option<&'a CardInfo> {
    cards.iter().find(|c| names.iter().any(|n| n == &c.id))
}
