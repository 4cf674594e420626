//! Slack block builders for mirrored content.

use crate::bridge::token;
use crate::channels::{Block, ContextElement, DiscordEmoji, DiscordReaction, SlackMessage};

/// `block_id` prefix of the context blocks holding Discord reactions.
pub const REACTION_BLOCK_PREFIX: &str = "reactions-";

const REACTIONS_PER_BLOCK: usize = 4;

pub fn custom_emoji_url(id: &str, animated: bool) -> String {
    format!(
        "https://cdn.discordapp.com/emojis/{}.{}",
        id,
        if animated { "gif" } else { "png" }
    )
}

fn emoji_element(emoji: &DiscordEmoji) -> ContextElement {
    match &emoji.id {
        Some(id) => ContextElement::Image {
            image_url: custom_emoji_url(id, emoji.animated),
            alt_text: emoji.name.clone(),
        },
        None => ContextElement::Mrkdwn {
            text: emoji.name.clone(),
        },
    }
}

/// Context blocks showing Discord reactions, four per block.
pub fn reaction_blocks(reactions: &[DiscordReaction]) -> Vec<Block> {
    reactions
        .chunks(REACTIONS_PER_BLOCK)
        .enumerate()
        .map(|(n, chunk)| {
            let elements = chunk
                .iter()
                .flat_map(|r| {
                    [
                        emoji_element(&r.emoji),
                        ContextElement::Mrkdwn {
                            text: r.count.to_string(),
                        },
                    ]
                })
                .collect();
            Block::context(Some(format!("{}{}", REACTION_BLOCK_PREFIX, n)), elements)
        })
        .collect()
}

fn is_reaction_block(block: &Block) -> bool {
    matches!(
        block,
        Block::Context(c) if c.block_id.as_deref().is_some_and(|id| id.starts_with(REACTION_BLOCK_PREFIX))
    )
}

/// The blocks of `message` with its reaction blocks replaced.
///
/// Other blocks keep their order. A message whose text is not rendered by any
/// block gets a leading section so the text stays visible next to the
/// reactions; that section is dropped again once the reactions are gone.
pub fn with_reactions(message: &SlackMessage, reactions: &[DiscordReaction]) -> Vec<Block> {
    let visible = token::visible_text(&message.text);
    let text_section = Block::section(visible);

    let mut blocks: Vec<Block> = message
        .blocks
        .iter()
        .filter(|b| !is_reaction_block(b))
        .cloned()
        .collect();

    let only_ours = blocks.first() == Some(&text_section)
        && !blocks.iter().skip(1).any(Block::carries_text);
    if reactions.is_empty() {
        if only_ours && blocks.len() == 1 {
            blocks.clear();
        }
        return blocks;
    }

    if !visible.is_empty() && !blocks.iter().any(Block::carries_text) {
        blocks.insert(0, text_section);
    }
    blocks.extend(reaction_blocks(reactions));
    blocks
}
