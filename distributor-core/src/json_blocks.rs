//! A [`BlockParser`] for content already carried as a JSON block list.
//!
//! Hosts that ship parsed blocks (the REST `blocks` representation) can hand
//! the list straight to the pipeline without a grammar parser. Any content that
//! is not such a list is treated as classic, block-less content.

use tracing::{debug, warn};

use crate::contract::BlockParser;
use crate::walker::Block;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBlockParser;

impl JsonBlockParser {
    fn try_parse(content: &str) -> Option<Vec<Block>> {
        let trimmed = content.trim_start();
        if !trimmed.starts_with('[') {
            return None;
        }
        match serde_json::from_str::<Vec<Block>>(trimmed) {
            Ok(blocks) => Some(blocks),
            Err(e) => {
                debug!(error = %e, "Content is not a JSON block list");
                None
            }
        }
    }
}

impl BlockParser for JsonBlockParser {
    fn has_blocks(&self, content: &str) -> bool {
        Self::try_parse(content).is_some_and(|blocks| !blocks.is_empty())
    }

    fn parse(&self, content: &str) -> Vec<Block> {
        Self::try_parse(content).unwrap_or_default()
    }

    fn serialize(&self, blocks: &[Block]) -> String {
        serde_json::to_string(blocks).unwrap_or_else(|e| {
            warn!(error = %e, "Could not serialize blocks");
            String::new()
        })
    }
}
