//! Ordered block list of one container.
//!
//! Every mutation builds the next list and swaps it in whole, then
//! renumbers `order` so it always reads `0..N-1` in list position.
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Block, BlockId, BlockType, ElementRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("index {index} out of range for {len} blocks")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockSequence {
    blocks: Vec<Block>,
}

impl BlockSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes blocks in their stored `order` and makes the numbering dense.
    pub fn from_blocks(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|b| b.order);
        renumber(&mut blocks);
        Self { blocks }
    }

    /// Takes blocks in list order; stale `order` fields are overwritten.
    pub fn from_list(mut blocks: Vec<Block>) -> Self {
        renumber(&mut blocks);
        Self { blocks }
    }

    pub fn from_elements(elements: Vec<ElementRecord>) -> Self {
        Self::from_blocks(elements.into_iter().map(Block::from_element).collect())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn position(&self, id: &BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| &b.id == id)
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.id == id)
    }

    /// Append a new empty block of `kind` with a fresh local id.
    pub fn add(&mut self, kind: BlockType) -> BlockId {
        let block = Block::new(kind, self.blocks.len());
        let id = block.id.clone();
        let mut next = self.blocks.clone();
        next.push(block);
        self.blocks = next;
        debug!(%id, kind = kind.as_str(), "block added");
        id
    }

    /// Replace the block `id` with `new_block` wholesale. The slot keeps its
    /// id and position. Unknown id or a type change is a no-op.
    pub fn update(&mut self, id: &BlockId, mut new_block: Block) -> bool {
        let Some(index) = self.position(id) else {
            debug!(%id, "update for missing block ignored");
            return false;
        };
        if self.blocks[index].content_type() != new_block.content_type() {
            warn!(
                %id,
                from = self.blocks[index].content_type(),
                to = new_block.content_type(),
                "block type is immutable; update ignored"
            );
            return false;
        }
        new_block.id = id.clone();
        new_block.order = index;
        let mut next = self.blocks.clone();
        next[index] = new_block;
        self.blocks = next;
        true
    }

    /// Remove `id` and close the gap. Confirmation is the caller's job.
    pub fn delete(&mut self, id: &BlockId) -> Option<Block> {
        let index = self.position(id)?;
        let mut next = self.blocks.clone();
        let removed = next.remove(index);
        renumber(&mut next);
        self.blocks = next;
        debug!(%id, "block deleted");
        Some(removed)
    }

    /// Splice the block at `from` out and reinsert it at `to`.
    pub fn move_block(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        let len = self.blocks.len();
        for index in [from, to] {
            if index >= len {
                return Err(StoreError::IndexOutOfRange { index, len });
            }
        }
        let mut next = self.blocks.clone();
        let moved = next.remove(from);
        next.insert(to, moved);
        renumber(&mut next);
        self.blocks = next;
        Ok(())
    }

    /// Drag-end form of a move: `active` dropped onto `over`. Returns
    /// whether anything moved.
    pub fn move_onto(&mut self, active: &BlockId, over: &BlockId) -> bool {
        if active == over {
            return false;
        }
        match (self.position(active), self.position(over)) {
            (Some(from), Some(to)) => self.move_block(from, to).is_ok(),
            _ => false,
        }
    }

    /// Swap a placeholder id for the id the server assigned.
    pub fn replace_id(&mut self, from: &BlockId, to: BlockId) -> bool {
        match self.position(from) {
            Some(index) => {
                self.blocks[index].id = to;
                true
            }
            None => false,
        }
    }

    /// `order` equals list position for every block.
    pub fn is_dense(&self) -> bool {
        self.blocks.iter().enumerate().all(|(i, b)| b.order == i)
    }
}

fn renumber(blocks: &mut [Block]) {
    for (index, block) in blocks.iter_mut().enumerate() {
        block.order = index;
    }
}
