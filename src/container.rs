//! Editing state of one container (course section or news item).
//!
//! Wraps the block list with everything the save cycle needs: which ids
//! the server last reported, a dirty flag raised by every successful
//! mutation, and tickets for async work so a result arriving after the
//! draft was reloaded or closed is dropped instead of applied.
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::api::{ApiError, PortalService};
use crate::model::{Block, BlockData, BlockId, BlockType, ContainerRef, ElementRecord};
use crate::reconcile::{self, ApplyReport, ReconcileError, SavePlan};
use crate::store::{BlockSequence, StoreError};

pub const DELETE_PROMPT: &str = "Delete this block?";

/// Asks the user before a destructive change.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("a save is already in progress")]
    InProgress,
    #[error("container was closed or reloaded; result discarded")]
    Discarded,
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("saved, but reloading the container failed: {source}")]
    Reload {
        applied: ApplyReport,
        #[source]
        source: ApiError,
    },
}

/// Pending save; carries the plan computed when the save started.
#[derive(Debug, Clone)]
pub struct SaveTicket {
    pub plan: SavePlan,
    generation: u64,
    revision: u64,
}

#[derive(Debug)]
pub struct SaveOutcome {
    generation: u64,
    revision: u64,
    result: Result<(ApplyReport, Vec<ElementRecord>), SaveError>,
}

/// Pending upload for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub block: BlockId,
    generation: u64,
    /// Gallery images present when the upload started.
    baseline: usize,
}

#[derive(Debug)]
pub struct ContainerDraft {
    container: ContainerRef,
    blocks: BlockSequence,
    server_ids: BTreeSet<i64>,
    dirty: bool,
    revision: u64,
    generation: u64,
    saving: bool,
    closed: bool,
    uploads: HashSet<BlockId>,
}

impl ContainerDraft {
    pub fn from_elements(container: ContainerRef, elements: Vec<ElementRecord>) -> Self {
        let server_ids = elements.iter().map(|e| e.id).collect();
        Self {
            container,
            blocks: BlockSequence::from_elements(elements),
            server_ids,
            dirty: false,
            revision: 0,
            generation: 0,
            saving: false,
            closed: false,
            uploads: HashSet::new(),
        }
    }

    #[instrument(skip(service))]
    pub async fn load(container: ContainerRef, service: &dyn PortalService) -> Result<Self, ApiError> {
        let elements = service.list_elements(container).await?;
        Ok(Self::from_elements(container, elements))
    }

    pub fn container(&self) -> ContainerRef {
        self.container
    }

    pub fn blocks(&self) -> &[Block] {
        self.blocks.blocks()
    }

    pub fn server_ids(&self) -> &BTreeSet<i64> {
        &self.server_ids
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    /// Buttons of the add toolbar for this container: type and label.
    pub fn toolbar(&self) -> Vec<(BlockType, &'static str)> {
        BlockType::toolbar(!self.container.allows_homework())
            .into_iter()
            .map(|t| (t, t.label()))
            .collect()
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    pub fn add_block(&mut self, kind: BlockType) -> BlockId {
        let id = self.blocks.add(kind);
        self.touch();
        id
    }

    pub fn update_block(&mut self, id: &BlockId, block: Block) -> bool {
        let changed = self.blocks.update(id, block);
        if changed {
            self.touch();
        }
        changed
    }

    /// Swap in a whole edited list (e.g. read back from a file), keeping
    /// the server snapshot for the next diff.
    pub fn replace_blocks(&mut self, blocks: Vec<Block>) {
        self.blocks = BlockSequence::from_list(blocks);
        self.touch();
    }

    /// Replace only the payload of `id`, keeping title and schedule.
    pub fn update_data(&mut self, id: &BlockId, data: BlockData) -> bool {
        let Some(mut block) = self.blocks.get(id).cloned() else {
            return false;
        };
        block.data = data;
        self.update_block(id, block)
    }

    /// Deletes after the user confirms. A missing id never prompts.
    pub fn delete_block(&mut self, id: &BlockId, confirm: &dyn Confirm) -> Option<Block> {
        self.blocks.get(id)?;
        if !confirm.confirm(DELETE_PROMPT) {
            return None;
        }
        let removed = self.blocks.delete(id);
        if removed.is_some() {
            self.uploads.remove(id);
            self.touch();
        }
        removed
    }

    pub fn move_block(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        self.blocks.move_block(from, to)?;
        if from != to {
            self.touch();
        }
        Ok(())
    }

    pub fn move_onto(&mut self, active: &BlockId, over: &BlockId) -> bool {
        let moved = self.blocks.move_onto(active, over);
        if moved {
            self.touch();
        }
        moved
    }

    /// Claim the upload slot of a block. `None` while one is already
    /// running for it, so the trigger stays disabled.
    pub fn begin_upload(&mut self, id: &BlockId) -> Option<UploadTicket> {
        if self.closed {
            return None;
        }
        let baseline = match &self.blocks.get(id)?.data {
            BlockData::Gallery(gallery) => gallery.images.len(),
            _ => 0,
        };
        if !self.uploads.insert(id.clone()) {
            return None;
        }
        Some(UploadTicket {
            block: id.clone(),
            generation: self.generation,
            baseline,
        })
    }

    pub fn is_uploading(&self, id: &BlockId) -> bool {
        self.uploads.contains(id)
    }

    /// Apply an upload result. Dropped if the draft moved on meanwhile or
    /// the block was deleted. Only what the upload produced is taken over,
    /// so caption or alt edits made during the upload survive.
    pub fn finish_upload(&mut self, ticket: UploadTicket, uploaded: BlockData) -> bool {
        self.uploads.remove(&ticket.block);
        if self.closed || ticket.generation != self.generation {
            warn!(block = %ticket.block, "upload result for a stale draft ignored");
            return false;
        }
        let Some(current) = self.blocks.get(&ticket.block).map(|b| b.data.clone()) else {
            return false;
        };
        let merged = merge_upload(current, uploaded, ticket.baseline);
        self.update_data(&ticket.block, merged)
    }

    /// Reset an image block to an empty payload. False for other types.
    pub fn remove_image(&mut self, id: &BlockId) -> bool {
        let Some(BlockData::Image(mut image)) = self.blocks.get(id).map(|b| b.data.clone()) else {
            return false;
        };
        image.clear();
        self.update_data(id, BlockData::Image(image))
    }

    /// Release an upload slot without applying anything (the upload failed).
    pub fn abandon_upload(&mut self, ticket: UploadTicket) {
        self.uploads.remove(&ticket.block);
    }

    pub fn begin_save(&mut self) -> Result<SaveTicket, SaveError> {
        if self.closed {
            return Err(SaveError::Discarded);
        }
        if self.saving {
            return Err(SaveError::InProgress);
        }
        self.saving = true;
        Ok(SaveTicket {
            plan: reconcile::diff(self.container, &self.server_ids, self.blocks.blocks()),
            generation: self.generation,
            revision: self.revision,
        })
    }

    pub fn finish_save(&mut self, outcome: SaveOutcome) -> Result<ApplyReport, SaveError> {
        if self.closed || outcome.generation != self.generation {
            warn!(container = %self.container, "save result for a stale draft ignored");
            return Err(SaveError::Discarded);
        }
        self.saving = false;
        let untouched = outcome.revision == self.revision;

        match outcome.result {
            Ok((report, elements)) if untouched => {
                self.server_ids = elements.iter().map(|e| e.id).collect();
                self.blocks = BlockSequence::from_elements(elements);
                self.dirty = false;
                info!(container = %self.container, "saved and reloaded");
                Ok(report)
            }
            Ok((report, elements)) => {
                // Edited while saving: keep local edits, adopt the ids.
                self.adopt_created(&report);
                self.server_ids = elements.iter().map(|e| e.id).collect();
                info!(container = %self.container, "saved; local edits made meanwhile are kept");
                Ok(report)
            }
            Err(SaveError::Reconcile(err)) => {
                self.absorb_partial(&err.applied);
                Err(SaveError::Reconcile(err))
            }
            Err(SaveError::Reload { applied, source }) => {
                self.absorb_partial(&applied);
                self.dirty = !untouched;
                Err(SaveError::Reload { applied, source })
            }
            Err(other) => Err(other),
        }
    }

    fn adopt_created(&mut self, report: &ApplyReport) {
        for (local, id) in &report.created {
            self.blocks.replace_id(&BlockId::Local(local.clone()), BlockId::Persisted(*id));
        }
    }

    /// Fold server-side effects of a partial run into the snapshot so a
    /// retry neither re-creates nor re-deletes.
    fn absorb_partial(&mut self, applied: &ApplyReport) {
        self.adopt_created(applied);
        for id in applied.deleted.iter().chain(&applied.already_gone) {
            self.server_ids.remove(id);
        }
        self.server_ids.extend(applied.created.iter().map(|(_, id)| *id));
    }

    /// Save: diff, apply, then reload from the server.
    pub async fn save(&mut self, service: &dyn PortalService) -> Result<ApplyReport, SaveError> {
        let ticket = self.begin_save()?;
        let outcome = run_save(&ticket, service).await;
        self.finish_save(outcome)
    }

    /// Replace local state with the server's. Pending async results are
    /// invalidated.
    pub async fn reload(&mut self, service: &dyn PortalService) -> Result<(), ApiError> {
        let elements = service.list_elements(self.container).await?;
        self.server_ids = elements.iter().map(|e| e.id).collect();
        self.blocks = BlockSequence::from_elements(elements);
        self.dirty = false;
        self.saving = false;
        self.generation += 1;
        Ok(())
    }

    /// The editor went away; later async results must not land.
    pub fn close(&mut self) {
        self.closed = true;
        self.generation += 1;
        self.uploads.clear();
    }
}

fn merge_upload(current: BlockData, uploaded: BlockData, baseline: usize) -> BlockData {
    match (current, uploaded) {
        (BlockData::Image(mut image), BlockData::Image(new)) => {
            image.url = new.url;
            image.filename = new.filename;
            BlockData::Image(image)
        }
        (BlockData::Gallery(mut gallery), BlockData::Gallery(new)) => {
            gallery.images.extend(new.images.into_iter().skip(baseline));
            BlockData::Gallery(gallery)
        }
        (_, uploaded) => uploaded,
    }
}

/// Run a save without holding the draft, so other edits can continue.
#[instrument(skip_all, fields(container = %ticket.plan.container))]
pub async fn run_save(ticket: &SaveTicket, service: &dyn PortalService) -> SaveOutcome {
    let result = match reconcile::apply(&ticket.plan, service).await {
        Ok(report) => match service.list_elements(ticket.plan.container).await {
            Ok(elements) => Ok((report, elements)),
            Err(source) => Err(SaveError::Reload {
                applied: report,
                source,
            }),
        },
        Err(err) => Err(SaveError::Reconcile(err)),
    };
    SaveOutcome {
        generation: ticket.generation,
        revision: ticket.revision,
        result,
    }
}
