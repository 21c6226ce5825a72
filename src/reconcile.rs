//! Turning a local block list into create/update/delete calls.
//!
//! `diff` is pure: it compares the ids the server last reported with the
//! current list. `apply` walks the plan in order and stops at the first
//! failing call; calls that already went through stay applied.
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::api::{ApiError, PortalService};
use crate::model::{Block, BlockId, ContainerRef, ElementBody};

#[derive(Debug, Clone, PartialEq)]
pub enum ElementOp {
    Delete { id: i64 },
    Update { id: i64, order: usize, body: ElementBody },
    Create { local_id: String, order: usize, body: ElementBody },
}

impl fmt::Display for ElementOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementOp::Delete { id } => write!(f, "delete({id})"),
            ElementOp::Update { id, order, .. } => write!(f, "update({id}, order={order})"),
            ElementOp::Create { local_id, order, .. } => write!(f, "create({local_id}, order={order})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavePlan {
    pub container: ContainerRef,
    pub ops: Vec<ElementOp>,
}

impl SavePlan {
    pub fn deletes(&self) -> impl Iterator<Item = i64> + '_ {
        self.ops.iter().filter_map(|op| match op {
            ElementOp::Delete { id } => Some(*id),
            _ => None,
        })
    }

    pub fn updates(&self) -> impl Iterator<Item = (i64, usize)> + '_ {
        self.ops.iter().filter_map(|op| match op {
            ElementOp::Update { id, order, .. } => Some((*id, *order)),
            _ => None,
        })
    }

    pub fn creates(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.ops.iter().filter_map(|op| match op {
            ElementOp::Create { local_id, order, .. } => Some((local_id.as_str(), *order)),
            _ => None,
        })
    }
}

/// Deletes for every server id no longer in the list, then one update or
/// create per block in list order. `order` is the block's position now.
pub fn diff(container: ContainerRef, server_ids: &BTreeSet<i64>, local: &[Block]) -> SavePlan {
    let local_ids: BTreeSet<i64> = local.iter().filter_map(|b| b.id.persisted()).collect();

    let mut ops: Vec<ElementOp> = server_ids
        .difference(&local_ids)
        .map(|id| ElementOp::Delete { id: *id })
        .collect();

    for (order, block) in local.iter().enumerate() {
        let body = block.to_element_body(order);
        ops.push(match &block.id {
            BlockId::Persisted(id) => ElementOp::Update { id: *id, order, body },
            BlockId::Local(local_id) => ElementOp::Create {
                local_id: local_id.clone(),
                order,
                body: body.in_container(container),
            },
        });
    }

    SavePlan { container, ops }
}

/// What a (possibly partial) plan run did on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub deleted: Vec<i64>,
    /// Deletes answered with 404.
    pub already_gone: Vec<i64>,
    pub updated: Vec<i64>,
    /// Updates answered with 404.
    pub missing: Vec<i64>,
    /// Local placeholder id and the id the server assigned.
    pub created: Vec<(String, i64)>,
}

#[derive(Debug, Error)]
#[error("{failed} failed: {source}")]
pub struct ReconcileError {
    pub failed: ElementOp,
    /// Calls that succeeded before the failure.
    pub applied: ApplyReport,
    #[source]
    pub source: ApiError,
}

#[instrument(skip_all, fields(container = %plan.container, ops = plan.ops.len()))]
pub async fn apply(plan: &SavePlan, service: &dyn PortalService) -> Result<ApplyReport, ReconcileError> {
    let mut report = ApplyReport::default();

    for op in &plan.ops {
        let result = match op {
            ElementOp::Delete { id } => match service.delete_element(*id).await {
                Ok(()) => {
                    report.deleted.push(*id);
                    Ok(())
                }
                Err(err) if err.is_not_found() => {
                    info!(id, "element already gone");
                    report.already_gone.push(*id);
                    Ok(())
                }
                Err(err) => Err(err),
            },
            ElementOp::Update { id, body, .. } => match service.update_element(*id, body).await {
                Ok(()) => {
                    report.updated.push(*id);
                    Ok(())
                }
                Err(err) if err.is_not_found() => {
                    warn!(id, "element vanished before update");
                    report.missing.push(*id);
                    Ok(())
                }
                Err(err) => Err(err),
            },
            ElementOp::Create { local_id, body, .. } => match service.create_element(body).await {
                Ok(id) => {
                    report.created.push((local_id.clone(), id));
                    Ok(())
                }
                Err(err) => Err(err),
            },
        };

        if let Err(source) = result {
            warn!(op = %op, %source, "reconciliation stopped");
            return Err(ReconcileError {
                failed: op.clone(),
                applied: report,
                source,
            });
        }
    }

    info!(
        deleted = report.deleted.len(),
        updated = report.updated.len(),
        created = report.created.len(),
        "reconciliation applied"
    );
    Ok(report)
}
