use reqwest::StatusCode;
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use portal_blocks::api::{ApiError, PortalService};
use portal_blocks::container::{run_save, ContainerDraft, SaveError};
use portal_blocks::model::{Block, BlockData, BlockId, BlockType, ContainerRef, ElementBody, ElementRecord, TextData};
use portal_blocks::reconcile::{self, ElementOp};

const SECTION: ContainerRef = ContainerRef::Section(5);

#[derive(Debug, Clone, PartialEq)]
enum Call {
    List,
    Create { order: usize, section: Option<i64> },
    Update { id: i64, order: usize },
    Delete { id: i64 },
}

/// In-memory backend that records every call. Mutating calls first pop a
/// scripted result; an `Err` is returned without touching server state.
#[derive(Clone, Default)]
struct RecordingPortal {
    elements: Arc<Mutex<Vec<ElementRecord>>>,
    script: Arc<Mutex<VecDeque<Result<(), ApiError>>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    next_id: Arc<Mutex<i64>>,
}

impl RecordingPortal {
    fn with_elements(elements: Vec<ElementRecord>) -> Self {
        Self {
            elements: Arc::new(Mutex::new(elements)),
            next_id: Arc::new(Mutex::new(100)),
            ..Default::default()
        }
    }

    async fn script(&self, results: Vec<Result<(), ApiError>>) {
        self.script.lock().await.extend(results);
    }

    async fn scripted(&self) -> Result<(), ApiError> {
        self.script.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    async fn server_ids(&self) -> Vec<i64> {
        let mut elements = self.elements.lock().await.clone();
        elements.sort_by_key(|e| e.order);
        elements.iter().map(|e| e.id).collect()
    }
}

#[async_trait::async_trait]
impl PortalService for RecordingPortal {
    async fn list_elements(&self, _container: ContainerRef) -> Result<Vec<ElementRecord>, ApiError> {
        self.calls.lock().await.push(Call::List);
        let mut elements = self.elements.lock().await.clone();
        elements.sort_by_key(|e| e.order);
        Ok(elements)
    }

    async fn create_element(&self, body: &ElementBody) -> Result<i64, ApiError> {
        self.calls.lock().await.push(Call::Create {
            order: body.order,
            section: body.section,
        });
        self.scripted().await?;
        let mut next = self.next_id.lock().await;
        let id = *next;
        *next += 1;
        self.elements.lock().await.push(record(id, body));
        Ok(id)
    }

    async fn update_element(&self, id: i64, body: &ElementBody) -> Result<(), ApiError> {
        self.calls.lock().await.push(Call::Update { id, order: body.order });
        self.scripted().await?;
        let mut elements = self.elements.lock().await;
        match elements.iter_mut().find(|e| e.id == id) {
            Some(slot) => {
                *slot = record(id, body);
                Ok(())
            }
            None => Err(ApiError::NotFound(format!("elements/{id}/"))),
        }
    }

    async fn delete_element(&self, id: i64) -> Result<(), ApiError> {
        self.calls.lock().await.push(Call::Delete { id });
        self.scripted().await?;
        let mut elements = self.elements.lock().await;
        let before = elements.len();
        elements.retain(|e| e.id != id);
        if elements.len() == before {
            return Err(ApiError::NotFound(format!("elements/{id}/")));
        }
        Ok(())
    }
}

fn record(id: i64, body: &ElementBody) -> ElementRecord {
    ElementRecord {
        id,
        content_type: body.content_type.clone(),
        title: body.title.clone(),
        data: body.data.clone(),
        order: body.order as i64,
        is_published: Some(body.is_published),
        publish_datetime: body.publish_datetime,
    }
}

fn text_element(id: i64, order: i64) -> ElementRecord {
    ElementRecord {
        id,
        content_type: "text".into(),
        title: String::new(),
        data: json!({"html": format!("<p>{id}</p>")}),
        order,
        is_published: Some(true),
        publish_datetime: None,
    }
}

fn server_error() -> ApiError {
    ApiError::Status {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "boom".into(),
    }
}

fn yes(_: &str) -> bool {
    true
}

async fn loaded(ids: &[i64]) -> (RecordingPortal, ContainerDraft) {
    let elements = ids.iter().enumerate().map(|(i, id)| text_element(*id, i as i64)).collect();
    let portal = RecordingPortal::with_elements(elements);
    let draft = ContainerDraft::load(SECTION, &portal).await.unwrap();
    portal.calls.lock().await.clear();
    (portal, draft)
}

#[tokio::test]
async fn test_save_issues_expected_calls_then_reloads() {
    let (portal, mut draft) = loaded(&[1, 2, 3]).await;

    draft.delete_block(&BlockId::from(3), &yes).unwrap();
    let local = draft.add_block(BlockType::Text);
    draft.move_block(0, 2).unwrap();
    let ids: Vec<BlockId> = draft.blocks().iter().map(|b| b.id.clone()).collect();
    assert_eq!(ids, vec![BlockId::from(2), local, BlockId::from(1)]);
    assert!(draft.is_dirty());

    let report = draft.save(&portal).await.unwrap();

    assert_eq!(
        portal.calls().await,
        vec![
            Call::Delete { id: 3 },
            Call::Update { id: 2, order: 0 },
            Call::Create { order: 1, section: Some(5) },
            Call::Update { id: 1, order: 2 },
            Call::List,
        ]
    );
    assert_eq!(report.deleted, vec![3]);
    assert_eq!(report.updated, vec![2, 1]);
    assert_eq!(report.created.len(), 1);

    // Local state is now exactly what the server holds.
    assert!(!draft.is_dirty());
    let reloaded: Vec<BlockId> = draft.blocks().iter().map(|b| b.id.clone()).collect();
    assert_eq!(reloaded, vec![BlockId::from(2), BlockId::from(100), BlockId::from(1)]);
    assert_eq!(portal.server_ids().await, vec![2, 100, 1]);
    assert_eq!(draft.server_ids(), &[1, 2, 100].into_iter().collect::<BTreeSet<_>>());
}

#[tokio::test]
async fn test_apply_stops_at_first_failure() {
    let portal = RecordingPortal::with_elements(vec![text_element(1, 0), text_element(2, 1)]);
    portal.script(vec![Ok(()), Err(server_error())]).await;

    let server: BTreeSet<i64> = [1, 2, 9].into_iter().collect();
    let mut block = Block::new(BlockType::Text, 0);
    block.id = BlockId::from(1);
    let mut other = Block::new(BlockType::Text, 1);
    other.id = BlockId::from(2);
    let plan = reconcile::diff(SECTION, &server, &[block, other]);

    let err = reconcile::apply(&plan, &portal).await.unwrap_err();

    assert!(matches!(err.failed, ElementOp::Update { id: 1, order: 0, .. }));
    assert!(err.applied.deleted.is_empty());
    assert_eq!(err.applied.already_gone, vec![9]);
    assert!(err.to_string().starts_with("update(1, order=0) failed"));
    // update(2) is never attempted.
    assert_eq!(portal.calls().await, vec![Call::Delete { id: 9 }, Call::Update { id: 1, order: 0 }]);
}

#[tokio::test]
async fn test_not_found_is_tolerated_for_delete_and_update() {
    let portal = RecordingPortal::with_elements(vec![text_element(1, 0)]);
    let server: BTreeSet<i64> = [1, 7].into_iter().collect();

    let mut kept = Block::new(BlockType::Text, 0);
    kept.id = BlockId::from(1);
    let mut vanished = Block::new(BlockType::Text, 1);
    vanished.id = BlockId::from(8);
    let plan = reconcile::diff(SECTION, &server, &[kept, vanished]);

    let report = reconcile::apply(&plan, &portal).await.unwrap();

    assert_eq!(report.already_gone, vec![7]);
    assert_eq!(report.updated, vec![1]);
    assert_eq!(report.missing, vec![8]);
    assert_eq!(portal.calls().await.len(), 3);
}

#[tokio::test]
async fn test_retry_after_partial_failure_does_not_duplicate() {
    let (portal, mut draft) = loaded(&[1, 2, 3]).await;

    draft.delete_block(&BlockId::from(1), &yes).unwrap();
    draft.delete_block(&BlockId::from(3), &yes).unwrap();
    let first = draft.add_block(BlockType::Text);
    let second = draft.add_block(BlockType::Link);

    // delete(1), delete(3), update(2), create(first) succeed; create(second) fails.
    portal
        .script(vec![Ok(()), Ok(()), Ok(()), Ok(()), Err(server_error())])
        .await;
    let err = draft.save(&portal).await.unwrap_err();
    assert!(matches!(err, SaveError::Reconcile(ref e) if e.applied.created.len() == 1));

    assert!(draft.is_dirty());
    assert!(!draft.is_saving());
    let ids: Vec<BlockId> = draft.blocks().iter().map(|b| b.id.clone()).collect();
    assert_eq!(ids, vec![BlockId::from(2), BlockId::from(100), second.clone()]);
    assert!(!ids.contains(&first));

    portal.calls.lock().await.clear();
    draft.save(&portal).await.unwrap();

    assert_eq!(
        portal.calls().await,
        vec![
            Call::Update { id: 2, order: 0 },
            Call::Update { id: 100, order: 1 },
            Call::Create { order: 2, section: Some(5) },
            Call::List,
        ]
    );
    assert_eq!(portal.server_ids().await, vec![2, 100, 101]);
    assert!(!draft.is_dirty());
}

#[tokio::test]
async fn test_edits_during_save_are_kept() {
    let (portal, mut draft) = loaded(&[1]).await;
    let created = draft.add_block(BlockType::Text);

    let ticket = draft.begin_save().unwrap();
    assert!(draft.is_saving());

    // The user keeps typing while the save runs.
    assert!(draft.update_data(
        &BlockId::from(1),
        BlockData::Text(TextData {
            html: "<p>edited meanwhile</p>".into(),
            json: None,
        }),
    ));

    let outcome = run_save(&ticket, &portal).await;
    let report = draft.finish_save(outcome).unwrap();

    assert_eq!(report.created, vec![(created.to_string(), 100)]);
    assert!(draft.is_dirty());
    assert!(!draft.is_saving());
    let ids: Vec<BlockId> = draft.blocks().iter().map(|b| b.id.clone()).collect();
    assert_eq!(ids, vec![BlockId::from(1), BlockId::from(100)]);
    assert!(matches!(&draft.blocks()[0].data, BlockData::Text(t) if t.html == "<p>edited meanwhile</p>"));

    // Next save only updates; nothing gets created twice.
    portal.calls.lock().await.clear();
    draft.save(&portal).await.unwrap();
    assert!(portal.calls().await.iter().all(|c| !matches!(c, Call::Create { .. })));
}

#[tokio::test]
async fn test_result_after_close_is_discarded() {
    let (portal, mut draft) = loaded(&[1]).await;
    draft.add_block(BlockType::Video);

    let ticket = draft.begin_save().unwrap();
    draft.close();
    let outcome = run_save(&ticket, &portal).await;

    assert!(matches!(draft.finish_save(outcome), Err(SaveError::Discarded)));
    assert_eq!(draft.blocks().len(), 2);
    assert!(matches!(draft.begin_save(), Err(SaveError::Discarded)));
}

#[tokio::test]
async fn test_reload_failure_keeps_adopted_ids() {
    #[derive(Clone)]
    struct ListFailsAfterLoad {
        inner: RecordingPortal,
        lists: Arc<Mutex<u32>>,
    }

    #[async_trait::async_trait]
    impl PortalService for ListFailsAfterLoad {
        async fn list_elements(&self, container: ContainerRef) -> Result<Vec<ElementRecord>, ApiError> {
            let mut lists = self.lists.lock().await;
            *lists += 1;
            if *lists > 1 {
                return Err(server_error());
            }
            self.inner.list_elements(container).await
        }
        async fn create_element(&self, body: &ElementBody) -> Result<i64, ApiError> {
            self.inner.create_element(body).await
        }
        async fn update_element(&self, id: i64, body: &ElementBody) -> Result<(), ApiError> {
            self.inner.update_element(id, body).await
        }
        async fn delete_element(&self, id: i64) -> Result<(), ApiError> {
            self.inner.delete_element(id).await
        }
    }

    let portal = ListFailsAfterLoad {
        inner: RecordingPortal::with_elements(vec![text_element(1, 0)]),
        lists: Arc::new(Mutex::new(0)),
    };
    let mut draft = ContainerDraft::load(SECTION, &portal).await.unwrap();
    draft.add_block(BlockType::Image);

    let err = draft.save(&portal).await.unwrap_err();
    assert!(matches!(err, SaveError::Reload { .. }));
    assert_eq!(draft.blocks()[1].id, BlockId::from(100));
    assert!(draft.server_ids().contains(&100));
}
