use approval_engine::*;
use chrono::Utc;
use std::sync::Arc;
use tempfile::TempDir;

fn engine_on(store: Arc<FileStore>) -> WorkflowEngine {
    let resolver = Arc::new(DirectoryApproverResolver::new(Arc::new(StaticRoleDirectory::default())));
    WorkflowEngine::new(store.clone(), store, resolver)
}

async fn seed_sequential(store: Arc<FileStore>) -> WorkflowDefinition {
    let registry = DefinitionRegistry::new(store);
    let definition = registry
        .create(NewWorkflowDefinition::new("Invoice sign-off", EntityType::Invoice, WorkflowType::Sequential).as_default())
        .await
        .unwrap();
    registry.add_step(definition.id, NewWorkflowStep::user(1, "alice@x")).await.unwrap();
    registry.add_step(definition.id, NewWorkflowStep::user(2, "bob@x")).await.unwrap();
    definition
}

#[tokio::test]
async fn test_workflow_survives_restart() {
    let temp_dir = TempDir::new().unwrap();

    let instance_id = {
        let store = Arc::new(FileStore::new(temp_dir.path()).unwrap());
        seed_sequential(store.clone()).await;
        let engine = engine_on(store);

        let instance = engine.start_workflow(EntityType::Invoice, "42", "carol@x", None, None).await.unwrap();
        let alice = engine.pending_approvals_for_user("alice@x").await.unwrap();
        assert_eq!(alice.len(), 1);
        engine.approve(alice[0].id, "alice@x", None).await.unwrap();
        instance.id
    };

    // Reopen the same directory as a fresh process would
    let store = Arc::new(FileStore::new(temp_dir.path()).unwrap());
    let engine = engine_on(store);

    let instance = engine.get_instance(instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::InProgress);
    assert_eq!(instance.current_step, 2);
    assert_eq!(engine.list_active().await.unwrap().len(), 1);

    let bob = engine.pending_approvals_for_user("bob@x").await.unwrap();
    assert_eq!(bob.len(), 1);
    let instance = engine.approve(bob[0].id, "bob@x", None).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Approved);

    let statuses: Vec<RequestStatus> = engine
        .list_requests(instance_id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(statuses, vec![RequestStatus::Approved, RequestStatus::Approved]);

    let history = engine.history(instance_id).await.unwrap();
    assert_eq!(history.first().map(|e| e.action), Some(HistoryAction::Initiated));
    assert_eq!(history.len(), 3);
    assert_eq!(history.last().map(|e| e.action), Some(HistoryAction::Approved));
    assert_eq!(history.last().and_then(|e| e.comment.as_deref()), Some("workflow approved"));
}

#[tokio::test]
async fn test_request_directory_reflects_status() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(temp_dir.path()).unwrap());
    seed_sequential(store.clone()).await;
    let engine = engine_on(store.clone());

    let instance = engine.start_workflow(EntityType::Invoice, "43", "carol@x", None, None).await.unwrap();
    let request = engine.list_requests(instance.id).await.unwrap().remove(0);

    let pending_path = store.layout().request_file(RequestStatus::Pending, &request.id);
    assert!(pending_path.exists());

    engine.reject(request.id, "alice@x", "duplicate invoice").await.unwrap();

    assert!(!pending_path.exists());
    assert!(store.layout().request_file(RequestStatus::Rejected, &request.id).exists());
    assert_eq!(
        engine.get_instance(instance.id).await.unwrap().status,
        InstanceStatus::Rejected
    );
}

#[tokio::test]
async fn test_decide_request_is_compare_and_swap() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(temp_dir.path()).unwrap());
    seed_sequential(store.clone()).await;
    let engine = engine_on(store.clone());

    let instance = engine.start_workflow(EntityType::Invoice, "44", "carol@x", None, None).await.unwrap();
    let request = engine.list_requests(instance.id).await.unwrap().remove(0);

    let approve = RequestDecision {
        status: RequestStatus::Approved,
        actor: "alice@x".to_string(),
        comment: None,
        decided_at: Utc::now(),
    };
    let reject = RequestDecision {
        status: RequestStatus::Rejected,
        actor: "mallory@x".to_string(),
        comment: Some("late".to_string()),
        decided_at: Utc::now(),
    };

    let (first, second) = tokio::join!(
        store.decide_request(request.id, &approve),
        store.decide_request(request.id, &reject)
    );
    let winners = [first.unwrap(), second.unwrap()].iter().filter(|won| **won).count();
    assert_eq!(winners, 1);

    let stored = store.get_request(request.id).await.unwrap().unwrap();
    assert_ne!(stored.status, RequestStatus::Pending);

    assert!(matches!(
        store.decide_request(RequestId::new(), &approve).await,
        Err(EngineError::RequestNotFound(_))
    ));
}

#[tokio::test]
async fn test_default_flag_is_exclusive_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(temp_dir.path()).unwrap());
    let registry = DefinitionRegistry::new(store.clone());

    let first = registry
        .create(NewWorkflowDefinition::new("A", EntityType::Proposal, WorkflowType::Sequential).as_default())
        .await
        .unwrap();
    let second = registry
        .create(NewWorkflowDefinition::new("B", EntityType::Proposal, WorkflowType::AnyOne).as_default())
        .await
        .unwrap();
    registry
        .create(NewWorkflowDefinition::new("C", EntityType::Invoice, WorkflowType::Parallel).as_default())
        .await
        .unwrap();

    let defaults: Vec<_> = registry
        .list(Some(EntityType::Proposal))
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.is_default)
        .collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, second.id);
    assert!(!registry.get(first.id).await.unwrap().is_default);
    assert_eq!(registry.get_default(EntityType::Invoice).await.unwrap().name, "C");
}
