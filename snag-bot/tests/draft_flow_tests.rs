//! Draft capture flow: photo bursts, step prompts, preview, save

mod helpers;

use helpers::*;
use snag_bot::db::DefectStore;
use snag_bot::ephemeral::SqliteEphemeralStore;
use snag_bot::flows::draft::DraftStep;
use snag_bot::inbound::{ButtonAction, InboundEvent};
use snag_bot::messaging::MessageKind;
use snag_bot::{Engine, Handled};
use snag_common::config::TomlConfig;
use snag_common::db::{init_database, ActionKind, Category, DefectStatus, PhotoRole, Severity};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ACTOR: &str = "100";

async fn text(engine: &Arc<Engine>, body: &str) -> Handled {
    engine.handle(InboundEvent::text(ACTOR, body)).await.unwrap()
}

async fn press(engine: &Arc<Engine>, callback_id: &str, action: ButtonAction) -> Handled {
    engine
        .handle(InboundEvent::button(ACTOR, callback_id, &action))
        .await
        .unwrap()
}

/// Send one photo and wait for the object question
async fn photo_until_object_asked(t: &TestEngine, photo_ref: &str) {
    t.engine
        .handle(InboundEvent::photo(ACTOR, photo_ref, None))
        .await
        .unwrap();
    let messenger = t.messenger.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let messenger = messenger.clone();
            async move { messenger.count(&MessageKind::Ask(DraftStep::Object)).await >= 1 }
        })
        .await,
        "object was never asked"
    );
}

/// Walk a fresh draft all the way to the preview
async fn fill_to_preview(t: &TestEngine) {
    photo_until_object_asked(t, "photo-1").await;
    assert_eq!(text(&t.engine, "Block A, room 12").await, Handled::Consumed);
    assert_eq!(text(&t.engine, "3").await, Handled::Consumed);
    press(&t.engine, "cb-cat", ButtonAction::Category(Category::Plumbing)).await;
    press(&t.engine, "cb-sev", ButtonAction::Severity(Severity::Critical)).await;
    text(&t.engine, "Leaking pipe").await;
    assert_eq!(t.messenger.count(&MessageKind::Preview).await, 1);
}

#[tokio::test]
async fn test_album_produces_single_object_prompt() {
    // Production timings: 2.5s album delay and quiet window
    let t = engine_with(&TomlConfig::default()).await;

    for (i, photo) in ["a1", "a2", "a3"].iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        t.engine
            .handle(InboundEvent::photo(ACTOR, photo, Some("album-1")))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(t.messenger.count(&MessageKind::Ask(DraftStep::Object)).await, 0);

    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(t.messenger.count(&MessageKind::Ask(DraftStep::Object)).await, 1);

    let draft = t.engine.load_draft(ACTOR).await.unwrap().unwrap();
    assert_eq!(draft.step, DraftStep::Object);
    assert_eq!(draft.photo_refs(), vec!["a1", "a2", "a3"]);
}

#[tokio::test]
async fn test_settle_waits_for_pending_burst() {
    let t = fast_engine().await;
    t.engine
        .handle(InboundEvent::photo(ACTOR, "p1", Some("album-1")))
        .await
        .unwrap();
    assert!(!t.engine.is_idle());

    assert!(t.engine.settle(Duration::from_secs(2)).await);
    assert_eq!(t.messenger.count(&MessageKind::Ask(DraftStep::Object)).await, 1);
    assert!(t.engine.is_idle());
}

#[tokio::test]
async fn test_single_photos_extend_the_burst() {
    let t = fast_engine().await;

    for photo in ["s1", "s2", "s3"] {
        t.engine
            .handle(InboundEvent::photo(ACTOR, photo, None))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(t.messenger.count(&MessageKind::Ask(DraftStep::Object)).await, 1);
    let draft = t.engine.load_draft(ACTOR).await.unwrap().unwrap();
    assert_eq!(draft.photos.len(), 3);
}

#[tokio::test]
async fn test_empty_floor_reprompts() {
    let t = fast_engine().await;
    photo_until_object_asked(&t, "photo-1").await;
    text(&t.engine, "Block A").await;

    assert_eq!(text(&t.engine, "   ").await, Handled::Consumed);

    assert_eq!(t.messenger.count(&MessageKind::Reprompt(DraftStep::Floor)).await, 1);
    let draft = t.engine.load_draft(ACTOR).await.unwrap().unwrap();
    assert_eq!(draft.step, DraftStep::Floor);
    assert!(draft.floor.is_none());
}

#[tokio::test]
async fn test_save_creates_defect_with_audit() {
    let t = fast_engine().await;
    let mut events = t.engine.subscribe();
    fill_to_preview(&t).await;

    let preview = t.messenger.last_of(&MessageKind::Preview).await.unwrap();
    assert!(preview.actions().contains(&ButtonAction::Save));
    assert_eq!(preview.photos, vec!["photo-1"]);

    assert_eq!(press(&t.engine, "cb-save", ButtonAction::Save).await, Handled::Consumed);

    let saved = t.messenger.last_of(&MessageKind::DefectSaved).await.unwrap();
    assert!(saved.text.contains("D-000001"));
    assert!(t.engine.load_draft(ACTOR).await.unwrap().is_none());

    let defect = t.store.get_by_human_id("D-000001").await.unwrap().unwrap();
    assert_eq!(defect.status, DefectStatus::Discovered);
    assert_eq!(defect.object, "Block A, room 12");
    assert_eq!(defect.floor.as_deref(), Some("3"));
    assert_eq!(defect.category, Category::Plumbing);
    assert_eq!(defect.severity, Severity::Critical);
    assert_eq!(defect.created_by, ACTOR);

    let photos = t.store.list_photos(&defect.id, None).await.unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].role, PhotoRole::Initial);

    let kinds: Vec<ActionKind> = t
        .store
        .list_actions(&defect.id)
        .await
        .unwrap()
        .iter()
        .map(|a| a.kind())
        .collect();
    assert_eq!(kinds, vec![ActionKind::AddPhoto, ActionKind::Create]);

    let event = events.try_recv().unwrap();
    assert!(matches!(
        event,
        snag_common::events::SnagEvent::DefectCreated { ref human_id, photo_count: 1, .. } if human_id == "D-000001"
    ));
}

#[tokio::test]
async fn test_edit_from_preview_returns_to_preview() {
    let t = fast_engine().await;
    fill_to_preview(&t).await;

    press(&t.engine, "cb-edit", ButtonAction::EditMenu).await;
    assert_eq!(t.messenger.count(&MessageKind::EditMenu).await, 1);

    press(&t.engine, "cb-edit-object", ButtonAction::EditStep(DraftStep::Object)).await;
    text(&t.engine, "Block B").await;

    assert_eq!(t.messenger.count(&MessageKind::Preview).await, 2);
    let draft = t.engine.load_draft(ACTOR).await.unwrap().unwrap();
    assert_eq!(draft.step, DraftStep::Preview);
    assert_eq!(draft.object.as_deref(), Some("Block B"));
    // Untouched fields survive the edit
    assert_eq!(draft.floor.as_deref(), Some("3"));
    assert_eq!(draft.description.as_deref(), Some("Leaking pipe"));
}

#[tokio::test]
async fn test_stale_selection_is_ignored() {
    let t = fast_engine().await;
    photo_until_object_asked(&t, "photo-1").await;

    let outcome = press(&t.engine, "cb-cat", ButtonAction::Category(Category::Electrical)).await;
    assert_eq!(outcome, Handled::Ignored);

    let draft = t.engine.load_draft(ACTOR).await.unwrap().unwrap();
    assert_eq!(draft.step, DraftStep::Object);
    assert!(draft.category.is_none());
}

#[tokio::test]
async fn test_cancel_stops_pending_timers() {
    let t = fast_engine().await;
    t.engine
        .handle(InboundEvent::photo(ACTOR, "photo-1", None))
        .await
        .unwrap();
    text(&t.engine, "/cancel").await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(t.messenger.count(&MessageKind::Ask(DraftStep::Object)).await, 0);
    assert_eq!(t.messenger.count(&MessageKind::DraftCancelled).await, 1);
    assert!(t.engine.load_draft(ACTOR).await.unwrap().is_none());

    // Next photo starts over
    photo_until_object_asked(&t, "photo-2").await;
    let draft = t.engine.load_draft(ACTOR).await.unwrap().unwrap();
    assert_eq!(draft.photo_refs(), vec!["photo-2"]);
}

#[tokio::test]
async fn test_duplicate_save_press_creates_one_defect() {
    let t = fast_engine().await;
    fill_to_preview(&t).await;

    assert_eq!(press(&t.engine, "cb-save", ButtonAction::Save).await, Handled::Consumed);
    assert_eq!(press(&t.engine, "cb-save", ButtonAction::Save).await, Handled::Duplicate);
    // A fresh press after the draft is gone has nothing to save
    assert_eq!(press(&t.engine, "cb-save-2", ButtonAction::Save).await, Handled::Ignored);

    assert!(t.store.get_by_human_id("D-000001").await.unwrap().is_some());
    assert!(t.store.get_by_human_id("D-000002").await.unwrap().is_none());
    assert_eq!(t.messenger.count(&MessageKind::DefectSaved).await, 1);
}

#[tokio::test]
async fn test_save_before_preview_is_rejected() {
    let t = fast_engine().await;
    photo_until_object_asked(&t, "photo-1").await;

    press(&t.engine, "cb-save", ButtonAction::Save).await;

    assert_eq!(
        t.messenger
            .count(&MessageKind::Rejected(snag_common::FailureReason::DraftIncomplete))
            .await,
        1
    );
    assert!(t.store.get_by_human_id("D-000001").await.unwrap().is_none());
}

#[tokio::test]
async fn test_draft_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("snag.db");
    let config = fast_config();

    {
        let pool = init_database(&db_path).await.unwrap();
        let messenger = Arc::new(RecordingMessenger::new());
        let engine = Engine::new(
            DefectStore::new(pool.clone()),
            Arc::new(SqliteEphemeralStore::new(pool.clone())),
            messenger.clone(),
            &config,
        );
        engine
            .handle(InboundEvent::photo(ACTOR, "photo-1", None))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        engine.handle(InboundEvent::text(ACTOR, "Block A")).await.unwrap();
        assert_eq!(messenger.count(&MessageKind::Ask(DraftStep::Floor)).await, 1);
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    let messenger = Arc::new(RecordingMessenger::new());
    let engine = Engine::new(
        DefectStore::new(pool.clone()),
        Arc::new(SqliteEphemeralStore::new(pool)),
        messenger.clone(),
        &config,
    );

    engine.handle(InboundEvent::text(ACTOR, "5")).await.unwrap();

    assert_eq!(messenger.count(&MessageKind::Ask(DraftStep::Category)).await, 1);
    let draft = engine.load_draft(ACTOR).await.unwrap().unwrap();
    assert_eq!(draft.object.as_deref(), Some("Block A"));
    assert_eq!(draft.floor.as_deref(), Some("5"));
    assert_eq!(draft.photo_refs(), vec!["photo-1"]);
}
