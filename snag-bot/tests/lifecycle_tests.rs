//! Defect store: lifecycle guards, audit trail, listings, reminder claims

mod helpers;

use chrono::Duration;
use helpers::*;
use snag_bot::db::{DefectQuery, DefectStore, ListOrder};
use snag_common::db::{ActionKind, ActionPayload, DefectStatus, EditableField, PhotoRole};
use snag_common::{time, Error, FailureReason};

async fn store() -> DefectStore {
    DefectStore::new(memory_pool().await)
}

#[tokio::test]
async fn test_human_ids_are_sequential() {
    let store = store().await;
    let first = create_sample(&store, "100").await;
    let second = create_sample(&store, "100").await;
    assert_eq!(first.human_id, "D-000001");
    assert_eq!(second.human_id, "D-000002");
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_fixed_requires_after_photo() {
    let store = store().await;
    let defect = create_sample(&store, "100").await;

    let err = store
        .transition(&defect.human_id, DefectStatus::Fixed, "100")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some(FailureReason::NoAfterPhotos));

    let unchanged = store.get_by_human_id(&defect.human_id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, DefectStatus::Discovered);
    assert!(unchanged.closed_at.is_none());
    let actions = store.list_actions(&defect.id).await.unwrap();
    assert!(actions.iter().all(|a| a.kind() != ActionKind::StatusChange));
}

#[tokio::test]
async fn test_fixed_with_after_photo_closes() {
    let store = store().await;
    let defect = create_sample(&store, "100").await;
    store
        .add_photos(&defect.human_id, PhotoRole::After, &["after-1".to_string()], "200")
        .await
        .unwrap();

    let transition = store
        .transition(&defect.human_id, DefectStatus::Fixed, "200")
        .await
        .unwrap();
    assert_eq!(transition.from, DefectStatus::Discovered);
    assert_eq!(transition.defect.status, DefectStatus::Fixed);

    let closed = store.get_by_human_id(&defect.human_id).await.unwrap().unwrap();
    assert_eq!(closed.status, DefectStatus::Fixed);
    assert!(closed.closed_at.is_some());

    let changes: Vec<ActionPayload> = store
        .list_actions(&defect.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.kind() == ActionKind::StatusChange)
        .map(|a| a.payload)
        .collect();
    assert_eq!(
        changes,
        vec![ActionPayload::StatusChange {
            from: DefectStatus::Discovered,
            to: DefectStatus::Fixed,
        }]
    );

    let counts = store.photo_counts(&defect.id).await.unwrap();
    assert_eq!(counts.initial, 1);
    assert_eq!(counts.after, 1);
}

#[tokio::test]
async fn test_fixed_is_terminal() {
    let store = store().await;
    let defect = create_sample(&store, "100").await;
    store
        .add_photos(&defect.human_id, PhotoRole::After, &["after-1".to_string()], "100")
        .await
        .unwrap();
    store
        .transition(&defect.human_id, DefectStatus::Fixed, "100")
        .await
        .unwrap();

    for to in [DefectStatus::Discovered, DefectStatus::OnControl, DefectStatus::Fixed] {
        let err = store.transition(&defect.human_id, to, "100").await.unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::InvalidTransition));
    }
}

#[tokio::test]
async fn test_on_control_returns_to_discovered() {
    let store = store().await;
    let defect = create_sample(&store, "100").await;
    store
        .transition(&defect.human_id, DefectStatus::OnControl, "100")
        .await
        .unwrap();
    let back = store
        .transition(&defect.human_id, DefectStatus::Discovered, "100")
        .await
        .unwrap();
    assert_eq!(back.from, DefectStatus::OnControl);
    assert!(back.defect.closed_at.is_none());
}

#[tokio::test]
async fn test_unknown_defect_is_not_found() {
    let store = store().await;

    let err = store
        .transition("D-999999", DefectStatus::OnControl, "100")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Rejected(FailureReason::NotFound)));

    let err = store.assign("D-999999", "@alice", "100").await.unwrap_err();
    assert_eq!(err.reason(), Some(FailureReason::NotFound));
    assert!(store.get_by_human_id("D-999999").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_field_and_unassign_are_audited() {
    let store = store().await;
    let defect = create_sample(&store, "100").await;

    let updated = store
        .update_field(&defect.human_id, EditableField::Floor, " 7 ", "100")
        .await
        .unwrap();
    assert_eq!(updated.floor.as_deref(), Some("7"));

    let err = store
        .update_field(&defect.human_id, EditableField::Object, "  ", "100")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    store.assign(&defect.human_id, "@alice", "100").await.unwrap();
    let cleared = store.unassign(&defect.human_id, "100").await.unwrap();
    assert!(cleared.assigned_to.is_none());

    let payloads: Vec<ActionPayload> = store
        .list_actions(&defect.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.payload)
        .skip(2)
        .collect();
    assert_eq!(
        payloads,
        vec![
            ActionPayload::Update {
                field: EditableField::Floor,
                from: Some("3".to_string()),
                to: "7".to_string(),
            },
            ActionPayload::Assign {
                to: "@alice".to_string(),
            },
            ActionPayload::AssignClear {
                from: Some("@alice".to_string()),
            },
        ]
    );
}

#[tokio::test]
async fn test_list_filters_order_and_total() {
    let store = store().await;
    let now = time::now();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(create_sample(&store, "100").await.human_id);
    }
    // D-1 due in 3 days, D-2 undated, D-3 due tomorrow, D-4 someone else's
    for id in &ids[..3] {
        store.assign(id, "200", "100").await.unwrap();
        store.transition(id, DefectStatus::OnControl, "100").await.unwrap();
    }
    store.assign(&ids[3], "300", "100").await.unwrap();
    store.set_due_date(&ids[0], now + Duration::days(3), "100").await.unwrap();
    store.set_due_date(&ids[2], now + Duration::days(1), "100").await.unwrap();

    let page = store
        .list_defects(&DefectQuery {
            assignee: Some("200".to_string()),
            statuses: vec![DefectStatus::OnControl],
            order: ListOrder::DueAsc,
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    let listed: Vec<&str> = page.rows.iter().map(|d| d.human_id.as_str()).collect();
    assert_eq!(listed, vec!["D-000003", "D-000001"]);

    // Undated rows sort last
    let rest = store
        .list_defects(&DefectQuery {
            assignee: Some("200".to_string()),
            limit: 2,
            offset: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rest.rows.len(), 1);
    assert_eq!(rest.rows[0].human_id, "D-000002");

    let window = store
        .list_defects(&DefectQuery {
            due_from: Some(now + Duration::days(2)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(window.total, 1);
    assert_eq!(window.rows[0].human_id, "D-000001");
}

#[tokio::test]
async fn test_claim_overdue_only_once() {
    let store = store().await;
    let defect = create_sample(&store, "100").await;
    let now = time::now();
    store
        .set_due_date(&defect.human_id, now - Duration::hours(2), "100")
        .await
        .unwrap();
    let cooldown = Duration::hours(24);
    let recipients = vec!["100".to_string()];

    let candidates = store.overdue_candidates(now, cooldown, 10).await.unwrap();
    assert_eq!(candidates.len(), 1);

    assert!(store
        .claim_overdue(&defect.id, now, cooldown, &recipients, "system")
        .await
        .unwrap());
    assert!(!store
        .claim_overdue(&defect.id, now, cooldown, &recipients, "system")
        .await
        .unwrap());
    assert!(store.overdue_candidates(now, cooldown, 10).await.unwrap().is_empty());

    let reminded = store.get_by_human_id(&defect.human_id).await.unwrap().unwrap();
    // Stored at millisecond precision
    assert_eq!(reminded.last_reminder_at.map(|t| time::to_db(&t)), Some(time::to_db(&now)));
    let notices = store
        .list_actions(&defect.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.kind() == ActionKind::NotifyOverdue)
        .count();
    assert_eq!(notices, 1);
}
