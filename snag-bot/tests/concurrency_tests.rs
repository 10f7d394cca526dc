//! Concurrent store mutations on an on-disk database
//!
//! These run against `init_database`, so writers on different pool
//! connections really do contend for SQLite's write lock.

mod helpers;

use chrono::Duration;
use futures::future::join_all;
use helpers::*;
use snag_bot::db::DefectStore;
use snag_common::db::{ActionKind, DefectStatus};
use snag_common::{time, Error};
use tempfile::TempDir;

fn failures(results: Vec<Result<Result<bool, Error>, tokio::task::JoinError>>) -> Vec<String> {
    results
        .into_iter()
        .filter_map(|joined| match joined.unwrap() {
            Ok(true) => None,
            Ok(false) => Some("claim refused".to_string()),
            Err(e) => Some(e.to_string()),
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transitions_on_distinct_defects() {
    let dir = TempDir::new().unwrap();
    let store = DefectStore::new(file_pool(&dir).await);

    let mut ids = Vec::new();
    for _ in 0..40 {
        ids.push(create_sample(&store, "100").await.human_id);
    }

    let tasks = ids.iter().cloned().map(|id| {
        let store = store.clone();
        tokio::spawn(async move {
            store.transition(&id, DefectStatus::OnControl, "1").await?;
            Ok::<bool, Error>(true)
        })
    });
    let failed = failures(join_all(tasks).await);
    assert!(failed.is_empty(), "failed mutations: {:?}", failed);

    for id in &ids {
        let defect = store.get_by_human_id(id).await.unwrap().unwrap();
        assert_eq!(defect.status, DefectStatus::OnControl);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wizard_effects_race_reminder_claims() {
    let dir = TempDir::new().unwrap();
    let store = DefectStore::new(file_pool(&dir).await);
    let now = time::now();
    let cooldown = Duration::hours(24);

    let mut overdue = Vec::new();
    for _ in 0..10 {
        let defect = create_sample(&store, "100").await;
        store
            .set_due_date(&defect.human_id, now - Duration::hours(2), "100")
            .await
            .unwrap();
        overdue.push(defect);
    }
    let mut fresh = Vec::new();
    for _ in 0..20 {
        fresh.push(create_sample(&store, "100").await.human_id);
    }

    let mut tasks = Vec::new();
    for defect in &overdue {
        let (sweeper, id) = (store.clone(), defect.id.clone());
        tasks.push(tokio::spawn(async move {
            sweeper
                .claim_overdue(&id, now, cooldown, &["100".to_string()], "system")
                .await
        }));

        let (wizard, human_id) = (store.clone(), defect.human_id.clone());
        tasks.push(tokio::spawn(async move {
            wizard.assign(&human_id, "200", "100").await?;
            Ok::<bool, Error>(true)
        }));
    }
    for human_id in &fresh {
        let (store, human_id) = (store.clone(), human_id.clone());
        tasks.push(tokio::spawn(async move {
            store.assign(&human_id, "200", "100").await?;
            store
                .set_due_date(&human_id, now + Duration::days(3), "100")
                .await?;
            store
                .transition(&human_id, DefectStatus::OnControl, "100")
                .await?;
            Ok::<bool, Error>(true)
        }));
    }

    let failed = failures(join_all(tasks).await);
    assert!(failed.is_empty(), "failed mutations: {:?}", failed);

    for defect in &overdue {
        let notices = store
            .list_actions(&defect.id)
            .await
            .unwrap()
            .iter()
            .filter(|a| a.kind() == ActionKind::NotifyOverdue)
            .count();
        assert_eq!(notices, 1);
    }
    for human_id in &fresh {
        let defect = store.get_by_human_id(human_id).await.unwrap().unwrap();
        assert_eq!(defect.status, DefectStatus::OnControl);
        assert_eq!(defect.assigned_to.as_deref(), Some("200"));
        assert!(defect.due_date.is_some());
    }
}
