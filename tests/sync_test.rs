mod common;

use std::sync::Arc;

use common::{added, mailbox, message, page, seeded_store, standard_folders, FakeMailApi};
use mailsync::database::{StoreEvent, StorePool};
use mailsync::models::{Folder, MessageDelta, MessageFlags, OLD_MESSAGES_BUDGET, PAGE_SIZE};
use mailsync::{DeltaSynchronizer, ErrorClass, SyncError};

fn setup(dir: &std::path::Path) -> (Arc<FakeMailApi>, DeltaSynchronizer) {
    let api = FakeMailApi::new();
    api.set_folders(standard_folders());
    let pool = StorePool::new(dir);
    let store = seeded_store(&pool, "1_1");
    let synchronizer = DeltaSynchronizer::new(api.clone(), mailbox(1, 1), store);
    (api, synchronizer)
}

#[tokio::test]
async fn first_sync_fills_folder_and_counters() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.put_message("inbox", message("1", "<a>", 100));
    api.put_message("inbox", message("2", "<a>", 200));
    api.put_message("inbox", message("3", "<b>", 300));
    api.push_delta("inbox", added(&["1", "2", "3"], "c1"));

    let mut events = sync.store().db().subscribe();
    let report = sync.sync_folder("inbox").await.unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(report.cursor, "c1");

    let folder = sync.store().folder("inbox").unwrap().unwrap();
    assert_eq!(folder.cursor.as_deref(), Some("c1"));
    assert_eq!(folder.thread_count, 2);
    assert_eq!(folder.unread_count, 2);

    let mut saw_new_messages = false;
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::NewMessages { folder_id, uids } = event {
            assert_eq!(folder_id, "inbox");
            assert_eq!(uids.len(), 3);
            saw_new_messages = true;
        }
    }
    assert!(saw_new_messages);
}

#[tokio::test]
async fn failed_body_fetch_leaves_cursor_and_content_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.put_message("inbox", message("1", "<a>", 100));
    api.push_delta("inbox", added(&["1"], "c1"));
    sync.sync_folder("inbox").await.unwrap();

    api.put_message("inbox", message("2", "<a>", 200));
    api.push_delta(
        "inbox",
        MessageDelta {
            deleted: vec!["1".to_string()],
            added: vec!["2".to_string()],
            cursor: "c2".to_string(),
            ..MessageDelta::default()
        },
    );
    api.fail_next("fetch_messages", 503, None);

    let err = sync.sync_folder("inbox").await.unwrap_err();
    assert_eq!(err.class(), Some(ErrorClass::Transient));

    let store = sync.store();
    assert_eq!(store.folder("inbox").unwrap().unwrap().cursor.as_deref(), Some("c1"));
    assert!(store.message("inbox", "1").unwrap().is_some());
    assert!(store.message("inbox", "2").unwrap().is_none());
}

#[tokio::test]
async fn updates_patch_flags_and_fetch_unknown_uids() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.put_message("inbox", message("1", "<a>", 100));
    api.push_delta("inbox", added(&["1"], "c1"));
    sync.sync_folder("inbox").await.unwrap();

    // "9" was never announced as added: it arrives through an update.
    api.put_message("inbox", message("9", "<z>", 900));
    api.push_delta(
        "inbox",
        MessageDelta {
            updated: [
                ("1".to_string(), MessageFlags::read()),
                ("9".to_string(), MessageFlags::read()),
            ]
            .into_iter()
            .collect(),
            cursor: "c2".to_string(),
            ..MessageDelta::default()
        },
    );

    let report = sync.sync_folder("inbox").await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.added, 1);
    assert_eq!(api.calls("fetch_messages"), 2);

    let store = sync.store();
    assert!(store.message("inbox", "9").unwrap().unwrap().flags.seen);
    assert!(store.unread_threads("inbox").unwrap().is_empty());
}

#[tokio::test]
async fn replaying_the_same_delta_gives_the_same_state() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    for (uid, secs) in [("1", 100), ("2", 200), ("3", 300)] {
        api.put_message("inbox", message(uid, "<a>", secs));
    }
    api.push_delta("inbox", added(&["1", "2"], "c1"));
    sync.sync_folder("inbox").await.unwrap();

    let delta = MessageDelta {
        deleted: vec!["1".to_string()],
        added: vec!["3".to_string()],
        updated: [("2".to_string(), MessageFlags::read())].into_iter().collect(),
        cursor: "c2".to_string(),
        ..MessageDelta::default()
    };
    api.push_delta("inbox", delta.clone());
    sync.sync_folder("inbox").await.unwrap();

    let store = sync.store();
    let messages = store.messages_in_folder("inbox").unwrap();
    let threads = store.threads_in_folder("inbox").unwrap();
    let folder = store.folder("inbox").unwrap();

    api.push_delta("inbox", delta);
    sync.sync_folder("inbox").await.unwrap();

    assert_eq!(store.messages_in_folder("inbox").unwrap(), messages);
    assert_eq!(store.threads_in_folder("inbox").unwrap(), threads);
    assert_eq!(store.folder("inbox").unwrap(), folder);
}

#[tokio::test]
async fn empty_delta_advances_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.push_delta("inbox", added(&[], "c5"));

    let report = sync.sync_folder("inbox").await.unwrap();
    assert_eq!((report.added, report.updated, report.deleted), (0, 0, 0));
    assert_eq!(api.calls("fetch_messages"), 0);
    assert_eq!(
        sync.store().folder("inbox").unwrap().unwrap().cursor.as_deref(),
        Some("c5")
    );
}

#[tokio::test]
async fn folder_reconcile_drops_vanished_folders_and_keeps_cursors() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.put_message("archive", message("1", "<a>", 100));
    api.push_delta("archive", added(&["1"], "c1"));
    api.push_delta("inbox", added(&[], "c7"));
    sync.sync_folder("archive").await.unwrap();
    sync.sync_folder("inbox").await.unwrap();

    api.set_folders(vec![
        Folder::new("inbox", "Inbox", None),
        Folder::new("later", "Later", None),
    ]);
    let folders = sync.sync_folders().await.unwrap();
    let ids: Vec<&str> = folders.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["inbox", "later"]);

    let store = sync.store();
    assert_eq!(store.folder("inbox").unwrap().unwrap().cursor.as_deref(), Some("c7"));
    assert!(store.message("archive", "1").unwrap().is_none());
    assert!(store.thread("archive", "<a>").unwrap().is_none());
}

#[tokio::test]
async fn unknown_folder_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_, sync) = setup(dir.path());
    let err = sync.sync_folder("nope").await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownFolder(id) if id == "nope"));
}

#[tokio::test]
async fn refused_cursor_rebuilds_folder_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.put_message("inbox", message("1", "<a>", 100));
    api.put_message("inbox", message("2", "<b>", 200));
    api.push_delta("inbox", added(&["1", "2"], "c1"));
    sync.sync_folder("inbox").await.unwrap();

    // The server lost "1" and no longer knows cursor c1.
    api.fail_delta("inbox", 404, Some("cursor not found"));
    api.push_delta("inbox", added(&["2"], "fresh"));
    let mut events = sync.store().db().subscribe();

    let report = sync.sync_folder("inbox").await.unwrap();
    assert!(report.reset);
    assert_eq!(report.cursor, "fresh");
    assert_eq!(api.calls("message_delta"), 3);

    let store = sync.store();
    let folder = store.folder("inbox").unwrap().unwrap();
    assert_eq!(folder.cursor.as_deref(), Some("fresh"));
    assert_eq!(folder.thread_count, 1);
    assert!(store.message("inbox", "1").unwrap().is_none());
    assert!(store.thread("inbox", "<a>").unwrap().is_none());
    assert!(store.message("inbox", "2").unwrap().is_some());

    let mut cleared = false;
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::FolderCleared { folder_id } = event {
            assert_eq!(folder_id, "inbox");
            cleared = true;
        }
    }
    assert!(cleared);
}

#[tokio::test]
async fn refused_fresh_sync_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.fail_delta("inbox", 404, None);

    let err = sync.sync_folder("inbox").await.unwrap_err();
    assert_eq!(err.class(), Some(ErrorClass::Validation));
    assert_eq!(api.calls("message_delta"), 1);
}

#[tokio::test]
async fn transient_failure_keeps_cursor_and_content() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.put_message("inbox", message("1", "<a>", 100));
    api.push_delta("inbox", added(&["1"], "c1"));
    sync.sync_folder("inbox").await.unwrap();

    api.fail_delta("inbox", 503, None);
    let err = sync.sync_folder("inbox").await.unwrap_err();
    assert!(err.is_transient());

    let store = sync.store();
    assert_eq!(store.folder("inbox").unwrap().unwrap().cursor.as_deref(), Some("c1"));
    assert!(store.message("inbox", "1").unwrap().is_some());
}

#[tokio::test]
async fn delta_pages_are_followed_until_the_last() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    for (uid, secs) in [("1", 100), ("2", 200), ("3", 300)] {
        api.put_message("inbox", message(uid, "<a>", secs));
    }
    api.push_delta("inbox", page(&["1"], "p1", true));
    api.push_delta("inbox", page(&["2"], "p2", true));
    api.push_delta("inbox", page(&["3"], "p3", false));

    let report = sync.sync_folder("inbox").await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.added, 3);
    assert_eq!(report.cursor, "p3");
    assert_eq!(
        sync.store().folder("inbox").unwrap().unwrap().cursor.as_deref(),
        Some("p3")
    );
}

#[tokio::test]
async fn stuck_paging_stops_when_cursor_does_not_move() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.push_delta("inbox", page(&[], "p1", true));
    api.push_delta("inbox", page(&[], "p1", true));
    api.push_delta("inbox", page(&[], "p2", false));

    let report = sync.sync_folder("inbox").await.unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.cursor, "p1");
}

#[tokio::test]
async fn full_first_page_pages_in_older_history_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());

    let newest: Vec<String> = (1000..1000 + PAGE_SIZE).map(|n| n.to_string()).collect();
    for (i, uid) in newest.iter().enumerate() {
        api.put_message("inbox", message(uid, "<new>", 10_000 + i as i64));
    }
    let newest_refs: Vec<&str> = newest.iter().map(String::as_str).collect();
    api.push_delta("inbox", added(&newest_refs, "c1"));

    let older: Vec<String> = (500..500 + PAGE_SIZE).map(|n| n.to_string()).collect();
    for (i, uid) in older.iter().enumerate() {
        api.put_message("inbox", message(uid, "<old>", 5_000 + i as i64));
    }
    let older_refs: Vec<&str> = older.iter().map(String::as_str).collect();
    api.push_older("inbox", &older_refs);
    api.put_message("inbox", message("7", "<oldest>", 7));
    api.push_older("inbox", &["7"]);

    let report = sync.sync_folder("inbox").await.unwrap();
    assert_eq!(report.added, PAGE_SIZE);
    assert_eq!(report.older, PAGE_SIZE + 1);

    let requests = api.older_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], ("inbox".to_string(), Some("1000".to_string())));
    assert_eq!(requests[1], ("inbox".to_string(), Some("500".to_string())));

    let folder = sync.store().folder("inbox").unwrap().unwrap();
    assert!(folder.history_complete);
    assert_eq!(folder.remaining_old_messages, 0);
    assert_eq!(folder.cursor.as_deref(), Some("c1"));

    // History is complete: later syncs only follow the cursor.
    sync.sync_folder("inbox").await.unwrap();
    assert_eq!(api.older_requests().len(), 2);
}

#[tokio::test]
async fn older_history_stops_when_budget_is_spent() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());

    let newest: Vec<String> = (0..PAGE_SIZE).map(|n| format!("n{}", n)).collect();
    let newest_refs: Vec<&str> = newest.iter().map(String::as_str).collect();
    api.push_delta("inbox", added(&newest_refs, "c1"));
    // Every older page is full; bodies are not needed to count the budget.
    let full: Vec<String> = (0..PAGE_SIZE).map(|n| format!("o{}", n)).collect();
    let full_refs: Vec<&str> = full.iter().map(String::as_str).collect();
    let pages = OLD_MESSAGES_BUDGET as usize / PAGE_SIZE;
    for _ in 0..pages + 2 {
        api.push_older("inbox", &full_refs);
    }

    sync.sync_folder("inbox").await.unwrap();
    assert_eq!(api.calls("older_messages"), pages);

    let folder = sync.store().folder("inbox").unwrap().unwrap();
    assert_eq!(folder.remaining_old_messages, 0);
    assert!(!folder.history_complete);
}

#[tokio::test]
async fn remote_unread_count_follows_delta() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.push_delta(
        "inbox",
        MessageDelta {
            unread_count: Some(4),
            ..added(&[], "c1")
        },
    );
    sync.sync_folder("inbox").await.unwrap();

    let folder = sync.store().folder("inbox").unwrap().unwrap();
    assert_eq!(folder.remote_unread_count, 4);
    assert!(folder.has_unseen_remote_mail());

    // A delta without a count leaves the last one in place.
    api.push_delta("inbox", added(&[], "c2"));
    sync.sync_folder("inbox").await.unwrap();
    assert_eq!(sync.store().folder("inbox").unwrap().unwrap().remote_unread_count, 4);
}

#[tokio::test]
async fn inbox_refresh_also_refreshes_sent_and_drafts() {
    let dir = tempfile::tempdir().unwrap();
    let (api, sync) = setup(dir.path());
    api.put_message("sent", message("s1", "<a>", 100));
    api.push_delta("sent", added(&["s1"], "s-c1"));

    let reports = sync.sync_with_linked("inbox").await.unwrap();
    let ids: Vec<&str> = reports.iter().map(|r| r.folder_id.as_str()).collect();
    assert_eq!(ids, vec!["inbox", "sent", "drafts"]);
    assert!(sync.store().message("sent", "s1").unwrap().is_some());

    let reports = sync.sync_with_linked("archive").await.unwrap();
    assert_eq!(reports.len(), 1);
}
