mod support;

use sessionclean_core::scanner::observe_path;
use sessionclean_core::{
    ChangeEvent, CleanError, Classification, Decision, DecisionBatch, FilterEngine,
    RecordStatus, ReviewTrigger, SessionPhase, ShutdownAck,
};
use std::time::{Duration, Instant};
use support::{candidate_paths, Fixture};

#[test]
fn downloads_end_to_end_trashes_only_the_user_file() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let first_session = controller.session().id.clone();

    let pdf = fixture.write("a.pdf", "%PDF-1.7");
    fixture.write("Google/Chrome/Cache/cache.db", "cache bytes");
    controller.rescan().expect("rescan");

    let offer = controller.review_now().expect("review");
    assert_eq!(offer.session_id, first_session);
    assert_eq!(candidate_paths(&offer), vec![pdf.clone()]);

    let batch = DecisionBatch::empty(&offer.session_id, offer.round).with(&pdf, Decision::Delete);
    let report = controller.submit(batch).expect("submit");

    assert_eq!(report.deleted(), 1);
    assert_eq!(fixture.trash.calls(), vec![pdf.clone()]);
    let record = controller
        .store()
        .record(&first_session, &pdf)
        .expect("query")
        .expect("record");
    assert_eq!(record.status, RecordStatus::Deleted);

    // A fresh session took over.
    assert_ne!(controller.session().id, first_session);
    assert_eq!(controller.session().phase, SessionPhase::Monitoring);
    let closed = controller
        .store()
        .session(&first_session)
        .expect("query")
        .expect("session");
    assert!(closed.clean_close);
}

#[test]
fn system_and_ignored_files_never_become_candidates() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();

    let keep = fixture.write("notes.txt", "hello");
    fixture.write("empty.txt", "");
    fixture.write("setup.tmp", "partial");
    fixture.write("~$report.docx", "lock");
    fixture.write(".hidden.pdf", "hidden");
    fixture.write("node_modules/pkg/index.js", "module.exports = 1;");
    controller.rescan().expect("rescan");

    let offer = controller.review_now().expect("review");
    assert_eq!(candidate_paths(&offer), vec![keep]);
    assert!(offer
        .candidates
        .iter()
        .all(|candidate| candidate.classification == Classification::User));
}

#[test]
fn files_present_at_start_are_baseline() {
    let fixture = Fixture::new();
    let existing = fixture.write("old.pdf", "old");

    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();
    assert!(controller
        .store()
        .is_baseline(&session_id, &existing)
        .expect("baseline"));

    // In-place modification of a pre-existing file never surfaces.
    let filter = FilterEngine::new(&fixture.config).expect("filter");
    let observed = observe_path(&filter, &fixture.downloads, &existing).expect("observe");
    controller
        .handle_change(ChangeEvent::Created(observed))
        .expect("change");

    let offer = controller.review_now().expect("review");
    assert!(offer.candidates.is_empty());
}

#[test]
fn delete_then_recreate_keeps_one_record_with_original_first_seen() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();
    let filter = FilterEngine::new(&fixture.config).expect("filter");

    let path = fixture.write("draft.docx", "v1");
    let observed = observe_path(&filter, &fixture.downloads, &path).expect("observe");
    controller
        .handle_change(ChangeEvent::Created(observed))
        .expect("create");
    let first_seen = controller
        .store()
        .record(&session_id, &path)
        .expect("query")
        .expect("record")
        .first_seen_at;

    std::fs::remove_file(&path).expect("remove");
    controller
        .handle_change(ChangeEvent::Removed { path: path.clone() })
        .expect("remove");
    let removed = controller
        .store()
        .record(&session_id, &path)
        .expect("query")
        .expect("record kept for audit");
    assert_eq!(removed.status, RecordStatus::Deleted);

    std::thread::sleep(Duration::from_millis(20));
    fixture.write("draft.docx", "version two");
    let observed = observe_path(&filter, &fixture.downloads, &path).expect("observe");
    controller
        .handle_change(ChangeEvent::Created(observed))
        .expect("recreate");

    let records = controller
        .store()
        .list_records(&session_id, None)
        .expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RecordStatus::Tracked);
    assert_eq!(records[0].size, "version two".len() as u64);
    assert_eq!(records[0].first_seen_at, first_seen);
}

#[test]
fn rename_preserves_first_seen() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();
    let filter = FilterEngine::new(&fixture.config).expect("filter");

    let original = fixture.write("scan-001.png", "png");
    let observed = observe_path(&filter, &fixture.downloads, &original).expect("observe");
    controller
        .handle_change(ChangeEvent::Created(observed))
        .expect("create");
    let first_seen = controller
        .store()
        .record(&session_id, &original)
        .expect("query")
        .expect("record")
        .first_seen_at;

    let renamed = fixture.downloads.join("receipt.png");
    std::fs::rename(&original, &renamed).expect("rename");
    let to = observe_path(&filter, &fixture.downloads, &renamed).expect("observe");
    controller
        .handle_change(ChangeEvent::Renamed {
            from: original.clone(),
            to,
        })
        .expect("rename");

    let records = controller
        .store()
        .list_records(&session_id, None)
        .expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, renamed);
    assert_eq!(records[0].first_seen_at, first_seen);
}

#[test]
fn resume_reoffers_the_same_candidates() {
    let fixture = Fixture::new();
    let (session_id, first_offer) = {
        let mut controller = fixture.start();
        fixture.write("invoice.pdf", "pdf");
        fixture.write("photos/beach.jpg", "jpg");
        controller.rescan().expect("rescan");
        let offer = controller.review_now().expect("review");
        assert_eq!(offer.candidates.len(), 2);
        (controller.session().id.clone(), offer)
        // Dropped mid-review, as if the process died.
    };

    let controller = fixture.start();
    assert_eq!(controller.session().id, session_id);
    let resumed = controller.offer().cloned().expect("resumed offer");
    assert_eq!(resumed.trigger, ReviewTrigger::Resume);
    assert_eq!(resumed.round, first_offer.round + 1);
    assert_eq!(candidate_paths(&resumed), candidate_paths(&first_offer));

    let presented = fixture.presenter.offers.lock().unwrap();
    assert_eq!(presented.last(), Some(&resumed));
}

#[test]
fn shutdown_timeout_keeps_everything_without_trashing() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();
    let pdf = fixture.write("contract.pdf", "pdf");
    controller.rescan().expect("rescan");

    let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
    let requested_at = Instant::now();
    controller
        .shutdown_requested(ack_tx, requested_at)
        .expect("shutdown");
    let offer = controller.offer().cloned().expect("offer");
    assert_eq!(offer.trigger, ReviewTrigger::Shutdown);
    assert!(offer.deadline.is_some());

    // Nothing happens before the window closes.
    controller
        .tick(requested_at + Duration::from_secs(1))
        .expect("tick");
    assert!(ack_rx.try_recv().is_err());

    controller
        .tick(requested_at + Duration::from_secs(6))
        .expect("tick");
    assert_eq!(ack_rx.try_recv(), Ok(ShutdownAck::Proceed));
    assert!(fixture.trash.calls().is_empty());

    let record = controller
        .store()
        .record(&session_id, &pdf)
        .expect("query")
        .expect("record");
    assert_eq!(record.status, RecordStatus::Kept);
    assert!(controller
        .store()
        .session(&session_id)
        .expect("query")
        .expect("session")
        .clean_close);
}

#[test]
fn shutdown_with_nothing_to_review_proceeds_immediately() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();

    let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
    controller
        .shutdown_requested(ack_tx, Instant::now())
        .expect("shutdown");

    assert_eq!(ack_rx.try_recv(), Ok(ShutdownAck::Proceed));
    assert_ne!(controller.session().id, session_id);
}

#[test]
fn shutdown_joins_manual_review_and_arms_timeout() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    fixture.write("slides.pptx", "pptx");
    controller.rescan().expect("rescan");

    let manual = controller.review_now().expect("review");
    assert!(manual.deadline.is_none());

    let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
    let requested_at = Instant::now();
    controller
        .shutdown_requested(ack_tx, requested_at)
        .expect("shutdown");

    let joined = controller.offer().cloned().expect("offer");
    assert_eq!(joined.round, manual.round);
    assert!(joined.deadline.is_some());
    assert!(matches!(
        controller.dismiss(),
        Err(CleanError::InvalidTransition { .. })
    ));

    // A second manual request coalesces too.
    assert_eq!(controller.review_now().expect("review").round, manual.round);

    controller
        .submit(DecisionBatch::all_keep(&joined))
        .expect("submit");
    assert_eq!(ack_rx.try_recv(), Ok(ShutdownAck::Proceed));
}

#[test]
fn resubmitting_after_close_is_rejected() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    fixture.write("a.pdf", "pdf");
    controller.rescan().expect("rescan");

    let offer = controller.review_now().expect("review");
    let batch = DecisionBatch::all_delete(&offer);
    controller.submit(batch.clone()).expect("first submit");
    assert_eq!(fixture.trash.calls().len(), 1);

    let err = controller.submit(batch).expect_err("second submit");
    assert!(matches!(err, CleanError::SessionClosed(_)));
    assert_eq!(fixture.trash.calls().len(), 1);
}

#[test]
fn changes_during_review_are_replayed_after_dismiss() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();
    let filter = FilterEngine::new(&fixture.config).expect("filter");
    fixture.write("first.pdf", "pdf");
    controller.rescan().expect("rescan");
    controller.review_now().expect("review");

    let late = fixture.write("late.pdf", "pdf");
    let observed = observe_path(&filter, &fixture.downloads, &late).expect("observe");
    controller
        .handle_change(ChangeEvent::Created(observed))
        .expect("queued");
    assert_eq!(controller.queued_changes(), 1);
    assert!(controller
        .store()
        .record(&session_id, &late)
        .expect("query")
        .is_none());

    controller.dismiss().expect("dismiss");
    assert_eq!(controller.session().phase, SessionPhase::Monitoring);
    assert_eq!(controller.queued_changes(), 0);
    assert_eq!(
        controller
            .store()
            .count_records(&session_id, RecordStatus::Tracked)
            .expect("count"),
        2
    );
    assert_eq!(fixture.sink.last().map(|status| status.tracked), Some(2));
}

#[test]
fn changes_during_review_carry_into_the_next_session() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let filter = FilterEngine::new(&fixture.config).expect("filter");
    fixture.write("first.pdf", "pdf");
    controller.rescan().expect("rescan");
    let offer = controller.review_now().expect("review");

    let late = fixture.write("late.pdf", "pdf");
    let observed = observe_path(&filter, &fixture.downloads, &late).expect("observe");
    controller
        .handle_change(ChangeEvent::Created(observed))
        .expect("queued");

    controller
        .submit(DecisionBatch::all_keep(&offer))
        .expect("submit");
    let next = controller.session().id.clone();
    assert_ne!(next, offer.session_id);

    let carried = controller
        .store()
        .record(&next, &late)
        .expect("query")
        .expect("carried record");
    assert_eq!(carried.status, RecordStatus::Tracked);
    // The kept file belongs to the closed session only.
    assert!(controller
        .store()
        .record(&next, &fixture.downloads.join("first.pdf"))
        .expect("query")
        .is_none());
}

#[test]
fn shutdown_joining_an_empty_manual_review_proceeds_immediately() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();

    let manual = controller.review_now().expect("review");
    assert!(manual.candidates.is_empty());

    let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
    controller
        .shutdown_requested(ack_tx, Instant::now())
        .expect("shutdown");

    assert_eq!(ack_rx.try_recv(), Ok(ShutdownAck::Proceed));
    assert!(controller.offer().is_none());
    assert_ne!(controller.session().id, session_id);
    assert!(controller
        .store()
        .session(&session_id)
        .expect("query")
        .expect("session")
        .clean_close);
}

#[test]
fn rename_over_a_tracked_file_keeps_its_history() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();
    let filter = FilterEngine::new(&fixture.config).expect("filter");

    let first = fixture.write("a.pdf", "first");
    let second = fixture.write("b.pdf", "second");
    for path in [&first, &second] {
        let observed = observe_path(&filter, &fixture.downloads, path).expect("observe");
        controller
            .handle_change(ChangeEvent::Created(observed))
            .expect("create");
    }

    std::fs::rename(&first, &second).expect("rename");
    let to = observe_path(&filter, &fixture.downloads, &second).expect("observe");
    controller
        .handle_change(ChangeEvent::Renamed {
            from: first.clone(),
            to,
        })
        .expect("rename");

    let records = controller
        .store()
        .list_records(&session_id, None)
        .expect("list");
    assert_eq!(records.len(), 2, "no record is dropped");
    let moved_away = controller
        .store()
        .record(&session_id, &first)
        .expect("query")
        .expect("source record");
    assert_eq!(moved_away.status, RecordStatus::Deleted);
    let overwritten = controller
        .store()
        .record(&session_id, &second)
        .expect("query")
        .expect("destination record");
    assert_eq!(overwritten.status, RecordStatus::Tracked);

    let offer = controller.review_now().expect("review");
    assert_eq!(candidate_paths(&offer), vec![second]);
}

#[test]
fn unavailable_root_is_caught_up_when_it_returns() {
    let fixture = Fixture::new();
    let mut controller = fixture.start();
    let session_id = controller.session().id.clone();

    controller
        .handle_change(ChangeEvent::RootUnavailable(fixture.downloads.clone()))
        .expect("unavailable");
    assert_eq!(
        controller.status().expect("status").unavailable_roots,
        vec![fixture.downloads.clone()]
    );

    // Written while the root was considered gone; a rescan skips it.
    let photo = fixture.write("camera/img_0001.jpg", "jpg");
    controller.rescan().expect("rescan");
    assert!(controller
        .store()
        .record(&session_id, &photo)
        .expect("query")
        .is_none());

    controller
        .handle_change(ChangeEvent::RootAvailable(fixture.downloads.clone()))
        .expect("available");
    let record = controller
        .store()
        .record(&session_id, &photo)
        .expect("query")
        .expect("caught up");
    assert_eq!(record.status, RecordStatus::Tracked);
    assert!(controller
        .status()
        .expect("status")
        .unavailable_roots
        .is_empty());
    assert_eq!(fixture.sink.last().map(|status| status.tracked), Some(1));
}

#[test]
fn failed_close_aborts_shutdown_and_resumes_on_next_start() {
    let fixture = Fixture::new();
    let session_id = {
        let mut controller = fixture.start();
        let session_id = controller.session().id.clone();
        fixture.write("thesis.pdf", "pdf");
        controller.rescan().expect("rescan");

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let requested_at = Instant::now();
        controller
            .shutdown_requested(ack_tx, requested_at)
            .expect("shutdown");
        assert!(controller.offer().is_some());

        let db = rusqlite::Connection::open(fixture.db_path()).expect("open db");
        db.execute_batch(
            "CREATE TRIGGER refuse_close BEFORE UPDATE OF clean_close ON sessions \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .expect("install trigger");

        let err = controller
            .tick(requested_at + Duration::from_secs(6))
            .expect_err("close should fail");
        assert!(matches!(err, CleanError::Store { .. }));
        match ack_rx.try_recv() {
            Ok(ShutdownAck::Abort(reason)) => assert!(reason.contains("disk full"), "{reason}"),
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(fixture.trash.calls().is_empty());

        let open = controller
            .store()
            .load_open_session()
            .expect("query")
            .expect("session left open");
        assert_eq!(open.id, session_id);
        assert!(!open.clean_close);

        db.execute_batch("DROP TRIGGER refuse_close;")
            .expect("drop trigger");
        session_id
    };

    let controller = fixture.start();
    let resumed_offer = fixture
        .presenter
        .offers
        .lock()
        .unwrap()
        .last()
        .cloned()
        .expect("resume offer");
    assert_eq!(resumed_offer.session_id, session_id);
    assert_eq!(resumed_offer.trigger, ReviewTrigger::Resume);
    assert!(controller
        .store()
        .session(&session_id)
        .expect("query")
        .expect("session")
        .clean_close);
    assert_ne!(controller.session().id, session_id);
}
