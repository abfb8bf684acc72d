//! Session lifecycle controller.
//!
//! A single thread owns the current `Session` and serializes every
//! transition. Monitor changes, review requests, the shutdown intercept and
//! UI replies all arrive as `ControlEvent`s on one bounded channel.
//!
//! ```text
//! MONITORING ──review/shutdown──▶ REVIEW_PENDING ──freeze──▶ REVIEWING
//!      ▲                                                        │
//!      │ dismiss (manual/resume)                      decisions │ timeout (shutdown)
//!      └────────────────────────────────────────────────────────┤
//!                                                               ▼
//!   new session ◀── CLOSED ◀──────────────────────────────── APPLYING
//! ```
//!
//! On start, a session left open by a previous run is `RESUMED`: its pending
//! records go back to tracked and the candidate set is offered again.
//!
//! The store is the only durable state. Every phase is written before it is
//! observable, and a failed write leaves the session open so the next start
//! can resume it.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::error::{CleanError, Result};
use crate::executor::{self, Trash};
use crate::filter::FilterEngine;
use crate::monitor::{initial_unavailable, ChangeEvent};
use crate::scanner::{seed_session, SeedMode};
use crate::store::Store;
use crate::types::{
    ApplyReport, Candidate, Classification, DecisionBatch, MonitoredRoot, RecordStatus,
    ReviewOffer, ReviewTrigger, Session, SessionPhase, TrayStatus,
};

/// Capacity of the controller's event channel.
pub const CONTROL_CHANNEL_CAPACITY: usize = 256;

const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Reply to a shutdown intercept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownAck {
    /// The session was closed; shutdown may continue.
    Proceed,
    /// The final writes failed; the session stays open for the next start.
    Abort(String),
}

pub enum ControlEvent {
    Change(ChangeEvent),
    ReviewRequested {
        reply: Option<Sender<Result<ReviewOffer>>>,
    },
    ShutdownRequested {
        ack: Sender<ShutdownAck>,
    },
    SubmitDecisions {
        batch: DecisionBatch,
        reply: Sender<Result<ApplyReport>>,
    },
    DismissReview {
        reply: Sender<Result<()>>,
    },
    Rescan,
    GetStatus {
        reply: Sender<Result<TrayStatus>>,
    },
    GetReview {
        reply: Sender<Option<ReviewOffer>>,
    },
    Stop,
}

/// Shows a frozen candidate list to the user.
pub trait ReviewPresenter: Send {
    fn present(&self, offer: &ReviewOffer);
}

/// Receives tray status after every change and transition.
pub trait StatusSink: Send {
    fn publish(&self, status: &TrayStatus);
}

/// Creates the controller's bounded event channel.
pub fn control_channel() -> (Sender<ControlEvent>, Receiver<ControlEvent>) {
    crossbeam_channel::bounded(CONTROL_CHANNEL_CAPACITY)
}

struct ActiveReview {
    offer: ReviewOffer,
    deadline: Option<Instant>,
    acks: Vec<Sender<ShutdownAck>>,
}

pub struct Controller {
    store: Store,
    filter: FilterEngine,
    roots: Vec<MonitoredRoot>,
    review_timeout: Duration,
    keep_closed_sessions: usize,
    trash: Box<dyn Trash>,
    presenter: Box<dyn ReviewPresenter>,
    status_sink: Box<dyn StatusSink>,
    session: Session,
    review: Option<ActiveReview>,
    queued: Vec<ChangeEvent>,
    rescan_after_review: bool,
    unavailable: BTreeSet<PathBuf>,
}

impl Controller {
    /// Opens the current session: resumes one left open by a previous run,
    /// or begins and seeds a fresh one.
    pub fn start(
        store: Store,
        filter: FilterEngine,
        config: &AppConfig,
        trash: Box<dyn Trash>,
        presenter: Box<dyn ReviewPresenter>,
        status_sink: Box<dyn StatusSink>,
    ) -> Result<Self> {
        let roots = config.enabled_roots();
        let unavailable = initial_unavailable(&roots).into_iter().collect();

        let (session, resumed) = match store.load_open_session()? {
            Some(open) => {
                let restored = store.restore_pending(&open.id)?;
                store.set_phase(&open.id, SessionPhase::Resumed)?;
                tracing::info!(
                    session_id = %open.id,
                    previous_phase = %open.phase,
                    restored,
                    "Resuming session left open"
                );
                (
                    Session {
                        phase: SessionPhase::Resumed,
                        ..open
                    },
                    true,
                )
            }
            None => {
                let session = store.begin_session(Utc::now())?;
                seed_session(&store, &filter, &roots, &session.id, &SeedMode::Fresh)?;
                tracing::info!(session_id = %session.id, "Started session");
                (session, false)
            }
        };

        let mut controller = Self {
            store,
            filter,
            roots,
            review_timeout: config.review_timeout(),
            keep_closed_sessions: config.keep_closed_sessions,
            trash,
            presenter,
            status_sink,
            session,
            review: None,
            queued: Vec::new(),
            rescan_after_review: false,
            unavailable,
        };

        if resumed {
            controller.open_review(ReviewTrigger::Resume, None, Instant::now())?;
        }
        controller.publish_status();
        Ok(controller)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn offer(&self) -> Option<&ReviewOffer> {
        self.review.as_ref().map(|review| &review.offer)
    }

    pub fn queued_changes(&self) -> usize {
        self.queued.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────────────

    /// Processes events until `Stop` or until every sender is gone.
    pub fn run(mut self, events: Receiver<ControlEvent>) {
        tracing::info!(session_id = %self.session.id, "Controller running");
        loop {
            let timeout = self
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);

            match events.recv_timeout(timeout) {
                Ok(ControlEvent::Stop) => break,
                Ok(event) => {
                    if let Err(err) = self.handle(event) {
                        tracing::error!(error = %err, code = err.code(), "Control event failed");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Err(err) = self.tick(Instant::now()) {
                tracing::error!(error = %err, "Review timeout handling failed");
            }
        }
        tracing::info!(session_id = %self.session.id, "Controller stopped");
    }

    /// Handles one event. Request/reply events answer through their reply
    /// channel and only return an error for failures nobody is waiting on.
    pub fn handle(&mut self, event: ControlEvent) -> Result<()> {
        match event {
            ControlEvent::Change(change) => self.handle_change(change),
            ControlEvent::ReviewRequested { reply } => {
                let result = self.review_now();
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                        Ok(())
                    }
                    None => result.map(|_| ()),
                }
            }
            ControlEvent::ShutdownRequested { ack } => self.shutdown_requested(ack, Instant::now()),
            ControlEvent::SubmitDecisions { batch, reply } => {
                let _ = reply.send(self.submit(batch));
                Ok(())
            }
            ControlEvent::DismissReview { reply } => {
                let _ = reply.send(self.dismiss());
                Ok(())
            }
            ControlEvent::Rescan => self.rescan(),
            ControlEvent::GetStatus { reply } => {
                let _ = reply.send(self.status());
                Ok(())
            }
            ControlEvent::GetReview { reply } => {
                let _ = reply.send(self.offer().cloned());
                Ok(())
            }
            ControlEvent::Stop => Ok(()),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.review.as_ref().and_then(|review| review.deadline)
    }

    /// Applies the timeout fallback once a shutdown review's deadline passed:
    /// every candidate is kept and nothing is trashed.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        let expired = matches!(self.next_deadline(), Some(deadline) if now >= deadline);
        if !expired {
            return Ok(());
        }
        let Some(review) = self.review.as_ref() else {
            return Ok(());
        };
        tracing::warn!(
            session_id = %self.session.id,
            round = review.offer.round,
            candidates = review.offer.candidates.len(),
            "Review timed out; keeping every candidate"
        );
        let batch = DecisionBatch::empty(&self.session.id, review.offer.round);
        self.store.record_decisions(&batch, Utc::now())?;
        self.finish_review(&batch).map(|_| ())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Review requests
    // ─────────────────────────────────────────────────────────────────────

    /// Manual "review now". Joins a review already in flight.
    pub fn review_now(&mut self) -> Result<ReviewOffer> {
        if let Some(review) = &self.review {
            tracing::info!(
                session_id = %self.session.id,
                round = review.offer.round,
                "Review already in progress; coalescing request"
            );
            return Ok(review.offer.clone());
        }
        self.open_review(ReviewTrigger::Manual, None, Instant::now())?;
        self.offer()
            .cloned()
            .ok_or_else(|| CleanError::InvalidTransition {
                action: "review".to_string(),
                phase: self.session.phase.to_string(),
            })
    }

    /// Shutdown intercept. `ack` is answered once the session has closed.
    pub fn shutdown_requested(&mut self, ack: Sender<ShutdownAck>, now: Instant) -> Result<()> {
        let deadline = now + self.review_timeout;

        if let Some(review) = self.review.as_mut() {
            tracing::info!(
                session_id = %self.session.id,
                round = review.offer.round,
                "Shutdown joined review in progress"
            );
            if review.offer.candidates.is_empty() {
                // Nothing to wait for; close and let shutdown continue.
                let batch = DecisionBatch::empty(&self.session.id, review.offer.round);
                if let Err(err) = self.store.record_decisions(&batch, Utc::now()) {
                    let _ = ack.send(ShutdownAck::Abort(err.to_string()));
                    return Err(err);
                }
                review.acks.push(ack);
                return self.finish_review(&batch).map(|_| ());
            }
            review.acks.push(ack);
            if review.deadline.is_none() {
                review.deadline = Some(deadline);
                review.offer.deadline = Some(deadline_utc(self.review_timeout));
                self.store
                    .set_trigger(&self.session.id, ReviewTrigger::Shutdown)?;
                self.presenter.present(&review.offer);
            }
            return Ok(());
        }

        match self.open_review(ReviewTrigger::Shutdown, Some(deadline), now) {
            Ok(()) => {
                match self.review.as_mut() {
                    Some(review) => review.acks.push(ack),
                    // Nothing to review: the session already closed.
                    None => {
                        let _ = ack.send(ShutdownAck::Proceed);
                    }
                }
                Ok(())
            }
            Err(err) => {
                let _ = ack.send(ShutdownAck::Abort(err.to_string()));
                Err(err)
            }
        }
    }

    /// Freezes candidates and offers them for review.
    ///
    /// A shutdown or resume review with nothing to offer closes straight
    /// away; a manual one is still shown so the UI can report a clean
    /// session.
    fn open_review(
        &mut self,
        trigger: ReviewTrigger,
        deadline: Option<Instant>,
        now: Instant,
    ) -> Result<()> {
        let session_id = self.session.id.clone();
        let frozen_at = Utc::now();

        self.set_phase(SessionPhase::ReviewPending)?;
        let frozen = self.store.freeze_candidates(&session_id)?;
        let round = self
            .store
            .begin_review_round(&session_id, trigger, frozen_at)?;
        self.session.review_round = round;
        self.session.trigger = Some(trigger);
        self.session.frozen_at = self.session.frozen_at.or(Some(frozen_at));

        let candidates: Vec<Candidate> = self
            .store
            .list_records(&session_id, Some(RecordStatus::Pending))?
            .iter()
            .filter(|record| record.classification == Classification::User)
            .map(Candidate::from)
            .collect();

        self.set_phase(SessionPhase::Reviewing)?;
        let offer = ReviewOffer {
            session_id: session_id.clone(),
            round,
            trigger,
            deadline: deadline.map(|deadline| {
                deadline_utc(deadline.saturating_duration_since(now))
            }),
            candidates,
        };
        tracing::info!(
            session_id = %session_id,
            round,
            trigger = trigger.as_str(),
            frozen,
            candidates = offer.candidates.len(),
            "Review opened"
        );

        let close_now = offer.candidates.is_empty() && trigger != ReviewTrigger::Manual;
        self.presenter.present(&offer);
        self.review = Some(ActiveReview {
            offer,
            deadline,
            acks: Vec::new(),
        });
        self.publish_status();

        if close_now {
            let batch = DecisionBatch::empty(&session_id, round);
            self.store.record_decisions(&batch, Utc::now())?;
            self.finish_review(&batch)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Review replies
    // ─────────────────────────────────────────────────────────────────────

    /// Applies the user's decisions for the open review.
    pub fn submit(&mut self, batch: DecisionBatch) -> Result<ApplyReport> {
        if batch.session_id != self.session.id {
            return Err(match self.store.session(&batch.session_id)? {
                Some(session) if session.clean_close => CleanError::SessionClosed(session.id),
                Some(session) => CleanError::InvalidTransition {
                    action: "submit decisions".to_string(),
                    phase: session.phase.to_string(),
                },
                None => CleanError::UnknownSession(batch.session_id),
            });
        }
        let Some(review) = &self.review else {
            return Err(CleanError::InvalidTransition {
                action: "submit decisions".to_string(),
                phase: self.session.phase.to_string(),
            });
        };
        if batch.round != review.offer.round {
            return Err(CleanError::StaleReview {
                expected: review.offer.round,
                actual: batch.round,
            });
        }

        self.store.record_decisions(&batch, Utc::now())?;
        self.finish_review(&batch)
    }

    /// Closes the review window without deciding. Not allowed while a
    /// shutdown is waiting on the review.
    pub fn dismiss(&mut self) -> Result<()> {
        let waiting_shutdown = match &self.review {
            None => {
                return Err(CleanError::InvalidTransition {
                    action: "dismiss review".to_string(),
                    phase: self.session.phase.to_string(),
                })
            }
            Some(review) => review.deadline.is_some() || !review.acks.is_empty(),
        };
        if waiting_shutdown {
            return Err(CleanError::InvalidTransition {
                action: "dismiss a shutdown review".to_string(),
                phase: self.session.phase.to_string(),
            });
        }

        let restored = self.store.restore_pending(&self.session.id)?;
        self.set_phase(SessionPhase::Monitoring)?;
        self.review = None;
        tracing::info!(session_id = %self.session.id, restored, "Review dismissed");

        self.replay_queued()?;
        self.publish_status();
        Ok(())
    }

    /// APPLYING → CLOSED → new session.
    fn finish_review(&mut self, batch: &DecisionBatch) -> Result<ApplyReport> {
        let acks = self
            .review
            .as_mut()
            .map(|review| std::mem::take(&mut review.acks))
            .unwrap_or_default();

        let closed = self.apply_and_close(batch);
        let report = match closed {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(
                    session_id = %self.session.id,
                    error = %err,
                    "Final writes failed; session stays open"
                );
                for ack in &acks {
                    let _ = ack.send(ShutdownAck::Abort(err.to_string()));
                }
                self.review = None;
                return Err(err);
            }
        };

        for ack in &acks {
            let _ = ack.send(ShutdownAck::Proceed);
        }
        self.review = None;

        if let Err(err) = self.store.prune_closed_sessions(self.keep_closed_sessions) {
            tracing::warn!(error = %err, "Failed to prune closed sessions");
        }

        self.begin_successor()?;
        Ok(report)
    }

    fn apply_and_close(&mut self, batch: &DecisionBatch) -> Result<ApplyReport> {
        self.set_phase(SessionPhase::Applying)?;
        let report = executor::apply(&self.store, &self.session.id, batch, self.trash.as_ref())?;
        let closed_at = Utc::now();
        self.store.close_session(&self.session.id, closed_at)?;
        self.session.phase = SessionPhase::Closed;
        self.session.closed_at = Some(closed_at);
        self.session.clean_close = true;
        tracing::info!(
            session_id = %self.session.id,
            deleted = report.deleted(),
            failed = report.failed(),
            "Session closed"
        );
        Ok(report)
    }

    fn begin_successor(&mut self) -> Result<()> {
        let previous = self.session.clone();
        let since = previous.frozen_at.unwrap_or(previous.started_at);
        let session = self.store.begin_session(Utc::now())?;
        self.session = session;

        seed_session(
            &self.store,
            &self.filter,
            &self.available_roots(),
            &self.session.id,
            &SeedMode::Successor {
                previous_session: previous.id.clone(),
                since,
            },
        )?;
        tracing::info!(
            session_id = %self.session.id,
            previous_session = %previous.id,
            "Started session"
        );

        self.replay_queued()?;
        if std::mem::take(&mut self.rescan_after_review) {
            self.rescan()?;
        }
        self.publish_status();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Changes
    // ─────────────────────────────────────────────────────────────────────

    pub fn handle_change(&mut self, change: ChangeEvent) -> Result<()> {
        if self.review.is_some() {
            tracing::debug!(?change, "Queueing change until review closes");
            self.queued.push(change);
            return Ok(());
        }
        self.apply_change(change)?;
        self.publish_status();
        Ok(())
    }

    fn replay_queued(&mut self) -> Result<()> {
        let queued = std::mem::take(&mut self.queued);
        if !queued.is_empty() {
            tracing::info!(count = queued.len(), "Replaying changes queued during review");
        }
        for change in queued {
            self.apply_change(change)?;
        }
        Ok(())
    }

    fn apply_change(&mut self, change: ChangeEvent) -> Result<()> {
        let session_id = self.session.id.clone();
        match change {
            ChangeEvent::Created(observed) => {
                if observed.classification != Classification::User {
                    return Ok(());
                }
                if self.store.is_baseline(&session_id, &observed.path)? {
                    tracing::debug!(path = %observed.path.display(), "Ignoring change to pre-existing file");
                    return Ok(());
                }
                tracing::debug!(path = %observed.path.display(), "Tracking file");
                self.store.upsert_record(&observed.into_record(
                    &session_id,
                    RecordStatus::Tracked,
                    Utc::now(),
                ))?;
            }
            ChangeEvent::Renamed { from, to } => {
                if self.store.record(&session_id, &from)?.is_none() {
                    if self.store.is_baseline(&session_id, &from)? {
                        self.store.record_baseline(&session_id, &[to])?;
                        return Ok(());
                    }
                    return self.apply_change(ChangeEvent::Created(to));
                }
                if to.classification != Classification::User {
                    self.store
                        .mark_status(&session_id, &from, RecordStatus::Deleted, None)?;
                    return Ok(());
                }
                let destination = to.path.clone();
                self.store.rename_record(&session_id, &from, &to)?;
                // A rename may be preceded by a one-sided "moved away" event.
                if let Some(record) = self.store.record(&session_id, &destination)? {
                    if record.status == RecordStatus::Deleted {
                        self.store.mark_status(
                            &session_id,
                            &destination,
                            RecordStatus::Tracked,
                            None,
                        )?;
                    }
                }
            }
            ChangeEvent::Removed { path } => {
                if self
                    .store
                    .mark_status(&session_id, &path, RecordStatus::Deleted, None)?
                {
                    tracing::debug!(path = %path.display(), "Tracked file removed externally");
                }
            }
            ChangeEvent::RootUnavailable(root) => {
                tracing::info!(root = %root.display(), "Root unavailable");
                self.unavailable.insert(root);
            }
            ChangeEvent::RootAvailable(root) => {
                if self.unavailable.remove(&root) {
                    tracing::info!(root = %root.display(), "Root available again; catching up");
                    let roots: Vec<MonitoredRoot> = self
                        .roots
                        .iter()
                        .filter(|candidate| candidate.path == root)
                        .cloned()
                        .collect();
                    self.catch_up(&roots)?;
                }
            }
        }
        Ok(())
    }

    /// Re-walks every available root for files the monitor missed.
    pub fn rescan(&mut self) -> Result<()> {
        if self.review.is_some() {
            tracing::info!("Rescan requested during review; deferring");
            self.rescan_after_review = true;
            return Ok(());
        }
        let roots = self.available_roots();
        self.catch_up(&roots)?;
        self.publish_status();
        Ok(())
    }

    fn catch_up(&mut self, roots: &[MonitoredRoot]) -> Result<()> {
        let since = self.session.started_at;
        let summary = seed_session(
            &self.store,
            &self.filter,
            roots,
            &self.session.id,
            &SeedMode::CatchUp { since },
        )?;
        if summary.tracked > 0 {
            tracing::info!(tracked = summary.tracked, "Catch-up scan found new files");
        }
        Ok(())
    }

    fn available_roots(&self) -> Vec<MonitoredRoot> {
        self.roots
            .iter()
            .filter(|root| !self.unavailable.contains(&root.path))
            .cloned()
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────

    fn set_phase(&mut self, phase: SessionPhase) -> Result<()> {
        self.store.set_phase(&self.session.id, phase)?;
        tracing::debug!(session_id = %self.session.id, from = %self.session.phase, to = %phase, "Phase transition");
        self.session.phase = phase;
        Ok(())
    }

    pub fn status(&self) -> Result<TrayStatus> {
        Ok(TrayStatus {
            session_id: self.session.id.clone(),
            phase: self.session.phase,
            tracked: self
                .store
                .count_records(&self.session.id, RecordStatus::Tracked)?,
            pending: self
                .store
                .count_records(&self.session.id, RecordStatus::Pending)?,
            unavailable_roots: self.unavailable.iter().cloned().collect(),
        })
    }

    fn publish_status(&self) {
        match self.status() {
            Ok(status) => self.status_sink.publish(&status),
            Err(err) => tracing::warn!(error = %err, "Failed to compute tray status"),
        }
    }
}

fn deadline_utc(remaining: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero())
}
