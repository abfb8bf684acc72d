//! Plain-text rendering of daemon payloads.

use std::fmt::Write as _;

use sessionclean_core::{format_size, ApplyOutcome, ApplyReport, ReviewOffer, TrayStatus};

pub fn status(status: &TrayStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session:  {}", status.session_id);
    let _ = writeln!(out, "Phase:    {}", status.phase);
    let _ = writeln!(out, "Tracked:  {}", status.tracked);
    if status.pending > 0 {
        let _ = writeln!(out, "Pending:  {}", status.pending);
    }
    for root in &status.unavailable_roots {
        let _ = writeln!(out, "Unavailable root: {}", root.display());
    }
    out
}

pub fn offer(offer: &ReviewOffer) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Review round {} of session {} ({})",
        offer.round,
        offer.session_id,
        offer.trigger.as_str()
    );
    if let Some(deadline) = offer.deadline {
        let _ = writeln!(
            out,
            "Shutdown waiting: undecided files are kept after {}",
            deadline.format("%H:%M:%S UTC")
        );
    }
    if offer.candidates.is_empty() {
        let _ = writeln!(out, "No new files this session.");
        return out;
    }

    let total: u64 = offer.candidates.iter().map(|candidate| candidate.size).sum();
    for candidate in &offer.candidates {
        let _ = writeln!(
            out,
            "{:>10}  {:<10}  {}",
            format_size(candidate.size),
            candidate.category,
            candidate.path.display()
        );
    }
    let _ = writeln!(
        out,
        "{} file(s), {} total",
        offer.candidates.len(),
        format_size(total)
    );
    out
}

pub fn report(report: &ApplyReport) -> String {
    let mut out = String::new();
    for entry in &report.outcomes {
        if let ApplyOutcome::Failed { reason } = &entry.outcome {
            let _ = writeln!(out, "failed   {}: {}", entry.path.display(), reason);
        }
    }
    let _ = writeln!(
        out,
        "Moved {} file(s) to trash, kept {}, {} failed (kept)",
        report.deleted(),
        report.skipped(),
        report.failed()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionclean_core::{
        Candidate, Classification, FileOutcome, ReviewTrigger, SessionPhase,
    };
    use std::path::PathBuf;

    fn candidate(name: &str, size: u64) -> Candidate {
        Candidate {
            path: PathBuf::from("/home/u/Downloads").join(name),
            size,
            modified_at: None,
            classification: Classification::User,
            file_type: "pdf".to_string(),
            category: "Documents".to_string(),
        }
    }

    #[test]
    fn offer_lists_candidates_with_total() {
        let review = ReviewOffer {
            session_id: "2026-03-01T09:00:00.000000Z".to_string(),
            round: 1,
            trigger: ReviewTrigger::Manual,
            deadline: None,
            candidates: vec![candidate("a.pdf", 1024), candidate("b.pdf", 2048)],
        };

        let text = offer(&review);
        assert!(text.contains("/home/u/Downloads/a.pdf"));
        assert!(text.contains("Documents"));
        assert!(text.contains("2 file(s), 3.0 KB total"));
        assert!(!text.contains("Shutdown waiting"));
    }

    #[test]
    fn empty_offer_says_so() {
        let review = ReviewOffer {
            session_id: "s".to_string(),
            round: 3,
            trigger: ReviewTrigger::Resume,
            deadline: None,
            candidates: Vec::new(),
        };
        assert!(offer(&review).contains("No new files"));
    }

    #[test]
    fn report_lists_failures() {
        let applied = ApplyReport {
            session_id: "s".to_string(),
            round: 1,
            outcomes: vec![
                FileOutcome {
                    path: PathBuf::from("/home/u/Downloads/a.pdf"),
                    outcome: ApplyOutcome::Deleted,
                },
                FileOutcome {
                    path: PathBuf::from("/home/u/Downloads/locked.pdf"),
                    outcome: ApplyOutcome::Failed {
                        reason: "in use".to_string(),
                    },
                },
            ],
        };

        let text = report(&applied);
        assert!(text.contains("failed   /home/u/Downloads/locked.pdf: in use"));
        assert!(text.contains("Moved 1 file(s) to trash, kept 0, 1 failed"));
    }

    #[test]
    fn status_mentions_unavailable_roots() {
        let text = status(&TrayStatus {
            session_id: "s".to_string(),
            phase: SessionPhase::Monitoring,
            tracked: 4,
            pending: 0,
            unavailable_roots: vec![PathBuf::from("/media/usb")],
        });
        assert!(text.contains("Phase:    monitoring"));
        assert!(text.contains("Unavailable root: /media/usb"));
        assert!(!text.contains("Pending"));
    }
}
