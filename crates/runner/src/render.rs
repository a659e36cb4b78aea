//! Terminal rendering of progress records.

use std::fmt::Write;

use memberflow_infra::jobs::JobProgress;

/// One status line, e.g. `IN_PROGRESS 50/120 (41.7%) eta 7s`.
pub fn line(progress: &JobProgress) -> String {
    let mut out = format!(
        "{:<11} {}/{}",
        progress.state.as_str(),
        progress.current,
        progress.total
    );

    if let Some(percent) = progress.percent {
        let _ = write!(out, " ({percent:.1}%)");
    }
    if let Some(eta) = progress.eta_seconds.filter(|eta| *eta > 0.0) {
        let _ = write!(out, " eta {eta:.0}s");
    }
    if let Some(inserted) = progress.inserted {
        let _ = write!(out, " inserted={inserted}");
    }
    if let Some(deleted) = progress.deleted {
        let _ = write!(out, " deleted={deleted}");
    }
    if let Some(message) = &progress.message {
        let _ = write!(out, " - {message}");
    }

    out
}
