//! Upload progress events and the rules that merge them into one percentage.

use tokio::sync::mpsc;

/// Percentage that transport progress may report before the response arrives.
pub const PRE_RESPONSE_CEILING: u8 = 99;

pub const COMPLETE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub sent: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let sent = self.sent.min(self.total) as u128;
        let total = self.total as u128;
        ((sent * 100 + total / 2) / total) as u8
    }
}

pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<TransferProgress>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Percentage after a transport event. Never lowers `current`, never reaches 100.
pub fn reconcile_transport(current: u8, event: TransferProgress) -> u8 {
    current.max(event.percent().min(PRE_RESPONSE_CEILING))
}

/// Percentage after a heartbeat tick: `step` forward, capped at `ceiling`.
pub fn heartbeat_advance(current: u8, step: u8, ceiling: u8) -> u8 {
    let ceiling = ceiling.min(PRE_RESPONSE_CEILING);
    if current >= ceiling {
        return current;
    }
    current.saturating_add(step).min(ceiling)
}
