use crate::packet::MessageCode;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

struct Armed {
    code: MessageCode,
    wanted: usize,
    frames: Vec<Bytes>,
    done: Option<oneshot::Sender<Vec<Bytes>>>,
}

/// Collects a fixed number of reports of one type for diagnostics.
///
/// Reports of other types, or any report while disarmed, are ignored.
#[derive(Default)]
pub struct ReportCapture {
    armed: Option<Armed>,
}

impl ReportCapture {
    /// Start collecting `count` reports of type `code`, replacing any capture
    /// already in progress.
    pub fn arm(&mut self, code: MessageCode, count: usize) -> oneshot::Receiver<Vec<Bytes>> {
        let (tx, rx) = oneshot::channel();
        self.armed = Some(Armed {
            code,
            wanted: count,
            frames: Vec::with_capacity(count),
            done: Some(tx),
        });
        rx
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Offer a report; returns true if it was kept.
    pub fn offer(&mut self, code: MessageCode, payload: &[u8]) -> bool {
        let Some(armed) = self.armed.as_mut() else {
            return false;
        };
        if armed.code != code || armed.frames.len() >= armed.wanted {
            return false;
        }

        armed.frames.push(Bytes::copy_from_slice(payload));
        debug!(
            %code,
            collected = armed.frames.len(),
            wanted = armed.wanted,
            "Captured report"
        );
        if armed.frames.len() == armed.wanted {
            if let Some(tx) = armed.done.take() {
                let _ = tx.send(std::mem::take(&mut armed.frames));
            }
            self.armed = None;
        }
        true
    }
}
