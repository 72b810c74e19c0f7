//! Per-connection response accumulator.

use crate::wire::ResponseEnvelope;

/// Responses settled for one connection since its last flush.
///
/// `session` tells apart successive openings of the same [`ConnectionId`];
/// a dispatch only settles into the state it was accepted by.
///
/// [`ConnectionId`]: crate::types::ConnectionId
#[derive(Debug)]
pub(super) struct ConnectionState {
    session: u64,
    outbox: Vec<ResponseEnvelope>,
    flush_scheduled: bool,
    in_flight: usize,
}

impl ConnectionState {
    pub(super) fn new(session: u64) -> Self {
        Self {
            session,
            outbox: Vec::new(),
            flush_scheduled: false,
            in_flight: 0,
        }
    }

    pub(super) fn session(&self) -> u64 {
        self.session
    }

    pub(super) fn begin(&mut self, calls: usize) {
        self.in_flight += calls;
    }

    /// Record a settled call. Returns true when the caller must schedule a
    /// flush, i.e. the outbox was idle.
    pub(super) fn settle(&mut self, response: ResponseEnvelope) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.outbox.push(response);
        !std::mem::replace(&mut self.flush_scheduled, true)
    }

    /// Take everything accumulated and allow the next flush to be scheduled.
    pub(super) fn take(&mut self) -> Vec<ResponseEnvelope> {
        self.flush_scheduled = false;
        std::mem::take(&mut self.outbox)
    }

    pub(super) fn in_flight(&self) -> usize {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_only_first_settle_schedules() {
        let mut state = ConnectionState::new(1);
        state.begin(3);
        assert!(state.settle(ResponseEnvelope::success(1, json!(1))));
        assert!(!state.settle(ResponseEnvelope::success(2, json!(2))));
        assert_eq!(state.in_flight(), 1);

        let batch = state.take();
        assert_eq!(batch.len(), 2);
        assert!(state.settle(ResponseEnvelope::success(3, json!(3))));
        assert_eq!(state.in_flight(), 0);
    }
}
