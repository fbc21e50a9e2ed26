// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tracking of the outstanding request/response round trip.

use tokio::time::Instant;

use super::protocol::{ClientMessage, DeviceMessageKind};

/// A request waiting for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub message: ClientMessage,
    pub issued_at: Instant,
}

/// Single slot holding the request in flight.
///
/// The unit answers one request at a time, so a new request replaces the
/// pending one and the replaced request is handed back to the caller.
#[derive(Debug, Default)]
pub struct RequestTracker {
    pending: Option<PendingRequest>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new request. Returns the request it supersedes, if any.
    pub fn begin(&mut self, message: ClientMessage) -> Option<PendingRequest> {
        self.pending.replace(PendingRequest {
            message,
            issued_at: Instant::now(),
        })
    }

    /// Consume the pending request if a message of `kind` answers it.
    pub fn resolve(&mut self, kind: DeviceMessageKind) -> Option<PendingRequest> {
        match self.pending {
            Some(pending) if pending.message.is_answered_by(kind) => self.pending.take(),
            _ => None,
        }
    }

    /// Forget the pending request.
    pub fn cancel(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<ClientMessage> {
        self.pending.map(|pending| pending.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_consumes_once() {
        let mut tracker = RequestTracker::new();
        assert!(tracker.begin(ClientMessage::CardExistenceRequest).is_none());

        assert!(tracker.resolve(DeviceMessageKind::Heartbeat).is_none());
        assert_eq!(tracker.pending(), Some(ClientMessage::CardExistenceRequest));

        let resolved = tracker.resolve(DeviceMessageKind::CardExistenceResponse).unwrap();
        assert_eq!(resolved.message, ClientMessage::CardExistenceRequest);
        assert!(tracker.resolve(DeviceMessageKind::CardExistenceResponse).is_none());
        assert_eq!(tracker.pending(), None);
    }

    #[test]
    fn test_new_request_supersedes_pending() {
        let mut tracker = RequestTracker::new();
        tracker.begin(ClientMessage::InitialPaymentRecordRequest);

        let superseded = tracker.begin(ClientMessage::CardExistenceRequest).unwrap();
        assert_eq!(superseded.message, ClientMessage::InitialPaymentRecordRequest);
        assert_eq!(tracker.pending(), Some(ClientMessage::CardExistenceRequest));
    }

    #[test]
    fn test_cancel() {
        let mut tracker = RequestTracker::new();
        assert!(tracker.cancel().is_none());

        tracker.begin(ClientMessage::DeviceNameRequest);
        assert_eq!(
            tracker.cancel().map(|pending| pending.message),
            Some(ClientMessage::DeviceNameRequest)
        );
        assert_eq!(tracker.pending(), None);
    }
}
