//! Server-side carrier for pending-verification markers.
//!
//! Clients only ever see a ULID ticket. Entries expire after the configured
//! TTL and are swept lazily whenever a new ticket is issued.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::registration::PendingVerification;

struct TicketEntry {
    marker: PendingVerification,
    created_at: Instant,
}

pub struct PendingTickets {
    ttl: Duration,
    entries: Mutex<HashMap<Ulid, TicketEntry>>,
}

impl PendingTickets {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn issue(&self, marker: PendingVerification) -> Ulid {
        let ticket = Ulid::new();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        entries.insert(
            ticket,
            TicketEntry {
                marker,
                created_at: Instant::now(),
            },
        );
        ticket
    }

    /// The marker for a live ticket. Malformed and expired tickets yield `None`.
    pub async fn get(&self, ticket: &str) -> Option<PendingVerification> {
        let ticket = Ulid::from_string(ticket.trim()).ok()?;
        let entries = self.entries.lock().await;
        entries
            .get(&ticket)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .map(|entry| entry.marker.clone())
    }

    pub async fn clear(&self, ticket: &str) {
        if let Ok(ticket) = Ulid::from_string(ticket.trim()) {
            self.entries.lock().await.remove(&ticket);
        }
    }
}
