//! Bulk ticket classification with a JSON result cache.
//!
//! Tickets are classified strictly one at a time with a fixed delay between
//! calls, which keeps a free-tier request quota honest (a 4-second delay
//! stays under 15 requests per minute). The first classification failure
//! terminates the run; everything classified so far is still written to the
//! cache, and an existing cache file skips the model entirely on the next
//! run.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::classify::TicketClassifier;
use crate::error::CopilotError;
use crate::models::{ClassifiedTicket, Ticket};

/// How a bulk run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOutcome {
    /// Every ticket was classified.
    Completed,
    /// The run stopped at the named ticket; records before it are intact.
    FailedPartial { ticket_id: String, error: String },
}

/// The records produced by a bulk run, in input order, plus how it ended.
#[derive(Debug)]
pub struct BulkReport {
    pub records: Vec<ClassifiedTicket>,
    pub outcome: BulkOutcome,
}

impl BulkReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == BulkOutcome::Completed
    }
}

/// Load the ticket dataset from a JSON array file.
pub fn load_tickets(path: &Path) -> Result<Vec<Ticket>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tickets from {}", path.display()))?;
    let tickets: Vec<Ticket> = serde_json::from_str(&data)
        .with_context(|| format!("invalid ticket JSON in {}", path.display()))?;
    Ok(tickets)
}

/// Classify `tickets` sequentially, pausing `delay` before every call after
/// the first. `progress` is invoked with the number of tickets finished so
/// far. Stops at the first classifier error.
pub async fn run_bulk(
    classifier: &dyn TicketClassifier,
    tickets: &[Ticket],
    delay: Duration,
    mut progress: impl FnMut(usize),
) -> BulkReport {
    let mut records = Vec::with_capacity(tickets.len());

    for (i, ticket) in tickets.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }

        match classifier.classify(&ticket.classification_text()).await {
            Ok(classification) => {
                records.push(ClassifiedTicket::new(ticket.clone(), classification));
                progress(records.len());
            }
            Err(e) => {
                return BulkReport {
                    records,
                    outcome: BulkOutcome::FailedPartial {
                        ticket_id: ticket.id.clone(),
                        error: e.to_string(),
                    },
                };
            }
        }
    }

    BulkReport {
        records,
        outcome: BulkOutcome::Completed,
    }
}

/// Write classification records to the cache file as a pretty-printed JSON
/// array, replacing any previous contents.
pub fn write_cache(path: &Path, records: &[ClassifiedTicket]) -> Result<(), CopilotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CopilotError::CacheWrite(format!("{}: {}", path.display(), e)))?;
    }
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| CopilotError::CacheWrite(e.to_string()))?;
    std::fs::write(path, json)
        .map_err(|e| CopilotError::CacheWrite(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

/// Read classification records back from the cache file.
pub fn read_cache(path: &Path) -> Result<Vec<ClassifiedTicket>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cache from {}", path.display()))?;
    let records: Vec<ClassifiedTicket> = serde_json::from_str(&data)
        .with_context(|| format!("invalid cache JSON in {}", path.display()))?;
    Ok(records)
}

/// Return cached records when the cache file exists, otherwise run the bulk
/// classifier and persist whatever it produced — even a partial run, so a
/// retry after fixing quota issues does not start from zero.
///
/// Cache freshness is existence-only; a record count that disagrees with
/// the live ticket set is logged but still served. Delete the file to force
/// reclassification.
pub async fn load_or_classify(
    classifier: &dyn TicketClassifier,
    tickets: &[Ticket],
    cache_path: &Path,
    delay: Duration,
    progress: impl FnMut(usize),
) -> Result<BulkReport> {
    if cache_path.exists() {
        let records = read_cache(cache_path)?;
        if records.len() != tickets.len() {
            warn!(
                cached = records.len(),
                live = tickets.len(),
                "cache record count differs from ticket set; serving cache anyway"
            );
        }
        return Ok(BulkReport {
            records,
            outcome: BulkOutcome::Completed,
        });
    }

    let report = run_bulk(classifier, tickets, delay, progress).await;
    write_cache(cache_path, &report.records)?;
    Ok(report)
}
