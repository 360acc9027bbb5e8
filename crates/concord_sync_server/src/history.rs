//! Authoritative per-document history.

use crate::error::{ServerError, ServerResult};
use concord_ot::{transform_against, Document, DocumentId, DocumentState, Operation, OperationId};
use std::collections::{HashMap, VecDeque};

/// The authoritative document and the ordered operations that built it.
///
/// Operation `i` of the retained log has version `oldest + i + 1`. The
/// document version always equals the version of the last log entry.
#[derive(Debug, Clone)]
pub struct DocumentHistory {
    document: Document,
    log: VecDeque<Operation>,
    oldest: u64,
    limit: usize,
}

impl DocumentHistory {
    /// Creates a history at version 0 from an initial state.
    pub fn new(id: DocumentId, state: DocumentState, limit: usize) -> ServerResult<Self> {
        let document = Document::from_state(id, state, 0)
            .map_err(ServerError::InvalidState)?
            .with_history_limit(limit);
        Ok(Self {
            document,
            log: VecDeque::new(),
            oldest: 0,
            limit: limit.max(1),
        })
    }

    /// Current server version.
    pub fn version(&self) -> u64 {
        self.document.version()
    }

    /// Version of the state preceding the first retained operation.
    pub fn oldest(&self) -> u64 {
        self.oldest
    }

    /// Authoritative document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Authoritative state.
    pub fn state(&self) -> DocumentState {
        self.document.state()
    }

    /// Number of retained operations.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Returns true if nothing has been retained.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Returns up to `limit` operations after `since`, and whether more
    /// are available. A `since` at or past the head yields nothing.
    pub fn since(&self, since: u64, limit: usize) -> ServerResult<(Vec<Operation>, bool)> {
        if since < self.oldest {
            return Err(ServerError::HistoryTruncated {
                base: since,
                oldest: self.oldest,
            });
        }
        let skip = (since - self.oldest) as usize;
        let available = self.log.len().saturating_sub(skip);
        let operations = self.log.iter().skip(skip).take(limit).cloned().collect();
        Ok((operations, available > limit))
    }

    /// Reconciles a pushed batch generated against version `base` and
    /// appends it.
    ///
    /// Operations already in the history are acknowledged again without
    /// being reapplied. New operations are transformed past every entry
    /// after `base` that the client has not produced itself. The batch is
    /// applied atomically: a single invalid operation rejects all of it.
    ///
    /// Returns the ids of all operations the history now contains.
    pub fn reconcile(&mut self, operations: &[Operation], base: u64) -> ServerResult<Vec<OperationId>> {
        let version = self.version();
        if base > version {
            return Err(ServerError::VersionAhead {
                base,
                server: version,
            });
        }
        if base < self.oldest {
            return Err(ServerError::HistoryTruncated {
                base,
                oldest: self.oldest,
            });
        }

        let originals: HashMap<&OperationId, &Operation> = operations.iter().map(|op| (&op.id, op)).collect();

        // Concurrent entries, expressed on top of the client's own
        // operations that the history already holds.
        let mut bridge: Vec<Operation> = Vec::new();
        for entry in self.log.iter().skip((base - self.oldest) as usize) {
            match originals.get(&entry.id) {
                Some(original) => {
                    pass_through(original, &mut bridge);
                }
                None => bridge.push(entry.clone()),
            }
        }

        let mut staged = self.document.clone();
        let mut appended = Vec::new();
        let mut accepted = Vec::with_capacity(operations.len());
        for op in operations {
            if staged.has_applied(&op.id) {
                accepted.push(op.id.clone());
                continue;
            }
            let incoming = pass_through(op, &mut bridge);
            staged
                .apply_in_place(&incoming)
                .map_err(|source| ServerError::InvalidOperation {
                    operation: op.id.clone(),
                    source,
                })?;
            accepted.push(op.id.clone());
            appended.push(incoming);
        }

        self.document = staged;
        for op in appended {
            self.append(op);
        }
        Ok(accepted)
    }

    fn append(&mut self, op: Operation) {
        self.log.push_back(op);
        while self.log.len() > self.limit {
            self.log.pop_front();
            self.oldest += 1;
        }
    }
}

/// Transforms `op` through `bridge` and rewrites the bridge so that it
/// follows `op`.
fn pass_through(op: &Operation, bridge: &mut [Operation]) -> Operation {
    let mut current = op.clone();
    for entry in bridge.iter_mut() {
        let next = transform_against(&current, entry);
        *entry = transform_against(entry, &current);
        current = next;
    }
    current
}
