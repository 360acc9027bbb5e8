//! Sync engine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, OperationOrigin, SyncEvent, SyncEventKind};
use crate::snapshot::DocumentSnapshot;
use crate::state::{SyncPhase, SyncState};
use crate::transport::SyncTransport;
use concord_conflict::{ConflictData, ConflictId, ConflictResolver, ResolutionStrategy, ResolveError};
use concord_ot::{
    now_millis, transform_against, ApplyOutcome, Document, DocumentId, DocumentState, NodeId, Operation,
    OperationId, OperationKind, UserId,
};
use concord_sync_protocol::{FetchRequest, FetchResult, Handshake, HandshakeAck, Leave, PushRequest, SyncMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Operations sent to the server.
    pub pushed: usize,
    /// Remote operations integrated.
    pub fetched: usize,
    /// Pending operations acknowledged by their echo.
    pub acknowledged: usize,
    /// Conflicts detected.
    pub conflicts: usize,
    /// Pending operations dropped because they no longer fit.
    pub discarded: usize,
    /// Local edits issued to carry out conflict resolutions.
    pub follow_ups: usize,
    /// Whether the server rejected the push and pending work was replayed.
    pub rolled_back: bool,
    /// Wall time of the cycle.
    pub duration: Duration,
}

/// Result of [`SyncEngine::sync_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cycle ran to completion.
    Completed(SyncReport),
    /// Another cycle was already running. Nothing was done.
    AlreadySyncing,
    /// The document was closed while the cycle was in flight. Its results
    /// were dropped.
    Discarded,
}

/// What happened to one remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Integrated into the document.
    Applied,
    /// It was the echo of a pending operation.
    Acknowledged,
    /// Already integrated.
    Duplicate,
    /// Queued behind a conflict awaiting manual resolution.
    Deferred,
}

/// Sync statistics of one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Operations waiting for acknowledgement.
    pub pending_count: usize,
    /// Retained acknowledged operations.
    pub acknowledged_count: usize,
    /// Completion time of the last successful cycle, in milliseconds.
    pub last_sync_time: Option<u64>,
    /// Conflicts detected since the document was opened.
    pub conflict_count: usize,
}

/// Copy of a document and its sync state.
#[derive(Debug, Clone)]
pub struct DocumentView {
    /// The local replica.
    pub document: Document,
    /// Versions and queues.
    pub sync_state: SyncState,
    /// Lifecycle phase.
    pub phase: SyncPhase,
}

/// How to integrate a conflicting remote operation. The operation itself
/// always goes through the transform; resolutions only add local edits on
/// top, so every replica ends up with the server's sequence.
#[derive(Default)]
struct Decision {
    /// Manual conflict blocking integration.
    awaiting: Option<ConflictId>,
    /// Operations whose effect must hold after integration.
    winners: Vec<Operation>,
    /// Merged operations to apply after integration.
    merged: Vec<Operation>,
}

enum Integration {
    Applied,
    Acknowledged,
    Duplicate,
    Blocked(ConflictId),
}

struct DocumentSession {
    document: Document,
    state: SyncState,
    phase: SyncPhase,
    /// State sent with the handshake.
    base_state: DocumentState,
    handshake_done: bool,
    /// Remote operations held back by a manual conflict, in server order.
    deferred: VecDeque<Operation>,
    awaiting: Option<ConflictId>,
    reconcile_failures: u32,
    conflict_count: usize,
    timer: Option<JoinHandle<()>>,
}

impl DocumentSession {
    /// Server version including the deferred operations.
    fn received_version(&self) -> u64 {
        self.state.server_version + self.deferred.len() as u64
    }

    fn settle_phase(&mut self) {
        self.phase = if !self.handshake_done {
            SyncPhase::Initializing
        } else if self.awaiting.is_some() {
            SyncPhase::Conflicted
        } else if self.state.is_syncing {
            SyncPhase::Syncing
        } else {
            SyncPhase::Synced
        };
    }
}

type Session = Arc<Mutex<DocumentSession>>;

/// Keeps document replicas consistent with a server.
///
/// Each open document is a session behind its own lock. Validation,
/// transformation and application run under that lock; network calls
/// never do. Only one sync cycle per document runs at a time.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    user_id: UserId,
    transport: Arc<T>,
    resolver: Arc<ConflictResolver>,
    documents: RwLock<HashMap<DocumentId, Session>>,
    events: EventBus,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new engine.
    pub fn new(config: SyncConfig, user_id: impl Into<UserId>, transport: T, resolver: Arc<ConflictResolver>) -> Arc<Self> {
        Arc::new(Self {
            config,
            user_id: user_id.into(),
            transport: Arc::new(transport),
            resolver,
            documents: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the conflict resolver.
    pub fn resolver(&self) -> &Arc<ConflictResolver> {
        &self.resolver
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns true if the document is open.
    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.documents.read().contains_key(id)
    }

    /// Ids of all open documents.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.read().keys().cloned().collect()
    }

    fn session(&self, id: &DocumentId) -> SyncResult<Session> {
        self.documents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::DocumentNotFound(id.clone()))
    }

    /// Returns true if `session` is still the open session of `id`.
    fn is_current(&self, id: &DocumentId, session: &Session) -> bool {
        self.documents
            .read()
            .get(id)
            .map(|open| Arc::ptr_eq(open, session))
            .unwrap_or(false)
    }

    fn new_document(&self, id: &DocumentId, state: DocumentState, version: u64) -> SyncResult<Document> {
        Ok(Document::from_state(id.clone(), state, version)?
            .with_history(self.config.history_limit, self.config.compress_window.as_millis() as u64))
    }

    /// Opens a document, starts its sync timer and performs the initial
    /// handshake.
    ///
    /// A failed handshake leaves the document open and editable offline;
    /// the next cycle retries it.
    pub async fn initialize_document(self: &Arc<Self>, id: impl Into<DocumentId>, initial: DocumentState) -> SyncResult<()> {
        let id = id.into();
        let session = {
            let mut documents = self.documents.write();
            if documents.contains_key(&id) {
                return Err(SyncError::AlreadyInitialized(id));
            }
            let session = Arc::new(Mutex::new(DocumentSession {
                document: self.new_document(&id, initial.clone(), 0)?,
                state: SyncState::new(self.config.acknowledged_limit),
                phase: SyncPhase::Initializing,
                base_state: initial,
                handshake_done: false,
                deferred: VecDeque::new(),
                awaiting: None,
                reconcile_failures: 0,
                conflict_count: 0,
                timer: None,
            }));
            documents.insert(id.clone(), Arc::clone(&session));
            session
        };
        info!(document = %id, "document initialized");

        let timer = self.start_timer(&id);
        session.lock().timer = timer;

        if let Err(e) = self.handshake(&id, &session).await {
            warn!(document = %id, error = %e, "initial handshake failed, working offline");
            self.events.emit(
                &id,
                SyncEventKind::SyncError {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                },
            );
        }
        Ok(())
    }

    fn start_timer(self: &Arc<Self>, id: &DocumentId) -> Option<JoinHandle<()>> {
        let period = self.config.sync_interval?;
        let engine = Arc::downgrade(self);
        let id = id.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if !engine.is_open(&id) {
                    break;
                }
                if let Err(e) = engine.sync_document(&id).await {
                    debug!(document = %id, error = %e, "periodic sync failed");
                }
            }
        }))
    }

    /// Validates and applies a local operation, then queues it.
    ///
    /// Node creation and deletion and large deletes sync immediately, as
    /// does a full batch. Network failures of that sync are logged; the
    /// operation stays pending.
    pub async fn apply_local_operation(&self, id: &DocumentId, operation: Operation) -> SyncResult<Operation> {
        let session = self.session(id)?;
        let (captured, immediate) = {
            let mut s = session.lock();
            let captured = s.document.capture(&operation)?;
            if s.document.apply_in_place(&captured)? == ApplyOutcome::Duplicate {
                debug!(document = %id, operation = %captured.id, "local operation already applied");
                return Ok(captured);
            }
            s.state.pending_operations.push_back(captured.clone());
            s.state.local_version += 1;
            let immediate =
                self.is_high_impact(&captured) || s.state.pending_operations.len() >= self.config.batch_size;
            (captured, immediate)
        };

        self.events.emit(
            id,
            SyncEventKind::OperationApplied {
                operation_id: captured.id.clone(),
                origin: OperationOrigin::Local,
            },
        );

        if immediate {
            if let Err(e) = self.sync_document(id).await {
                warn!(document = %id, error = %e, "immediate sync failed, operations stay pending");
            }
        }
        Ok(captured)
    }

    fn is_high_impact(&self, op: &Operation) -> bool {
        match &op.kind {
            OperationKind::CreateNode { .. } | OperationKind::DeleteNode { .. } => true,
            OperationKind::Delete { length, .. } | OperationKind::Replace { length, .. } => {
                *length >= self.config.large_delete_threshold
            }
            _ => false,
        }
    }

    /// Integrates an operation received from the server as the next one
    /// in its stream.
    pub fn receive_remote_operation(&self, id: &DocumentId, operation: Operation) -> SyncResult<RemoteOutcome> {
        let session = self.session(id)?;
        let mut s = session.lock();
        let mut report = SyncReport::default();
        Ok(self.integrate_remote(id, &mut s, operation, &mut report))
    }

    /// Handles an inbound message pushed by the server.
    pub fn handle_message(&self, message: SyncMessage) -> SyncResult<()> {
        match message {
            SyncMessage::RemoteOperation(remote) => {
                let id = remote.document_id;
                let session = self.session(&id)?;
                let mut s = session.lock();
                let expected = s.received_version() + 1;
                if remote.server_version < expected {
                    debug!(document = %id, version = remote.server_version, "stale broadcast ignored");
                    return Ok(());
                }
                if remote.server_version > expected {
                    debug!(
                        document = %id,
                        version = remote.server_version,
                        expected,
                        "broadcast gap, waiting for the next fetch"
                    );
                    return Ok(());
                }
                let mut report = SyncReport::default();
                self.integrate_remote(&id, &mut s, remote.operation, &mut report);
                Ok(())
            }
            SyncMessage::Error(error) => {
                warn!(document = ?error.document_id, message = %error.message, "server reported an error");
                if let Some(id) = &error.document_id {
                    self.events.emit(
                        id,
                        SyncEventKind::SyncError {
                            message: error.message.clone(),
                            retryable: true,
                        },
                    );
                }
                Ok(())
            }
            other => Err(SyncError::Protocol(format!(
                "unexpected inbound message {:?}",
                other.message_type()
            ))),
        }
    }

    /// Integrates a remote operation, or queues it behind a pending manual
    /// conflict.
    fn integrate_remote(
        &self,
        id: &DocumentId,
        s: &mut DocumentSession,
        op: Operation,
        report: &mut SyncReport,
    ) -> RemoteOutcome {
        if s.awaiting.is_some() || !s.deferred.is_empty() {
            if !s.deferred.iter().any(|d| d.id == op.id) {
                s.deferred.push_back(op);
            }
            return RemoteOutcome::Deferred;
        }
        match self.integrate_now(id, s, &op, report) {
            Integration::Applied => RemoteOutcome::Applied,
            Integration::Acknowledged => RemoteOutcome::Acknowledged,
            Integration::Duplicate => RemoteOutcome::Duplicate,
            Integration::Blocked(conflict) => {
                info!(document = %id, conflict = %conflict, "waiting for manual resolution");
                s.awaiting = Some(conflict);
                s.state.has_conflicts = true;
                s.deferred.push_back(op);
                s.settle_phase();
                RemoteOutcome::Deferred
            }
        }
    }

    fn integrate_now(&self, id: &DocumentId, s: &mut DocumentSession, op: &Operation, report: &mut SyncReport) -> Integration {
        if s.state.acknowledge(&op.id) {
            s.state.server_version += 1;
            report.acknowledged += 1;
            return Integration::Acknowledged;
        }
        if s.state.is_acknowledged(&op.id) || s.document.has_applied(&op.id) {
            return Integration::Duplicate;
        }

        let conflicts = {
            let document = &s.document;
            let pending = s.state.pending_operations.make_contiguous();
            self.resolver.detect_between(id, op, pending, |node: &NodeId| {
                document.node_type(node).map(str::to_string)
            })
        };

        let decision = if conflicts.is_empty() {
            Decision::default()
        } else {
            report.conflicts += conflicts.len();
            self.decide(id, s, &conflicts)
        };
        if let Some(conflict) = decision.awaiting {
            return Integration::Blocked(conflict);
        }

        self.apply_remote(id, s, op.clone());
        report.fetched += 1;

        let after = op.timestamp;
        let follow_ups: Vec<Operation> = decision
            .winners
            .iter()
            .filter_map(|winner| self.enforce(&*s, winner, after))
            .chain(decision.merged)
            .collect();
        for follow_up in follow_ups {
            debug!(document = %id, operation = %follow_up.id, "applying conflict resolution");
            if self.push_local(id, s, follow_up).is_ok() {
                report.follow_ups += 1;
            }
        }
        Integration::Applied
    }

    /// Builds the local edit that restores the winner's attribute or field
    /// values, if integration left the node with different ones.
    fn enforce(&self, s: &DocumentSession, winner: &Operation, after: u64) -> Option<Operation> {
        let timestamp = now_millis().max(after.max(winner.timestamp) + 1);
        let record = s.document.nodes().get(winner.target_node()?)?;
        match &winner.kind {
            OperationKind::SetAttribute {
                node, name, value, ..
            } if record.attributes.get(name) != Some(value) => Some(Operation::set_attribute(
                self.user_id.clone(),
                timestamp,
                node.clone(),
                name.clone(),
                value.clone(),
            )),
            OperationKind::RemoveAttribute { node, name, .. } if record.attributes.contains_key(name) => Some(
                Operation::remove_attribute(self.user_id.clone(), timestamp, node.clone(), name.clone()),
            ),
            OperationKind::UpdateNode { node, fields, .. } => {
                let differing: Vec<(String, Option<serde_json::Value>)> = fields
                    .iter()
                    .filter(|&(key, value)| record.fields.get(key) != value.as_ref())
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                if differing.is_empty() {
                    None
                } else {
                    Some(Operation::update_node(self.user_id.clone(), timestamp, node.clone(), differing))
                }
            }
            _ => None,
        }
    }

    /// Captures, applies and queues a local edit.
    fn push_local(&self, id: &DocumentId, s: &mut DocumentSession, op: Operation) -> SyncResult<Operation> {
        let captured = s
            .document
            .capture(&op)
            .and_then(|captured| s.document.apply_in_place(&captured).map(|_| captured));
        match captured {
            Ok(captured) => {
                s.state.pending_operations.push_back(captured.clone());
                s.state.local_version += 1;
                self.events.emit(
                    id,
                    SyncEventKind::OperationApplied {
                        operation_id: captured.id.clone(),
                        origin: OperationOrigin::Local,
                    },
                );
                Ok(captured)
            }
            Err(e) => {
                warn!(document = %id, operation = %op.id, error = %e, "local edit does not fit the document");
                Err(SyncError::Validation(e))
            }
        }
    }

    /// Resolves each conflict with the configured strategy and collects the
    /// outcomes. Resolver failures fall back to last-writer-wins.
    fn decide(&self, id: &DocumentId, s: &mut DocumentSession, conflicts: &[ConflictData]) -> Decision {
        let mut decision = Decision::default();
        for conflict in conflicts {
            s.conflict_count += 1;
            self.events.emit(
                id,
                SyncEventKind::ConflictDetected {
                    conflict_id: conflict.id.clone(),
                    kind: conflict.kind,
                },
            );

            let strategy = self.config.strategy_for(conflict.kind);
            let resolved = match conflict.resolution.clone() {
                Some(existing) => Ok(existing),
                None => self.resolver.resolve(&conflict.id, strategy, None),
            };
            let resolution = match resolved {
                Ok(resolution) => resolution,
                Err(ResolveError::AwaitingManualResolution(conflict_id)) => {
                    decision.awaiting.get_or_insert(conflict_id);
                    continue;
                }
                Err(e) => {
                    warn!(
                        document = %id,
                        conflict = %conflict.id,
                        strategy = %strategy,
                        error = %e,
                        "resolution failed, falling back to last-writer-wins"
                    );
                    match self.resolver.resolve(&conflict.id, ResolutionStrategy::LastWriterWins, None) {
                        Ok(resolution) => resolution,
                        Err(e) => {
                            warn!(document = %id, conflict = %conflict.id, error = %e, "fallback failed, transforming");
                            continue;
                        }
                    }
                }
            };

            match (resolution.strategy, resolution.merged_operation) {
                (ResolutionStrategy::OperationalTransform, _) | (_, None) => {}
                (ResolutionStrategy::SemanticMerge | ResolutionStrategy::Manual, Some(merged)) => {
                    decision.merged.push(merged.with_id(OperationId::generate()));
                }
                (
                    ResolutionStrategy::LastWriterWins
                    | ResolutionStrategy::FirstWriterWins
                    | ResolutionStrategy::UserPriority,
                    Some(winner),
                ) => decision.winners.push(winner),
            }
        }
        decision
    }

    /// Transforms a remote operation through the pending queue (and the
    /// queue through it), then applies it.
    fn apply_remote(&self, id: &DocumentId, s: &mut DocumentSession, op: Operation) {
        let incoming = transform_through(op, s.state.pending_operations.make_contiguous());
        if let Err(e) = s.document.apply_in_place(&incoming) {
            warn!(document = %id, operation = %incoming.id, error = %e, "remote operation does not fit, applying as no-op");
            let voided = incoming.voided();
            if let Err(e) = s.document.apply_in_place(&voided) {
                warn!(document = %id, operation = %voided.id, error = %e, "no-op rejected");
            }
        }
        s.state.server_version += 1;
        self.events.emit(
            id,
            SyncEventKind::OperationApplied {
                operation_id: incoming.id.clone(),
                origin: OperationOrigin::Remote,
            },
        );
    }

    /// Drops the held-back remote operations and withdraws the conflict
    /// they wait on from the resolver. Returns true if there was one.
    fn abandon_conflict(&self, id: &DocumentId, s: &mut DocumentSession) -> bool {
        let awaiting = s.awaiting.take();
        let had_deferred = !s.deferred.is_empty();
        s.deferred.clear();
        s.state.has_conflicts = false;
        if let Some(conflict) = &awaiting {
            debug!(document = %id, conflict = %conflict, "manual conflict abandoned");
            self.resolver.dismiss(conflict);
        }
        awaiting.is_some() || had_deferred
    }

    /// Supplies the operation that resolves a conflict waiting for manual
    /// resolution.
    ///
    /// The held-back remote operation is integrated first, then the
    /// resolution is applied on top as a local edit so that it reaches the
    /// server like any other. Operations queued behind the conflict follow.
    pub fn resolve_conflict(&self, id: &DocumentId, conflict_id: &ConflictId, resolution: Operation) -> SyncResult<()> {
        let session = self.session(id)?;
        let mut s = session.lock();
        if s.awaiting.as_ref() != Some(conflict_id) {
            return Err(SyncError::Conflict(format!("{conflict_id} is not awaiting resolution")));
        }

        let resolved = self
            .resolver
            .resolve(conflict_id, ResolutionStrategy::Manual, Some(resolution.clone()))?
            .merged_operation
            .unwrap_or(resolution);
        s.awaiting = None;
        s.state.has_conflicts = false;

        if let Some(head) = s.deferred.pop_front() {
            self.apply_remote(id, &mut s, head);
        }

        let result = self.push_local(id, &mut s, resolved).map(|_| ());

        let mut report = SyncReport::default();
        while let Some(op) = s.deferred.pop_front() {
            if let Integration::Blocked(conflict) = self.integrate_now(id, &mut s, &op, &mut report) {
                s.deferred.push_front(op);
                s.awaiting = Some(conflict);
                s.state.has_conflicts = true;
                break;
            }
        }
        s.settle_phase();
        info!(document = %id, conflict = %conflict_id, "manual resolution applied");
        result
    }

    /// Runs one sync cycle: handshake if needed, push, then fetch.
    pub async fn sync_document(&self, id: &DocumentId) -> SyncResult<SyncOutcome> {
        let session = self.session(id)?;
        {
            let mut s = session.lock();
            if s.state.is_syncing {
                return Ok(SyncOutcome::AlreadySyncing);
            }
            if !s.phase.can_start_sync() {
                return Ok(SyncOutcome::Discarded);
            }
            s.state.is_syncing = true;
            s.settle_phase();
        }
        self.events.emit(id, SyncEventKind::SyncStart);
        debug!(document = %id, "sync started");

        let started = Instant::now();
        let result = self.run_cycle(id, &session).await;

        if !self.is_current(id, &session) {
            debug!(document = %id, "document closed during sync, results discarded");
            return Ok(SyncOutcome::Discarded);
        }
        {
            let mut s = session.lock();
            s.state.is_syncing = false;
            if matches!(result, Ok(Some(_))) {
                s.state.last_sync_timestamp = Some(now_millis());
            }
            s.settle_phase();
        }

        match result {
            Ok(Some(mut report)) => {
                report.duration = started.elapsed();
                debug!(
                    document = %id,
                    pushed = report.pushed,
                    fetched = report.fetched,
                    acknowledged = report.acknowledged,
                    "sync complete"
                );
                self.events.emit(
                    id,
                    SyncEventKind::SyncComplete {
                        pushed: report.pushed,
                        fetched: report.fetched,
                    },
                );
                Ok(SyncOutcome::Completed(report))
            }
            Ok(None) => Ok(SyncOutcome::Discarded),
            Err(e) => {
                warn!(document = %id, error = %e, "sync failed");
                self.events.emit(
                    id,
                    SyncEventKind::SyncError {
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    },
                );
                if matches!(e, SyncError::FatalSync { .. }) {
                    if let Err(full) = self.force_full_sync(id).await {
                        warn!(document = %id, error = %full, "full resync failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Body of a cycle. `Ok(None)` means the document was closed meanwhile.
    async fn run_cycle(&self, id: &DocumentId, session: &Session) -> SyncResult<Option<SyncReport>> {
        let mut report = SyncReport::default();

        let needs_handshake = !session.lock().handshake_done;
        if needs_handshake && !self.handshake(id, session).await? {
            return Ok(None);
        }

        let push = {
            let s = session.lock();
            if s.state.pending_operations.is_empty() {
                None
            } else {
                Some(PushRequest {
                    document_id: id.clone(),
                    operations: s.state.pending_operations.iter().cloned().collect(),
                    local_version: s.state.local_version,
                    server_version: s.state.server_version,
                })
            }
        };

        if let Some(request) = push {
            report.pushed = request.operations.len();
            let ack = match self.request(SyncMessage::Push(request)).await? {
                SyncMessage::PushAck(ack) => ack,
                other => return Err(unexpected(&other)),
            };
            if !self.is_current(id, session) {
                return Ok(None);
            }
            if let Some(reason) = ack.conflict {
                warn!(document = %id, reason = %reason, "server rejected push, rolling back");
                let since = session.lock().state.server_version;
                let Some(fetched) = self.fetch_all(id, session, since).await? else {
                    return Ok(None);
                };
                let mut s = session.lock();
                self.rollback(id, &mut s, since, fetched.operations, &mut report);
                report.rolled_back = true;
                self.check_version(id, &mut s, fetched.server_version)?;
                return Ok(Some(report));
            }
        }

        let mut since = session.lock().received_version();
        loop {
            let result = match self.fetch(id, since).await {
                Ok(result) => result,
                Err(SyncError::Rejected(message)) => {
                    let mut s = session.lock();
                    return Err(self.reconcile_failed(id, &mut s, SyncError::Rejected(message)));
                }
                Err(e) => return Err(e),
            };
            if !self.is_current(id, session) {
                return Ok(None);
            }

            let mut s = session.lock();
            let count = result.operations.len() as u64;
            for (version, op) in (since + 1..).zip(result.operations) {
                if version <= s.received_version() {
                    continue;
                }
                self.integrate_remote(id, &mut s, op, &mut report);
            }
            since += count;

            if !result.has_more || count == 0 {
                self.check_version(id, &mut s, result.server_version)?;
                return Ok(Some(report));
            }
        }
    }

    async fn fetch(&self, id: &DocumentId, since: u64) -> SyncResult<FetchResult> {
        let request = SyncMessage::Fetch(FetchRequest {
            document_id: id.clone(),
            since,
            limit: self.config.fetch_limit,
        });
        match self.request(request).await? {
            SyncMessage::FetchResult(result) => Ok(result),
            other => Err(unexpected(&other)),
        }
    }

    /// Fetches every page after `since` and returns them as one result.
    async fn fetch_all(&self, id: &DocumentId, session: &Session, since: u64) -> SyncResult<Option<FetchResult>> {
        let mut all = FetchResult {
            document_id: id.clone(),
            operations: Vec::new(),
            server_version: since,
            has_more: false,
        };
        loop {
            let page = self.fetch(id, since + all.operations.len() as u64).await?;
            if !self.is_current(id, session) {
                return Ok(None);
            }
            let done = !page.has_more || page.operations.is_empty();
            all.server_version = page.server_version;
            all.operations.extend(page.operations);
            if done {
                return Ok(Some(all));
            }
        }
    }

    /// Reverts the pending queue, integrates the authoritative operations
    /// and replays what is left of the queue on top.
    fn rollback(
        &self,
        id: &DocumentId,
        s: &mut DocumentSession,
        since: u64,
        fetched: Vec<Operation>,
        report: &mut SyncReport,
    ) {
        let mut pending: Vec<Operation> = s.state.pending_operations.drain(..).collect();
        for op in pending.iter().rev() {
            if let Err(e) = s.document.revert(op) {
                warn!(document = %id, operation = %op.id, error = %e, "could not revert pending operation");
            }
        }

        if self.abandon_conflict(id, s) {
            info!(document = %id, "manual conflict superseded by server state");
        }

        let mut foreign = Vec::new();
        for (version, op) in (since + 1..).zip(fetched) {
            if version <= s.state.server_version {
                continue;
            }
            if let Some(index) = pending.iter().position(|p| p.id == op.id) {
                let own = pending.remove(index);
                s.state.push_acknowledged(own);
                report.acknowledged += 1;
            } else {
                foreign.push(op.clone());
                report.fetched += 1;
            }
            if let Err(e) = s.document.apply_in_place(&op) {
                warn!(document = %id, operation = %op.id, error = %e, "server operation does not fit, applying as no-op");
                if let Err(e) = s.document.apply_in_place(&op.voided()) {
                    warn!(document = %id, operation = %op.id, error = %e, "no-op rejected");
                }
            }
            s.state.server_version += 1;
        }

        let rebased = pending
            .into_iter()
            .map(|op| transform_through(op, &mut foreign))
            .collect();
        report.discarded += self.replay(id, s, rebased);
        s.settle_phase();
    }

    /// Re-applies operations on the current state. Operations that no
    /// longer fit are dropped and counted.
    fn replay(&self, id: &DocumentId, s: &mut DocumentSession, operations: Vec<Operation>) -> usize {
        let mut discarded = 0;
        for op in operations {
            let replayed = s
                .document
                .capture(&op)
                .and_then(|captured| s.document.apply_in_place(&captured).map(|_| captured));
            match replayed {
                Ok(captured) => s.state.pending_operations.push_back(captured),
                Err(e) => {
                    warn!(document = %id, operation = %op.id, error = %e, "pending operation discarded");
                    discarded += 1;
                }
            }
        }
        discarded
    }

    fn check_version(&self, id: &DocumentId, s: &mut DocumentSession, server_version: u64) -> SyncResult<()> {
        let reached = s.received_version();
        if reached == server_version {
            s.reconcile_failures = 0;
            return Ok(());
        }
        warn!(document = %id, local = reached, server = server_version, "server version not reached");
        let err = SyncError::ServerConflict(format!("server version {server_version}, local {reached}"));
        Err(self.reconcile_failed(id, s, err))
    }

    /// Counts a failed reconciliation and escalates once the limit is hit.
    fn reconcile_failed(&self, id: &DocumentId, s: &mut DocumentSession, error: SyncError) -> SyncError {
        s.reconcile_failures += 1;
        if s.reconcile_failures >= self.config.max_reconcile_failures {
            return SyncError::FatalSync {
                document: id.clone(),
                reason: format!("{} failed reconciliations, last: {error}", s.reconcile_failures),
            };
        }
        error
    }

    /// Sends a handshake and rebases the document on the answer. Returns
    /// false if the document was closed meanwhile.
    async fn handshake(&self, id: &DocumentId, session: &Session) -> SyncResult<bool> {
        let request = {
            let s = session.lock();
            let pending = s.state.pending_operations.iter().map(|op| op.id.clone()).collect();
            Handshake::new(id.clone(), self.user_id.clone(), s.base_state.clone()).with_pending(pending)
        };
        let ack = match self.request(SyncMessage::Handshake(request)).await? {
            SyncMessage::HandshakeAck(ack) => ack,
            other => return Err(unexpected(&other)),
        };
        if !self.is_current(id, session) {
            return Ok(false);
        }
        let mut s = session.lock();
        self.rebase(id, &mut s, ack)?;
        Ok(true)
    }

    /// Replaces the replica with the server state and replays the pending
    /// operations the server does not hold yet.
    fn rebase(&self, id: &DocumentId, s: &mut DocumentSession, ack: HandshakeAck) -> SyncResult<()> {
        let document = self.new_document(id, ack.state.clone(), ack.server_version)?;
        let pending: Vec<Operation> = s.state.pending_operations.drain(..).collect();
        let (known, replay): (Vec<Operation>, Vec<Operation>) =
            pending.into_iter().partition(|op| ack.acknowledged.contains(&op.id));

        s.document = document;
        s.base_state = ack.state;
        s.state.server_version = ack.server_version;
        s.state.local_version = 0;
        self.abandon_conflict(id, s);
        for op in known {
            s.state.push_acknowledged(op);
        }
        let discarded = self.replay(id, s, replay);
        s.state.local_version = s.state.pending_operations.len() as u64;
        s.handshake_done = true;
        s.reconcile_failures = 0;
        s.settle_phase();
        info!(
            document = %id,
            version = s.state.server_version,
            pending = s.state.pending_operations.len(),
            discarded,
            "document rebased on server state"
        );
        Ok(())
    }

    /// Drops versions and acknowledged history, then handshakes again.
    /// Pending operations that do not fit the refreshed state are
    /// discarded.
    pub async fn force_full_sync(&self, id: &DocumentId) -> SyncResult<()> {
        let session = self.session(id)?;
        {
            let mut s = session.lock();
            warn!(document = %id, pending = s.state.pending_operations.len(), "forcing full sync");
            s.state.server_version = 0;
            s.state.local_version = 0;
            s.state.acknowledged_operations.clear();
            s.handshake_done = false;
            s.reconcile_failures = 0;
            s.settle_phase();
        }
        if !self.handshake(id, &session).await? {
            return Err(SyncError::DocumentNotFound(id.clone()));
        }
        Ok(())
    }

    async fn request(&self, message: SyncMessage) -> SyncResult<SyncMessage> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.transport.send_with_response(message, timeout)).await {
            Err(_) => Err(SyncError::Timeout),
            Ok(Ok(SyncMessage::Error(error))) => Err(SyncError::Rejected(error.message)),
            Ok(result) => result,
        }
    }

    /// Captures the document and its versions.
    pub fn create_snapshot(&self, id: &DocumentId) -> SyncResult<DocumentSnapshot> {
        let session = self.session(id)?;
        let s = session.lock();
        Ok(DocumentSnapshot::capture(
            &s.document,
            s.state.server_version,
            s.state.local_version,
        ))
    }

    /// Restores an open document from a snapshot. Pending and acknowledged
    /// queues start empty.
    pub fn restore_snapshot(&self, snapshot: &DocumentSnapshot) -> SyncResult<()> {
        let id = &snapshot.document_id;
        let session = self.session(id)?;
        let document =
            snapshot.to_document(self.config.history_limit, self.config.compress_window.as_millis() as u64)?;
        let mut s = session.lock();
        if !s.state.pending_operations.is_empty() {
            warn!(
                document = %id,
                dropped = s.state.pending_operations.len(),
                "restoring snapshot drops pending operations"
            );
        }
        s.document = document;
        s.state.server_version = snapshot.server_version;
        s.state.local_version = snapshot.local_version;
        s.state.pending_operations.clear();
        s.state.acknowledged_operations.clear();
        self.abandon_conflict(id, &mut s);
        s.reconcile_failures = 0;
        s.settle_phase();
        info!(document = %id, version = snapshot.version, "snapshot restored");
        Ok(())
    }

    /// Returns a copy of the document and its sync state.
    pub fn get_document_state(&self, id: &DocumentId) -> SyncResult<DocumentView> {
        let session = self.session(id)?;
        let s = session.lock();
        Ok(DocumentView {
            document: s.document.clone(),
            sync_state: s.state.clone(),
            phase: s.phase,
        })
    }

    /// Returns the sync statistics of a document.
    pub fn get_sync_stats(&self, id: &DocumentId) -> SyncResult<SyncStats> {
        let session = self.session(id)?;
        let s = session.lock();
        Ok(SyncStats {
            pending_count: s.state.pending_operations.len(),
            acknowledged_count: s.state.acknowledged_operations.len(),
            last_sync_time: s.state.last_sync_timestamp,
            conflict_count: s.conflict_count,
        })
    }

    /// Closes a document: stops its timer, drops its state and tells the
    /// server. Cycles still in flight discard their results.
    pub fn cleanup_document(&self, id: &DocumentId) -> SyncResult<()> {
        let session = self
            .documents
            .write()
            .remove(id)
            .ok_or_else(|| SyncError::DocumentNotFound(id.clone()))?;
        let timer = {
            let mut s = session.lock();
            self.abandon_conflict(id, &mut s);
            s.phase = SyncPhase::Uninitialized;
            s.timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        let leave = SyncMessage::Leave(Leave {
            document_id: id.clone(),
            user_id: self.user_id.clone(),
        });
        if let Err(e) = self.transport.send(leave) {
            debug!(document = %id, error = %e, "leave not delivered");
        }
        info!(document = %id, "document closed");
        Ok(())
    }
}

impl<T: SyncTransport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("user_id", &self.user_id)
            .field("documents", &self.documents.read().len())
            .field("events", &self.events)
            .finish()
    }
}

/// Transforms `op` past each of `others` and rewrites them to apply after it.
fn transform_through(op: Operation, others: &mut [Operation]) -> Operation {
    let mut op = op;
    for other in others.iter_mut() {
        let next = transform_against(&op, other);
        *other = transform_against(other, &op);
        op = next;
    }
    op
}

fn unexpected(message: &SyncMessage) -> SyncError {
    SyncError::Protocol(format!("unexpected response {:?}", message.message_type()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use concord_ot::{NodeSpec, OperationId};
    use concord_sync_protocol::{MessageType, PushAck, RemoteOperation, PROTOCOL_VERSION};

    fn doc() -> DocumentId {
        DocumentId::new("doc")
    }

    fn engine_with(config: SyncConfig) -> Arc<SyncEngine<MockTransport>> {
        SyncEngine::new(
            config.without_sync_timer(),
            "alice",
            MockTransport::new(),
            Arc::new(ConflictResolver::default()),
        )
    }

    fn engine() -> Arc<SyncEngine<MockTransport>> {
        engine_with(SyncConfig::new())
    }

    fn handshake_ack(content: &str, version: u64) -> SyncResult<SyncMessage> {
        Ok(SyncMessage::HandshakeAck(HandshakeAck {
            document_id: doc(),
            protocol_version: PROTOCOL_VERSION,
            state: DocumentState::text(content),
            server_version: version,
            acknowledged: Vec::new(),
        }))
    }

    fn push_ack(accepted: &[&Operation], version: u64, conflict: Option<&str>) -> SyncResult<SyncMessage> {
        Ok(SyncMessage::PushAck(PushAck {
            document_id: doc(),
            accepted: accepted.iter().map(|op| op.id.clone()).collect(),
            server_version: version,
            conflict: conflict.map(str::to_string),
        }))
    }

    fn fetch_result(operations: Vec<Operation>, version: u64) -> SyncResult<SyncMessage> {
        Ok(SyncMessage::FetchResult(FetchResult {
            document_id: doc(),
            operations,
            server_version: version,
            has_more: false,
        }))
    }

    fn remote(operation: Operation, version: u64) -> SyncMessage {
        SyncMessage::RemoteOperation(RemoteOperation {
            document_id: doc(),
            operation,
            server_version: version,
        })
    }

    async fn open(engine: &Arc<SyncEngine<MockTransport>>, content: &str) {
        engine.transport().push_response(handshake_ack(content, 0));
        engine
            .initialize_document(doc(), DocumentState::text(content))
            .await
            .unwrap();
    }

    fn content(engine: &SyncEngine<MockTransport>) -> String {
        engine.get_document_state(&doc()).unwrap().document.content().to_string()
    }

    #[tokio::test]
    async fn handshake_adopts_server_state() {
        let engine = engine();
        engine.transport().push_response(handshake_ack("server text", 4));
        engine
            .initialize_document(doc(), DocumentState::text("local"))
            .await
            .unwrap();

        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.document.content(), "server text");
        assert_eq!(view.sync_state.server_version, 4);
        assert_eq!(view.phase, SyncPhase::Synced);
        assert_eq!(engine.transport().sent_of(MessageType::Handshake).len(), 1);
    }

    #[tokio::test]
    async fn double_initialize_fails() {
        let engine = engine();
        open(&engine, "abc").await;

        let err = engine
            .initialize_document(doc(), DocumentState::text("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyInitialized(_)));
        assert_eq!(engine.document_ids(), vec![doc()]);
    }

    #[tokio::test]
    async fn offline_edits_survive_a_late_handshake() {
        let engine = engine();
        engine.transport().set_connected(false);
        engine
            .initialize_document(doc(), DocumentState::text("abc"))
            .await
            .unwrap();
        assert_eq!(engine.get_document_state(&doc()).unwrap().phase, SyncPhase::Initializing);

        let op = engine
            .apply_local_operation(&doc(), Operation::insert("alice", 10, 0, "X"))
            .await
            .unwrap();
        assert_eq!(content(&engine), "Xabc");

        engine.transport().set_connected(true);
        engine.transport().push_response(handshake_ack("abc", 0));
        engine.transport().push_response(push_ack(&[&op], 1, None));
        engine.transport().push_response(fetch_result(vec![op.clone()], 1));

        let SyncOutcome::Completed(report) = engine.sync_document(&doc()).await.unwrap() else {
            panic!("cycle did not complete");
        };
        assert_eq!(report.pushed, 1);
        assert_eq!(report.acknowledged, 1);

        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.document.content(), "Xabc");
        assert!(view.sync_state.pending_operations.is_empty());
        assert_eq!(view.sync_state.server_version, 1);
        assert_eq!(view.phase, SyncPhase::Synced);
        assert!(view.sync_state.last_sync_timestamp.is_some());
    }

    #[tokio::test]
    async fn invalid_local_operation_is_rejected() {
        let engine = engine();
        open(&engine, "abc").await;

        let err = engine
            .apply_local_operation(&doc(), Operation::delete("alice", 1, 2, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(!err.is_retryable());
        assert_eq!(engine.get_sync_stats(&doc()).unwrap().pending_count, 0);
        assert_eq!(content(&engine), "abc");
    }

    #[tokio::test]
    async fn structural_edits_sync_immediately() {
        let engine = engine();
        open(&engine, "abc").await;

        engine.transport().push_response(push_ack(&[], 1, None));
        engine.transport().push_response(fetch_result(Vec::new(), 0));
        engine
            .apply_local_operation(
                &doc(),
                Operation::create_node("alice", 1, None, 0, NodeSpec::new("p1", "paragraph")),
            )
            .await
            .unwrap();
        assert_eq!(engine.transport().sent_of(MessageType::Push).len(), 1);

        engine
            .apply_local_operation(&doc(), Operation::insert("alice", 2, 3, "d"))
            .await
            .unwrap();
        assert_eq!(engine.transport().sent_of(MessageType::Push).len(), 1);
        assert_eq!(engine.get_sync_stats(&doc()).unwrap().pending_count, 2);
    }

    #[tokio::test]
    async fn full_batch_triggers_sync() {
        let engine = engine_with(SyncConfig::new().with_batch_size(2));
        open(&engine, "").await;
        engine.transport().set_responder(|message| match message {
            SyncMessage::Push(push) => push_ack(&push.operations.iter().collect::<Vec<_>>(), 0, None),
            _ => fetch_result(Vec::new(), 0),
        });

        engine
            .apply_local_operation(&doc(), Operation::insert("alice", 1, 0, "a"))
            .await
            .unwrap();
        assert!(engine.transport().sent_of(MessageType::Push).is_empty());
        engine
            .apply_local_operation(&doc(), Operation::insert("alice", 2, 1, "b"))
            .await
            .unwrap();
        assert_eq!(engine.transport().sent_of(MessageType::Push).len(), 1);
    }

    #[tokio::test]
    async fn remote_operation_is_transformed_through_pending() {
        let engine = engine();
        open(&engine, "abc").await;
        let events = engine.subscribe();

        engine
            .apply_local_operation(&doc(), Operation::insert("alice", 100, 1, "X").with_id("a1"))
            .await
            .unwrap();
        engine
            .handle_message(remote(Operation::insert("bob", 100, 1, "Y").with_id("b1"), 1))
            .unwrap();

        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.document.content(), "aXYbc");
        assert_eq!(view.sync_state.server_version, 1);
        assert_eq!(view.sync_state.pending_operations[0].position(), Some(1));

        let origins: Vec<OperationOrigin> = events
            .try_iter()
            .filter_map(|event| match event.kind {
                SyncEventKind::OperationApplied { origin, .. } => Some(origin),
                _ => None,
            })
            .collect();
        assert_eq!(origins, vec![OperationOrigin::Local, OperationOrigin::Remote]);
    }

    #[tokio::test]
    async fn echoes_duplicates_and_gaps() {
        let engine = engine();
        open(&engine, "abc").await;

        let own = engine
            .apply_local_operation(&doc(), Operation::insert("alice", 1, 3, "d"))
            .await
            .unwrap();

        engine.handle_message(remote(own.clone(), 1)).unwrap();
        let stats = engine.get_sync_stats(&doc()).unwrap();
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.acknowledged_count, 1);

        // Stale redelivery.
        engine.handle_message(remote(own.clone(), 1)).unwrap();
        assert_eq!(
            engine.receive_remote_operation(&doc(), own).unwrap(),
            RemoteOutcome::Duplicate
        );

        // Version 2 is missing.
        engine
            .handle_message(remote(Operation::insert("bob", 5, 0, "Z"), 3))
            .unwrap();

        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.document.content(), "abcd");
        assert_eq!(view.sync_state.server_version, 1);
    }

    #[tokio::test]
    async fn unexpected_inbound_message() {
        let engine = engine();
        open(&engine, "abc").await;
        let err = engine
            .handle_message(SyncMessage::Leave(Leave {
                document_id: doc(),
                user_id: UserId::new("bob"),
            }))
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[tokio::test]
    async fn snapshot_and_restore() {
        let engine = engine();
        open(&engine, "abc").await;

        engine
            .apply_local_operation(&doc(), Operation::insert("alice", 1, 3, "d"))
            .await
            .unwrap();
        let snapshot = engine.create_snapshot(&doc()).unwrap();
        assert_eq!(snapshot.state.content, "abcd");
        assert_eq!(snapshot.local_version, 1);

        engine
            .apply_local_operation(&doc(), Operation::insert("alice", 2, 0, "Z"))
            .await
            .unwrap();
        assert_eq!(content(&engine), "Zabcd");

        engine.restore_snapshot(&snapshot).unwrap();
        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.document.content(), "abcd");
        assert!(view.sync_state.pending_operations.is_empty());
        assert_eq!(view.sync_state.local_version, 1);
    }

    #[tokio::test]
    async fn server_conflict_rolls_back_and_replays() {
        let engine = engine();
        open(&engine, "abc").await;

        let own = engine
            .apply_local_operation(&doc(), Operation::insert("alice", 10, 0, "X").with_id("a1"))
            .await
            .unwrap();

        engine
            .transport()
            .push_response(push_ack(&[], 1, Some("base version 3 is ahead of server version 1")));
        engine.transport().push_response(fetch_result(
            vec![Operation::insert("bob", 5, 3, "Z").with_id("b1")],
            1,
        ));

        let SyncOutcome::Completed(report) = engine.sync_document(&doc()).await.unwrap() else {
            panic!("cycle did not complete");
        };
        assert!(report.rolled_back);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.discarded, 0);

        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.document.content(), "XabcZ");
        assert_eq!(view.sync_state.server_version, 1);
        assert_eq!(view.sync_state.pending_operations.len(), 1);
        assert_eq!(view.sync_state.pending_operations[0].id, own.id);
    }

    #[tokio::test]
    async fn repeated_version_mismatch_forces_full_sync() {
        let engine = engine();
        open(&engine, "abc").await;
        engine.transport().set_responder(|message| match message {
            SyncMessage::Handshake(_) => handshake_ack("server", 5),
            _ => fetch_result(Vec::new(), 5),
        });

        for _ in 0..2 {
            let err = engine.sync_document(&doc()).await.unwrap_err();
            assert!(matches!(err, SyncError::ServerConflict(_)));
        }
        let err = engine.sync_document(&doc()).await.unwrap_err();
        assert!(matches!(err, SyncError::FatalSync { .. }));

        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.document.content(), "server");
        assert_eq!(view.sync_state.server_version, 5);
        assert_eq!(engine.transport().sent_of(MessageType::Handshake).len(), 2);
    }

    #[tokio::test]
    async fn rejected_requests_surface_as_errors() {
        let engine = engine();
        open(&engine, "abc").await;
        engine.transport().set_responder(|message| {
            Ok(SyncMessage::Error(concord_sync_protocol::ErrorMessage::new(
                message.document_id().cloned(),
                "history truncated",
            )))
        });

        let err = engine.sync_document(&doc()).await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.get_document_state(&doc()).unwrap().phase, SyncPhase::Synced);
    }

    #[tokio::test]
    async fn resolve_requires_an_awaited_conflict() {
        let engine = engine();
        open(&engine, "abc").await;
        let err = engine
            .resolve_conflict(
                &doc(),
                &ConflictId::from_operations([&OperationId::new("x"), &OperationId::new("y")]),
                Operation::insert("alice", 1, 0, "Q"),
            )
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    async fn open_heading(engine: &Arc<SyncEngine<MockTransport>>) {
        engine.transport().push_response(Ok(SyncMessage::HandshakeAck(HandshakeAck {
            document_id: doc(),
            protocol_version: PROTOCOL_VERSION,
            state: DocumentState {
                content: String::new(),
                nodes: vec![NodeSpec::new("title", "heading")],
            },
            server_version: 0,
            acknowledged: Vec::new(),
        })));
        engine
            .initialize_document(doc(), DocumentState::text(""))
            .await
            .unwrap();
    }

    fn title_color(engine: &SyncEngine<MockTransport>) -> Option<serde_json::Value> {
        let view = engine.get_document_state(&doc()).unwrap();
        view.document
            .nodes()
            .get(&NodeId::new("title"))
            .and_then(|node| node.attributes.get("color").cloned())
    }

    async fn color_clash(strategy: ResolutionStrategy) -> Arc<SyncEngine<MockTransport>> {
        let engine = engine_with(SyncConfig::new().with_strategy(concord_conflict::ConflictKind::Attribute, strategy));
        open_heading(&engine).await;
        engine
            .apply_local_operation(
                &doc(),
                Operation::set_attribute("alice", 200, "title", "color", serde_json::json!("blue")),
            )
            .await
            .unwrap();
        engine
            .handle_message(remote(
                Operation::set_attribute("bob", 100, "title", "color", serde_json::json!("red")),
                1,
            ))
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn last_writer_wins_keeps_the_newer_local_write() {
        let engine = color_clash(ResolutionStrategy::LastWriterWins).await;

        assert_eq!(title_color(&engine), Some(serde_json::json!("blue")));
        let stats = engine.get_sync_stats(&doc()).unwrap();
        assert_eq!(stats.conflict_count, 1);
        assert_eq!(stats.pending_count, 1);
        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.sync_state.server_version, 1);
    }

    #[tokio::test]
    async fn first_writer_wins_issues_a_follow_up_edit() {
        let engine = color_clash(ResolutionStrategy::FirstWriterWins).await;

        assert_eq!(title_color(&engine), Some(serde_json::json!("red")));
        let view = engine.get_document_state(&doc()).unwrap();
        assert_eq!(view.sync_state.server_version, 1);
        assert_eq!(view.sync_state.pending_operations.len(), 2);
        let follow_up = view.sync_state.pending_operations.back().unwrap();
        assert_eq!(follow_up.user_id.as_str(), "alice");
        assert!(follow_up.timestamp > 200);
        assert!(matches!(
            &follow_up.kind,
            OperationKind::SetAttribute { name, value, .. }
                if name == "color" && value == &serde_json::json!("red")
        ));
    }

    #[tokio::test]
    async fn rollback_dismisses_an_awaited_conflict() {
        let engine = color_clash(ResolutionStrategy::Manual).await;
        assert_eq!(engine.resolver().pending_conflicts().len(), 1);
        assert_eq!(title_color(&engine), Some(serde_json::json!("blue")));

        engine
            .transport()
            .push_response(push_ack(&[], 1, Some("base version 0 is stale")));
        engine.transport().push_response(fetch_result(
            vec![Operation::set_attribute("bob", 100, "title", "color", serde_json::json!("red"))],
            1,
        ));
        let SyncOutcome::Completed(report) = engine.sync_document(&doc()).await.unwrap() else {
            panic!("cycle did not complete");
        };
        assert!(report.rolled_back);

        assert!(engine.resolver().pending_conflicts().is_empty());
        assert_eq!(engine.resolver().stats().pending, 0);
        let view = engine.get_document_state(&doc()).unwrap();
        assert!(!view.sync_state.has_conflicts);
        assert_eq!(view.sync_state.server_version, 1);
        assert_eq!(view.sync_state.pending_operations.len(), 1);
        assert_eq!(title_color(&engine), Some(serde_json::json!("blue")));
    }

    #[tokio::test]
    async fn cleanup_sends_leave() {
        let engine = engine();
        open(&engine, "abc").await;

        engine.cleanup_document(&doc()).unwrap();
        assert!(!engine.is_open(&doc()));
        assert_eq!(engine.transport().sent_of(MessageType::Leave).len(), 1);
        assert!(matches!(
            engine.get_document_state(&doc()),
            Err(SyncError::DocumentNotFound(_))
        ));
        assert!(matches!(
            engine.cleanup_document(&doc()),
            Err(SyncError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn sync_events_are_published() {
        let engine = engine();
        open(&engine, "abc").await;
        let events = engine.subscribe();

        engine.transport().push_response(fetch_result(Vec::new(), 0));
        engine.sync_document(&doc()).await.unwrap();

        let names: Vec<&str> = events.try_iter().map(|event| event.kind.name()).collect();
        assert_eq!(names, vec!["sync-start", "sync-complete"]);
    }
}
