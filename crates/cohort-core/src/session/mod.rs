//! Conversational sessions
//!
//! The per-user workflow state machine driving the end-to-end flow:
//! data-type choice -> query -> candidate variables -> confirmation ->
//! clustering -> segments. Sessions store variable codes only and rehydrate
//! them against the current catalog snapshot, which keeps them decoupled
//! from catalog reloads.
//!
//! Within one session, operations serialize behind the session's mutex;
//! different sessions have no ordering guarantee. Idle sessions are evicted
//! after a TTL by a periodic sweep and lazily on access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::VariableType;
use crate::service::{RetrievalService, SearchRequest, SearchResponse, ServiceError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Clustering collaborator error
#[derive(Debug, thiserror::Error)]
#[error("Clustering failed: {0}")]
pub struct ClusterError(pub String);

/// Session error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session with that id (never created, evicted, or terminated)
    #[error("Unknown session: {0}")]
    UnknownSession(String),
    /// The event is not permitted in the current state; state is unchanged
    #[error("Event '{event}' is not valid in state {state}")]
    InvalidSessionState { state: SessionState, event: &'static str },
    /// confirmVariables named codes outside candidates and prior confirmations
    #[error("Unknown variables: {0:?}")]
    UnknownVariables(Vec<String>),
    /// The clustering collaborator failed
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    /// Segment sizes violate the balance contract
    #[error("Unbalanced segments: largest {largest} vs smallest {smallest}")]
    UnbalancedSegments { largest: u64, smallest: u64 },
    /// Retrieval failed; the session kept its prior state
    #[error(transparent)]
    Retrieval(#[from] ServiceError),
}

/// Session result type
pub type Result<T> = std::result::Result<T, SessionError>;

// ============================================================================
// STATES AND EVENTS
// ============================================================================

/// Workflow states. Transitions outside the permitted table fail with
/// `InvalidSessionState` and leave the state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingDataType,
    AwaitingQuery,
    CandidatesPresented,
    VariablesConfirmed,
    SegmentsComputed,
    DistributionReady,
    Terminal,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::AwaitingDataType => "awaiting_data_type",
            SessionState::AwaitingQuery => "awaiting_query",
            SessionState::CandidatesPresented => "candidates_presented",
            SessionState::VariablesConfirmed => "variables_confirmed",
            SessionState::SegmentsComputed => "segments_computed",
            SessionState::DistributionReady => "distribution_ready",
            SessionState::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the audience data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudienceSource {
    FirstParty,
    ThirdParty,
    CleanRoom,
}

impl AudienceSource {
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "first-party" => Some(AudienceSource::FirstParty),
            "third-party" => Some(AudienceSource::ThirdParty),
            "clean-room" => Some(AudienceSource::CleanRoom),
            _ => None,
        }
    }
}

/// The data-type selection made at the start of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeChoice {
    pub source: AudienceSource,
    pub sub_source: String,
}

/// A candidate retained on the session: code plus the score it carried when
/// presented. Rehydrated against the current snapshot when needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRef {
    pub code: String,
    pub fused_score: f32,
}

/// One accepted workflow event, for the session's turn log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub at: DateTime<Utc>,
    pub event: String,
    pub summary: String,
}

// ============================================================================
// CLUSTERING CONTRACT
// ============================================================================

/// A variable handed to the clustering collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterVariable {
    pub code: String,
    pub name: String,
    pub data_type: VariableType,
}

/// Input contract for the external clusterer: records are clustered along
/// the confirmed variables into balanced segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub variables: Vec<ClusterVariable>,
    /// Caller hint; the clusterer may choose its own count
    pub segment_hint: Option<usize>,
}

/// One audience segment produced by clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub label: String,
    pub size: u64,
    /// Per-variable centroid values keyed by variable code
    pub centroid: HashMap<String, f64>,
}

/// The downstream clustering algorithm is an external collaborator; only
/// its contract lives here. Implementations must produce balanced segments:
/// no segment larger than twice the smallest.
#[async_trait]
pub trait SegmentClusterer: Send + Sync {
    async fn cluster(&self, request: ClusterRequest) -> std::result::Result<Vec<Segment>, ClusterError>;
}

/// Balance contract check: largest segment at most twice the smallest.
fn validate_balance(segments: &[Segment]) -> Result<()> {
    let sizes: Vec<u64> = segments.iter().map(|s| s.size).filter(|&s| s > 0).collect();
    if sizes.len() < 2 {
        return Ok(());
    }
    let largest = *sizes.iter().max().unwrap_or(&0);
    let smallest = *sizes.iter().min().unwrap_or(&0);
    if largest > smallest.saturating_mul(2) {
        return Err(SessionError::UnbalancedSegments { largest, smallest });
    }
    Ok(())
}

// ============================================================================
// SESSION
// ============================================================================

/// One conversational workflow. Mutated only behind its store mutex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    pub state: SessionState,
    pub data_type: Option<DataTypeChoice>,
    pub last_query: Option<String>,
    pub candidates: Vec<CandidateRef>,
    pub confirmed_variables: Vec<String>,
    pub segments: Vec<Segment>,
    pub history: Vec<TurnRecord>,
}

impl Session {
    fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_touched_at: now,
            state: SessionState::AwaitingDataType,
            data_type: None,
            last_query: None,
            candidates: Vec::new(),
            confirmed_variables: Vec::new(),
            segments: Vec::new(),
            history: Vec::new(),
        }
    }

    fn touch(&mut self) {
        self.last_touched_at = Utc::now();
    }

    fn record(&mut self, event: &'static str, summary: String) {
        self.history.push(TurnRecord { at: Utc::now(), event: event.to_string(), summary });
        self.touch();
    }

    fn require_state(&self, allowed: &[SessionState], event: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidSessionState { state: self.state, event })
        }
    }

    /// AwaitingDataType -> AwaitingQuery
    pub fn select_data_type(&mut self, choice: DataTypeChoice) -> Result<()> {
        self.require_state(&[SessionState::AwaitingDataType], "selectDataType")?;
        let summary = format!("{:?} / {}", choice.source, choice.sub_source);
        self.data_type = Some(choice);
        self.state = SessionState::AwaitingQuery;
        self.record("selectDataType", summary);
        Ok(())
    }

    /// AwaitingQuery | CandidatesPresented | VariablesConfirmed ->
    /// CandidatesPresented. Confirmed variables survive re-runs.
    pub fn present_candidates(
        &mut self,
        event: &'static str,
        allowed: &[SessionState],
        query: &str,
        candidates: Vec<CandidateRef>,
    ) -> Result<()> {
        self.require_state(allowed, event)?;
        self.last_query = Some(query.to_string());
        let summary = format!("{} candidates for '{query}'", candidates.len());
        self.candidates = candidates;
        self.state = SessionState::CandidatesPresented;
        self.record(event, summary);
        Ok(())
    }

    /// CandidatesPresented -> VariablesConfirmed. The selection must come
    /// from the presented candidates or earlier confirmations; the stored
    /// set is the union of both.
    pub fn confirm_variables(&mut self, codes: &[String]) -> Result<()> {
        self.require_state(&[SessionState::CandidatesPresented], "confirmVariables")?;

        let unknown: Vec<String> = codes
            .iter()
            .filter(|code| {
                !self.candidates.iter().any(|c| &c.code == *code)
                    && !self.confirmed_variables.contains(code)
            })
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(SessionError::UnknownVariables(unknown));
        }

        for code in codes {
            if !self.confirmed_variables.contains(code) {
                self.confirmed_variables.push(code.clone());
            }
        }
        self.state = SessionState::VariablesConfirmed;
        self.record("confirmVariables", format!("{} confirmed", self.confirmed_variables.len()));
        Ok(())
    }

    /// VariablesConfirmed -> SegmentsComputed. Segments come from the
    /// clustering collaborator; after this transition the confirmed set is
    /// frozen.
    pub fn store_segments(&mut self, segments: Vec<Segment>) -> Result<()> {
        self.require_state(&[SessionState::VariablesConfirmed], "computeSegments")?;
        validate_balance(&segments)?;
        let summary = format!("{} segments", segments.len());
        self.segments = segments;
        self.state = SessionState::SegmentsComputed;
        self.record("computeSegments", summary);
        Ok(())
    }

    /// SegmentsComputed -> DistributionReady (segments frozen for export).
    pub fn accept_segments(&mut self) -> Result<()> {
        self.require_state(&[SessionState::SegmentsComputed], "acceptSegments")?;
        self.state = SessionState::DistributionReady;
        self.record("acceptSegments", "segments frozen".to_string());
        Ok(())
    }

    /// Any non-terminal state -> Terminal.
    pub fn cancel(&mut self) -> Result<()> {
        if self.state == SessionState::Terminal {
            return Err(SessionError::InvalidSessionState {
                state: self.state,
                event: "cancel",
            });
        }
        self.state = SessionState::Terminal;
        self.record("cancel", "session cancelled".to_string());
        Ok(())
    }

    fn idle_longer_than(&self, ttl: Duration) -> bool {
        let idle = Utc::now().signed_duration_since(self.last_touched_at);
        idle.to_std().map(|d| d > ttl).unwrap_or(false)
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Session registry with TTL eviction. The outer `RwLock` guards the map;
/// each session has its own mutex held for whole state transitions.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl }
    }

    /// Allocate a new session in `AwaitingDataType`.
    pub async fn create(&self, user_id: &str) -> (String, SessionState) {
        let session = Session::new(user_id);
        let id = session.id.clone();
        let state = session.state;
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(session_id = %id, user_id, "session created");
        (id, state)
    }

    /// Fetch a live session handle. Sessions past their idle TTL are evicted
    /// here lazily, as if the sweep had caught them.
    pub async fn get(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        let handle = {
            let sessions = self.sessions.read().await;
            sessions.get(id).cloned()
        };
        let Some(handle) = handle else {
            return Err(SessionError::UnknownSession(id.to_string()));
        };

        let expired = handle.lock().await.idle_longer_than(self.ttl);
        if expired {
            self.sessions.write().await.remove(id);
            debug!(session_id = id, "session evicted on access");
            return Err(SessionError::UnknownSession(id.to_string()));
        }
        Ok(handle)
    }

    /// Evict every session idle past the TTL. Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let mut expired_ids = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, handle) in sessions.iter() {
                if handle.lock().await.idle_longer_than(self.ttl) {
                    expired_ids.push(id.clone());
                }
            }
        }
        if expired_ids.is_empty() {
            return 0;
        }
        let mut sessions = self.sessions.write().await;
        for id in &expired_ids {
            sessions.remove(id);
        }
        info!(evicted = expired_ids.len(), "idle sessions evicted");
        expired_ids.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop a terminated session immediately.
    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// Bridges sessions to retrieval and clustering. Each method locks the
/// session for the full transition; retrieval failures leave the session on
/// its prior state.
pub struct SessionManager {
    store: SessionStore,
    service: Arc<RetrievalService>,
    clusterer: Arc<dyn SegmentClusterer>,
}

impl SessionManager {
    pub fn new(
        store: SessionStore,
        service: Arc<RetrievalService>,
        clusterer: Arc<dyn SegmentClusterer>,
    ) -> Self {
        Self { store, service, clusterer }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn create(&self, user_id: &str) -> (String, SessionState) {
        self.store.create(user_id).await
    }

    /// Snapshot a session's current state for the API.
    pub async fn inspect(&self, session_id: &str) -> Result<Session> {
        let handle = self.store.get(session_id).await?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    pub async fn select_data_type(
        &self,
        session_id: &str,
        source: AudienceSource,
        sub_source: String,
    ) -> Result<SessionState> {
        let handle = self.store.get(session_id).await?;
        let mut session = handle.lock().await;
        session.select_data_type(DataTypeChoice { source, sub_source })?;
        Ok(session.state)
    }

    /// submitQuery: run retrieval (routed through the rollout gate on the
    /// session's user), then present candidates.
    pub async fn submit_query(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<(SessionState, Arc<SearchResponse>)> {
        let handle = self.store.get(session_id).await?;
        let mut session = handle.lock().await;
        session.require_state(&[SessionState::AwaitingQuery], "submitQuery")?;

        let response = self
            .service
            .search_routed(&session.user_id, &SearchRequest::new(query))
            .await?;

        session.present_candidates(
            "submitQuery",
            &[SessionState::AwaitingQuery],
            query,
            candidate_refs(&response),
        )?;
        Ok((session.state, response))
    }

    /// refineQuery: re-run retrieval keeping earlier confirmations. Permitted
    /// both while candidates are on the table and after a confirmation, so a
    /// user can widen their selection before clustering.
    pub async fn refine_query(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<(SessionState, Arc<SearchResponse>)> {
        const ALLOWED: &[SessionState] =
            &[SessionState::CandidatesPresented, SessionState::VariablesConfirmed];

        let handle = self.store.get(session_id).await?;
        let mut session = handle.lock().await;
        session.require_state(ALLOWED, "refineQuery")?;

        let response = self
            .service
            .refine(&session.confirmed_variables, &SearchRequest::new(query))
            .await?;

        session.present_candidates("refineQuery", ALLOWED, query, candidate_refs(&response))?;
        Ok((session.state, response))
    }

    pub async fn confirm_variables(
        &self,
        session_id: &str,
        codes: &[String],
    ) -> Result<SessionState> {
        let handle = self.store.get(session_id).await?;
        let mut session = handle.lock().await;
        session.confirm_variables(codes)?;
        Ok(session.state)
    }

    /// computeSegments: hand the confirmed variables to the clustering
    /// collaborator and store its balanced segments.
    pub async fn compute_segments(
        &self,
        session_id: &str,
        segment_hint: Option<usize>,
    ) -> Result<(SessionState, Vec<Segment>)> {
        let handle = self.store.get(session_id).await?;
        let mut session = handle.lock().await;
        session.require_state(&[SessionState::VariablesConfirmed], "computeSegments")?;

        let variables: Vec<ClusterVariable> = session
            .confirmed_variables
            .iter()
            .map(|code| {
                match self.service.get_variable(code) {
                    Ok(view) => ClusterVariable {
                        code: view.code,
                        name: view.name,
                        data_type: view.data_type,
                    },
                    // Confirmed against an older snapshot; keep the code
                    Err(_) => ClusterVariable {
                        code: code.clone(),
                        name: code.clone(),
                        data_type: VariableType::Categorical,
                    },
                }
            })
            .collect();

        let segments = self
            .clusterer
            .cluster(ClusterRequest { variables, segment_hint })
            .await?;
        session.store_segments(segments.clone())?;
        Ok((session.state, segments))
    }

    pub async fn accept_segments(&self, session_id: &str) -> Result<SessionState> {
        let handle = self.store.get(session_id).await?;
        let mut session = handle.lock().await;
        session.accept_segments()?;
        Ok(session.state)
    }

    pub async fn cancel(&self, session_id: &str) -> Result<SessionState> {
        let handle = self.store.get(session_id).await?;
        let state = {
            let mut session = handle.lock().await;
            session.cancel()?;
            session.state
        };
        self.store.remove(session_id).await;
        Ok(state)
    }
}

fn candidate_refs(response: &SearchResponse) -> Vec<CandidateRef> {
    response
        .results
        .iter()
        .map(|hit| CandidateRef { code: hit.variable.code.clone(), fused_score: hit.fused_score })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
