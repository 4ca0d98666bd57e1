/// Process-wide registry of active conversation sessions
use super::{ConversationId, Session, SessionState, SessionSummary, TurnResult};
use crate::config::{Config, DialogMode};
use crate::dialog::{DialogGenerator, DialogMessages, Script, DIALOG_COLLECTION};
use crate::embedding::{EmbeddingProvider, VectorStore};
use crate::error::{Result, SimPatientError};
use crate::scoring::{Rubric, ScoreEngine, ScoreSettings};
use ahash::AHashMap;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Session behavior shared by every conversation in a registry
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub dialog_mode: DialogMode,
    pub match_threshold: f32,
    pub messages: DialogMessages,
    pub scoring: ScoreSettings,
    /// Upper bound for one embedding job
    pub embed_timeout: Duration,
    /// Learner-facing text for `SessionExpired`
    pub expired_message: String,
    /// Ended ids remembered before the oldest is forgotten
    pub ended_retention: usize,
}

impl RegistrySettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            dialog_mode: config.dialog.mode,
            match_threshold: config.retrieval.match_threshold,
            messages: DialogMessages::from(&config.dialog),
            scoring: ScoreSettings::from(&config.scoring),
            embed_timeout: config.embedding.timeout_duration()?,
            expired_message: config.session.expired_message.clone(),
            ended_retention: config.session.ended_retention,
        })
    }
}

/// Lifecycle slot of one conversation id
enum Slot {
    /// `start` is building the session outside the map lock
    Starting,
    Active(Arc<Session>),
    /// Terminal; the id is never reused
    Ended,
}

/// Slot map plus the order in which ids were ended
#[derive(Default)]
struct SlotTable {
    slots: AHashMap<ConversationId, Slot>,
    ended: VecDeque<ConversationId>,
}

impl SlotTable {
    /// Record `id` as ended, forgetting the oldest tombstones beyond `retention`
    fn retire(&mut self, id: ConversationId, retention: usize) {
        self.ended.push_back(id);
        while self.ended.len() > retention {
            let Some(oldest) = self.ended.pop_front() else {
                break;
            };
            if matches!(self.slots.get(&oldest), Some(Slot::Ended)) {
                self.slots.remove(&oldest);
                debug!("Forgot ended conversation {}", oldest);
            }
        }
    }
}

/// Registry of conversation sessions
///
/// Lifecycle per id is NotStarted → Active → Ended. The slot map lock is only
/// held for bookkeeping; index construction and embedding run without it, and
/// turns on one conversation are serialized by that session's own lock.
///
/// Ended ids are kept as tombstones so they cannot be restarted. At most
/// `ended_retention` tombstones are kept; once the oldest is forgotten its id
/// counts as never started, and `start` accepts it again.
pub struct SessionRegistry {
    provider: Arc<dyn EmbeddingProvider>,
    settings: RegistrySettings,
    table: RwLock<SlotTable>,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: RegistrySettings) -> Self {
        Self {
            provider,
            settings,
            table: RwLock::new(SlotTable::default()),
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &Config) -> Result<Self> {
        Ok(Self::new(provider, RegistrySettings::from_config(config)?))
    }

    /// Start a conversation and return the patient's opening line.
    ///
    /// Fails with `DuplicateSession` if `id` is active, starting, or has
    /// already ended.
    pub async fn start(&self, id: ConversationId, script: Script, rubric: Rubric) -> Result<String> {
        {
            let mut table = self.table.write().await;
            if table.slots.contains_key(&id) {
                return Err(SimPatientError::DuplicateSession { id: id.to_string() });
            }
            table.slots.insert(id, Slot::Starting);
        }

        let built = self.build_state(id, script, rubric).await;

        let mut table = self.table.write().await;
        let still_starting = matches!(table.slots.get(&id), Some(Slot::Starting));

        match built {
            Err(e) => {
                if still_starting {
                    table.slots.remove(&id);
                }
                warn!("Failed to start conversation {}: {}", id, e);
                Err(e)
            }
            Ok(_) if !still_starting => {
                warn!("Conversation {} was ended while starting", id);
                Err(SimPatientError::SessionExpired { id: id.to_string() })
            }
            Ok((state, opening)) => {
                let mode = if state.dialog.is_retrieval() {
                    "retrieval"
                } else {
                    "sequential"
                };
                table
                    .slots
                    .insert(id, Slot::Active(Arc::new(Session::new(id, state))));
                info!("Started conversation {} ({} mode)", id, mode);
                Ok(opening)
            }
        }
    }

    async fn build_state(
        &self,
        id: ConversationId,
        script: Script,
        rubric: Rubric,
    ) -> Result<(SessionState, String)> {
        let provider = self.provider.clone();
        let settings = self.settings.clone();
        let key = id.session_key();

        self.run_blocking(move || {
            let script = Arc::new(script);

            let mut store = VectorStore::new(provider.clone());
            let questions = store.build(DIALOG_COLLECTION, script.questions())?;

            let mut scorer = ScoreEngine::new(provider.clone(), settings.scoring);
            scorer.load(&key, rubric)?;

            let retrieval = match settings.dialog_mode {
                DialogMode::Retrieval => Some((questions, provider)),
                DialogMode::Sequential => None,
            };
            let mut dialog = DialogGenerator::new(
                script,
                retrieval,
                settings.match_threshold,
                &settings.messages,
            );
            let opening = dialog.opening();

            Ok((
                SessionState {
                    key,
                    store,
                    scorer,
                    dialog,
                    scores: Vec::new(),
                    closed: false,
                },
                opening,
            ))
        })
        .await
    }

    /// Look up an active session
    pub async fn get(&self, id: ConversationId) -> Result<Arc<Session>> {
        match self.table.read().await.slots.get(&id) {
            Some(Slot::Active(session)) => Ok(session.clone()),
            _ => Err(SimPatientError::SessionExpired { id: id.to_string() }),
        }
    }

    /// Score the learner's text and produce the patient's reply.
    ///
    /// On failure (including embedding timeout) the session is left exactly
    /// as it was.
    pub async fn turn(&self, id: ConversationId, learner_text: &str) -> Result<TurnResult> {
        let text = learner_text.trim();
        if text.is_empty() {
            return Err(SimPatientError::InvalidInput(
                "Message content cannot be empty".to_string(),
            ));
        }

        let session = self.get(id).await?;
        let mut guard = session.state.lock().await;
        if guard.closed {
            return Err(SimPatientError::SessionExpired { id: id.to_string() });
        }

        let provider = self.provider.clone();
        let owned = text.to_string();
        let query = self
            .run_blocking(move || Ok(provider.embed(&owned)?))
            .await?;

        let state = &mut *guard;
        let assessment = state.scorer.score_vector(&query, &state.key)?;
        let reply = state.dialog.reply_to_vector(&query)?;
        state.scores.push(assessment.score);

        let turn = state.scores.len();
        debug!(
            "Conversation {} turn {}: score {} (similarity {:.3}), reply {:?}",
            id, turn, assessment.score, assessment.similarity, reply.kind
        );

        Ok(TurnResult {
            turn,
            score: assessment.score,
            similarity: assessment.similarity,
            feedback: assessment.feedback(),
            matched_criterion: assessment.matched_criterion,
            nearest_criterion: assessment.nearest_criterion,
            next_utterance: reply.text,
            reply_kind: reply.kind,
        })
    }

    /// End a conversation and return its aggregate.
    ///
    /// Idempotent: ending an id that is already ended or was never started
    /// returns `None`.
    pub async fn end(&self, id: ConversationId) -> Option<SessionSummary> {
        let session = {
            let mut table = self.table.write().await;
            let slot = table.slots.get_mut(&id)?;
            let previous = std::mem::replace(slot, Slot::Ended);
            match previous {
                Slot::Ended => return None,
                Slot::Starting => {
                    table.retire(id, self.settings.ended_retention);
                    info!("Conversation {} ended before it finished starting", id);
                    return None;
                }
                Slot::Active(session) => {
                    table.retire(id, self.settings.ended_retention);
                    session
                }
            }
        };

        // Waits for an in-flight turn on this session to finish.
        let mut state = session.state.lock().await;
        state.closed = true;
        let key = state.key.clone();
        state.scorer.unload(&key);

        let turns = state.scores.len();
        let total_score: f64 = state.scores.iter().sum();
        let average_score = if turns > 0 {
            total_score / turns as f64
        } else {
            0.0
        };

        let summary = SessionSummary {
            conversation_id: id,
            turns,
            total_score,
            average_score,
            started_at: session.started_at(),
            ended_at: Utc::now(),
        };

        info!(
            "Ended conversation {} after {} turns (average score {:.2})",
            id, turns, average_score
        );
        Some(summary)
    }

    pub async fn is_active(&self, id: ConversationId) -> bool {
        matches!(
            self.table.read().await.slots.get(&id),
            Some(Slot::Active(_))
        )
    }

    /// Number of sessions currently active
    pub async fn active_count(&self) -> usize {
        self.table
            .read()
            .await
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    /// Learner-facing text for `err`, using the configured expiry message
    pub fn user_message(&self, err: &SimPatientError) -> String {
        err.user_message_with(&self.settings.expired_message)
    }

    /// Run CPU-bound embedding work off the async workers, bounded by the
    /// configured timeout
    async fn run_blocking<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let timeout = self.settings.embed_timeout;
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(job)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SimPatientError::Other(anyhow::anyhow!(
                "embedding task failed: {}",
                join_error
            ))),
            Err(_) => {
                warn!("Embedding exceeded {:?}", timeout);
                Err(SimPatientError::EmbeddingTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::QaPair;
    use crate::embedding::{EmbeddingError, HashingEmbedder};
    use crate::scoring::Criterion;
    use std::sync::mpsc;
    use std::sync::Mutex as StdMutex;

    fn registry(mode: DialogMode) -> SessionRegistry {
        let mut config = Config::default();
        config.dialog.mode = mode;
        SessionRegistry::from_config(Arc::new(HashingEmbedder::new(384).unwrap()), &config)
            .unwrap()
    }

    fn script() -> Script {
        Script::new(vec![
            QaPair::new("How are you?", "I feel fine."),
            QaPair::new("Where does it hurt?", "My lower back."),
        ])
        .unwrap()
    }

    fn rubric() -> Rubric {
        Rubric::new(vec![Criterion::new("I feel fine", "wellbeing", 10.0)])
    }

    /// Provider that never finishes in time
    struct SlowProvider {
        /// Also stall index construction, not just per-turn queries
        slow_batch: bool,
    }

    impl EmbeddingProvider for SlowProvider {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(vec![1.0; 4])
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.slow_batch {
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_start_returns_opening() {
        let registry = registry(DialogMode::Retrieval);
        let id = ConversationId::new();

        let opening = registry.start(id, script(), rubric()).await.unwrap();
        assert_eq!(opening, "I feel fine.");
        assert!(registry.is_active(id).await);
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_start_rejected() {
        let registry = registry(DialogMode::Retrieval);
        let id = ConversationId::new();

        registry.start(id, script(), rubric()).await.unwrap();
        let err = registry.start(id, script(), rubric()).await.unwrap_err();
        assert!(matches!(err, SimPatientError::DuplicateSession { .. }));
    }

    #[tokio::test]
    async fn test_ended_id_is_never_revived() {
        let registry = registry(DialogMode::Retrieval);
        let id = ConversationId::new();

        registry.start(id, script(), rubric()).await.unwrap();
        registry.end(id).await.unwrap();

        let err = registry.start(id, script(), rubric()).await.unwrap_err();
        assert!(matches!(err, SimPatientError::DuplicateSession { .. }));
        assert!(registry.get(id).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_start_frees_the_id() {
        let registry = registry(DialogMode::Retrieval);
        let id = ConversationId::new();

        let err = registry
            .start(id, script(), Rubric::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, SimPatientError::EmptyCorpus { .. }));
        assert!(!registry.is_active(id).await);

        registry.start(id, script(), rubric()).await.unwrap();
    }

    #[tokio::test]
    async fn test_sequential_turns_advance_cursor() {
        let registry = registry(DialogMode::Sequential);
        let id = ConversationId::new();

        assert_eq!(
            registry.start(id, script(), rubric()).await.unwrap(),
            "I feel fine."
        );
        let session = registry.get(id).await.unwrap();
        assert_eq!(session.cursor().await, 1);

        let turn = registry.turn(id, "Hello there").await.unwrap();
        assert_eq!(turn.next_utterance, "My lower back.");
        assert_eq!(session.cursor().await, 2);

        let turn = registry.turn(id, "Anything else?").await.unwrap();
        assert_eq!(turn.next_utterance, "The conversation has ended.");
        assert_eq!(session.cursor().await, 2);
    }

    #[tokio::test]
    async fn test_blank_turn_rejected() {
        let registry = registry(DialogMode::Retrieval);
        let id = ConversationId::new();
        registry.start(id, script(), rubric()).await.unwrap();

        let err = registry.turn(id, "   ").await.unwrap_err();
        assert!(matches!(err, SimPatientError::InvalidInput(_)));
        assert_eq!(registry.get(id).await.unwrap().turn_count().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_leaves_session_untouched() {
        let mut settings = RegistrySettings::from_config(&Config::default()).unwrap();
        settings.dialog_mode = DialogMode::Sequential;
        settings.embed_timeout = Duration::from_millis(20);
        let registry = SessionRegistry::new(Arc::new(SlowProvider { slow_batch: false }), settings);
        let id = ConversationId::new();

        registry.start(id, script(), rubric()).await.unwrap();
        let err = registry.turn(id, "How are you?").await.unwrap_err();
        assert!(err.is_retryable());

        let session = registry.get(id).await.unwrap();
        assert_eq!(session.turn_count().await, 0);
        assert_eq!(session.cursor().await, 1);
    }

    #[tokio::test]
    async fn test_start_timeout_frees_the_id() {
        let mut settings = RegistrySettings::from_config(&Config::default()).unwrap();
        settings.embed_timeout = Duration::from_millis(20);
        let registry = SessionRegistry::new(Arc::new(SlowProvider { slow_batch: true }), settings);
        let id = ConversationId::new();

        let err = registry.start(id, script(), rubric()).await.unwrap_err();
        assert!(matches!(err, SimPatientError::EmbeddingTimeout { .. }));
        assert!(!registry.is_active(id).await);

        // The reservation was released, so a retry times out again rather
        // than colliding with a leftover slot.
        let err = registry.start(id, script(), rubric()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    /// Provider whose first batch blocks until the test releases it
    struct GatedProvider {
        entered: StdMutex<Option<mpsc::Sender<()>>>,
        release: StdMutex<mpsc::Receiver<()>>,
    }

    impl EmbeddingProvider for GatedProvider {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0; 4])
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
            }
            // Returns once the sender side is dropped.
            let _ = self.release.lock().unwrap().recv();
            Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_end_during_start_expires_the_start() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let provider = GatedProvider {
            entered: StdMutex::new(Some(entered_tx)),
            release: StdMutex::new(release_rx),
        };
        let settings = RegistrySettings::from_config(&Config::default()).unwrap();
        let registry = Arc::new(SessionRegistry::new(Arc::new(provider), settings));
        let id = ConversationId::new();

        let starter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.start(id, script(), rubric()).await })
        };

        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!registry.is_active(id).await);
        assert!(registry.end(id).await.is_none());

        drop(release_tx);
        let err = starter.await.unwrap().unwrap_err();
        assert!(matches!(err, SimPatientError::SessionExpired { .. }));

        assert!(!registry.is_active(id).await);
        let err = registry.start(id, script(), rubric()).await.unwrap_err();
        assert!(matches!(err, SimPatientError::DuplicateSession { .. }));
    }

    #[tokio::test]
    async fn test_oldest_ended_ids_are_forgotten() {
        let mut config = Config::default();
        config.session.ended_retention = 2;
        let registry =
            SessionRegistry::from_config(Arc::new(HashingEmbedder::new(384).unwrap()), &config)
                .unwrap();

        let ids: Vec<ConversationId> = (0..3).map(|_| ConversationId::new()).collect();
        for id in &ids {
            registry.start(*id, script(), rubric()).await.unwrap();
            registry.end(*id).await.unwrap();
        }
        assert_eq!(registry.table.read().await.slots.len(), 2);

        // The first id fell out of the window and starts fresh.
        registry.start(ids[0], script(), rubric()).await.unwrap();
        assert!(registry.is_active(ids[0]).await);

        let err = registry.start(ids[2], script(), rubric()).await.unwrap_err();
        assert!(matches!(err, SimPatientError::DuplicateSession { .. }));
    }

    #[tokio::test]
    async fn test_expired_message_comes_from_config() {
        let mut config = Config::default();
        config.session.expired_message = "This case is closed.".to_string();
        let registry =
            SessionRegistry::from_config(Arc::new(HashingEmbedder::new(384).unwrap()), &config)
                .unwrap();
        let id = ConversationId::new();

        registry.start(id, script(), rubric()).await.unwrap();
        registry.end(id).await.unwrap();

        let err = registry.turn(id, "Are you still there?").await.unwrap_err();
        assert_eq!(registry.user_message(&err), "This case is closed.");
    }
}
