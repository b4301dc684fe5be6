pub mod session;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

pub use session::WorkflowSession;
pub use store::{JsonFileStore, MemoryStore, RegistryStore, SessionMap, StoreGuard};

use crate::config::RegistryConfig;
use crate::error::{AppError, Result};
use crate::workflow::{WorkflowPhase, WorkflowStateMachine};

/// The set of known workflow sessions.
///
/// Every mutation is a read-modify-write cycle under an in-process mutex and
/// the store's own lock, so concurrent updates never overwrite each other.
/// Phase changes are checked against the workflow state machine.
pub struct SessionRegistry {
    store: Arc<dyn RegistryStore>,
    write_lock: Mutex<()>,
    lock_retries: u32,
    lock_backoff: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, config: &RegistryConfig) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            lock_retries: config.lock_retries,
            lock_backoff: Duration::from_millis(config.lock_backoff_ms),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), &RegistryConfig::default())
    }

    pub async fn create(&self, session: WorkflowSession) -> Result<WorkflowSession> {
        let created = self
            .modify(move |sessions| {
                if sessions.contains_key(&session.session_id) {
                    return Err(AppError::DuplicateId(session.session_id));
                }
                sessions.insert(session.session_id.clone(), session.clone());
                Ok(session)
            })
            .await?;

        tracing::info!(session_id = %created.session_id, repo = %created.repo_path.display(), "Session registered");
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<WorkflowSession> {
        self.store
            .load()
            .await?
            .remove(id)
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// All sessions, newest first.
    pub async fn list(&self) -> Result<Vec<WorkflowSession>> {
        let mut sessions: Vec<_> = self.store.load().await?.into_values().collect();
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        Ok(sessions)
    }

    /// Apply `mutate` to one record. A phase change made by `mutate` goes
    /// through the state machine.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<WorkflowSession>
    where
        F: FnOnce(&mut WorkflowSession) + Send,
    {
        self.apply(id, None, mutate).await
    }

    /// Move a session to `to`, applying `mutate` in the same write. Moving a
    /// finished session to the phase it is already in is refused.
    pub async fn transition<F>(&self, id: &str, to: WorkflowPhase, mutate: F) -> Result<WorkflowSession>
    where
        F: FnOnce(&mut WorkflowSession) + Send,
    {
        let updated = self.apply(id, Some(to), mutate).await?;

        tracing::info!(session_id = %id, phase = %to, "Session phase changed");
        Ok(updated)
    }

    async fn apply<F>(&self, id: &str, to: Option<WorkflowPhase>, mutate: F) -> Result<WorkflowSession>
    where
        F: FnOnce(&mut WorkflowSession) + Send,
    {
        let id = id.to_string();
        self.modify(move |sessions| {
            let session = sessions
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(id.clone()))?;

            let mut next = session.clone();
            mutate(&mut next);
            next.session_id = session.session_id.clone();
            match to {
                Some(to) => {
                    WorkflowStateMachine::validate_move(&id, session.phase, to)?;
                    next.phase = to;
                }
                None => WorkflowStateMachine::validate_transition(&id, session.phase, next.phase)?,
            }
            stamp(&mut next, session.phase);

            *session = next.clone();
            Ok(next)
        })
        .await
    }

    /// Soft-delete: the record is kept with status `archived`. Archiving an
    /// archived session is a no-op.
    pub async fn archive(&self, id: &str) -> Result<WorkflowSession> {
        let current = self.get(id).await?;
        if current.phase == WorkflowPhase::Archived {
            return Ok(current);
        }
        match self.transition(id, WorkflowPhase::Archived, |_| {}).await {
            // Archived by someone else since the read above.
            Err(AppError::InvalidTransition { .. }) => {
                let current = self.get(id).await?;
                if current.phase == WorkflowPhase::Archived {
                    Ok(current)
                } else {
                    Err(AppError::InvalidTransition {
                        id: id.to_string(),
                        from: current.phase.as_str().to_string(),
                        to: WorkflowPhase::Archived.as_str().to_string(),
                    })
                }
            }
            other => other,
        }
    }

    /// Remove a record outright, returning it.
    pub async fn delete(&self, id: &str) -> Result<WorkflowSession> {
        let id_owned = id.to_string();
        let removed = self
            .modify(move |sessions| {
                sessions
                    .remove(&id_owned)
                    .ok_or_else(|| AppError::NotFound(id_owned.clone()))
            })
            .await?;

        tracing::info!(session_id = %id, "Session deleted");
        Ok(removed)
    }

    async fn modify<R, F>(&self, f: F) -> Result<R>
    where
        R: Send,
        F: FnOnce(&mut SessionMap) -> Result<R> + Send,
    {
        let _local = self.write_lock.lock().await;
        let _guard = self.acquire().await?;

        let mut sessions = self.store.load().await?;
        let result = f(&mut sessions)?;
        self.store.save(&sessions).await?;
        Ok(result)
    }

    /// Take the store lock, backing off exponentially while another
    /// process holds it.
    async fn acquire(&self) -> Result<StoreGuard> {
        let mut attempt = 0;
        loop {
            match self.store.acquire().await {
                Ok(guard) => return Ok(guard),
                Err(e) if e.is_transient() && attempt < self.lock_retries => {
                    let delay = self.lock_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Registry locked, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(AppError::Registry(format!(
                        "gave up after {} attempts: {e}",
                        attempt + 1
                    )))
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn stamp(session: &mut WorkflowSession, previous: WorkflowPhase) {
    let now = Utc::now();
    session.status = session.phase.status();
    session.updated_at = now;
    if session.phase == WorkflowPhase::Terminated && previous != WorkflowPhase::Terminated {
        session.terminated_at = Some(now);
    }
}
