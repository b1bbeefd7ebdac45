//! Debounced history writes.
//!
//! A master cycling through songs only produces one history entry: every
//! qualifying update overwrites the single pending write and pushes the alarm
//! back by the debounce window. Only the latest alarm counts; an alarm carrying
//! an older generation is ignored when it reaches the actor.
//!
//! The pending write and its deadline are stored durably so that a restart
//! before the alarm fires re-arms it instead of losing the entry.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    dao::models::{HistoryEntryEntity, PendingWriteEntity},
    dto::format_system_time,
    error::ServiceError,
    services::session_actor::SessionCommand,
    state::storage::StorageSlot,
};

/// Single-slot debounce of history writes for one session, driven by its actor.
pub struct HistoryScheduler {
    session_key: String,
    window: Duration,
    storage: Arc<StorageSlot>,
    alarms: mpsc::UnboundedSender<SessionCommand>,
    pending: Option<PendingWriteEntity>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl HistoryScheduler {
    /// `alarms` is the owning actor's command channel; fired alarms are delivered there.
    pub fn new(
        session_key: String,
        window: Duration,
        storage: Arc<StorageSlot>,
        alarms: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            session_key,
            window,
            storage,
            alarms,
            pending: None,
            generation: 0,
            timer: None,
        }
    }

    /// `true` while a history write waits for its alarm.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The write that the next alarm flushes.
    pub fn pending(&self) -> Option<&PendingWriteEntity> {
        self.pending.as_ref()
    }

    /// Generation of the most recently armed alarm.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reload a pending write left by a previous instance and re-arm its alarm.
    pub async fn restore(&mut self) {
        // A write scheduled while storage was unreachable is newer than anything persisted.
        if self.pending.is_some() {
            return;
        }

        let store = match self.storage.require().await {
            Ok(store) => store,
            Err(err) => {
                debug!(session = %self.session_key, error = %err, "no storage to restore pending history write from");
                return;
            }
        };

        let pending = match store.load_pending_write(self.session_key.clone()).await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(session = %self.session_key, error = %err, "failed to load pending history write");
                return;
            }
        };
        let deadline = match store.load_alarm(self.session_key.clone()).await {
            Ok(deadline) => deadline,
            Err(err) => {
                warn!(session = %self.session_key, error = %err, "failed to load history alarm");
                None
            }
        };

        match (pending, deadline) {
            (Some(pending), deadline) => {
                let delay = deadline
                    .and_then(|deadline| deadline.duration_since(SystemTime::now()).ok())
                    .unwrap_or(Duration::ZERO);
                info!(
                    session = %self.session_key,
                    song = %pending.song_id,
                    delay_ms = delay.as_millis() as u64,
                    "re-arming pending history write"
                );
                self.pending = Some(pending);
                self.arm(delay);
            }
            (None, Some(_)) => {
                // Alarm outlived its pending write (crash between the two deletes).
                if let Err(err) = store.delete_alarm(self.session_key.clone()).await {
                    warn!(session = %self.session_key, error = %err, "failed to delete orphan history alarm");
                }
            }
            (None, None) => {}
        }
    }

    /// Replace the pending write and push the alarm back by the debounce window.
    pub async fn schedule(&mut self, master_id: String, song_id: String) {
        let pending = PendingWriteEntity {
            master_id,
            song_id,
            queued_at: SystemTime::now(),
        };
        let deadline = pending.queued_at + self.window;
        debug!(
            session = %self.session_key,
            song = %pending.song_id,
            deadline = %format_system_time(deadline),
            "scheduling history write"
        );

        self.pending = Some(pending.clone());
        self.arm(self.window);

        if let Err(err) = self.persist_schedule(pending, deadline).await {
            warn!(session = %self.session_key, error = %err, "failed to persist pending history write");
        }
    }

    /// Flush the pending write if `generation` is the latest armed alarm.
    pub async fn on_alarm(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(session = %self.session_key, generation, current = self.generation, "ignoring superseded history alarm");
            return;
        }
        self.timer = None;

        let Some(pending) = self.pending.take() else {
            return;
        };

        let entry = HistoryEntryEntity {
            session_key: self.session_key.clone(),
            master_id: pending.master_id,
            song_id: pending.song_id,
            recorded_at: SystemTime::now(),
        };

        // Cleared on success and failure alike: a failed append is not retried.
        match self.flush(entry.clone()).await {
            Ok(()) => info!(
                session = %self.session_key,
                master = %entry.master_id,
                song = %entry.song_id,
                "recorded song history entry"
            ),
            Err(err) => warn!(
                session = %self.session_key,
                song = %entry.song_id,
                error = %err,
                "failed to append song history entry; dropping it"
            ),
        }

        if let Err(err) = self.clear_persisted().await {
            warn!(session = %self.session_key, error = %err, "failed to clear pending history write");
        }
    }

    fn arm(&mut self, delay: Duration) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let generation = self.generation;
        let alarms = self.alarms.clone();
        self.timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = alarms.send(SessionCommand::AlarmFired { generation });
        }));
    }

    async fn persist_schedule(
        &self,
        pending: PendingWriteEntity,
        deadline: SystemTime,
    ) -> Result<(), ServiceError> {
        let store = self.storage.require().await?;
        store
            .save_pending_write(self.session_key.clone(), pending)
            .await?;
        store.set_alarm(self.session_key.clone(), deadline).await?;
        Ok(())
    }

    async fn flush(&self, entry: HistoryEntryEntity) -> Result<(), ServiceError> {
        let store = self.storage.require().await?;
        store.append_history(entry).await?;
        Ok(())
    }

    async fn clear_persisted(&self) -> Result<(), ServiceError> {
        let store = self.storage.require().await?;
        store.delete_pending_write(self.session_key.clone()).await?;
        store.delete_alarm(self.session_key.clone()).await?;
        Ok(())
    }
}

impl Drop for HistoryScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
