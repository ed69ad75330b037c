use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One QR-login attempt. `external_identity` is only present once the scene
/// has been scanned; the two fields are written together under the store
/// lock, so readers never observe one without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSession {
    pub state: SceneState,
    pub external_identity: Option<String>,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    Pending,
    Scanned,
}

/// Concurrency-safe map of scene id to login session.
///
/// Owned exclusively by the process-level app state; handlers receive a
/// shared handle and go through these methods. Callers pass `now`
/// explicitly.
#[derive(Default)]
pub struct SceneStore {
    sessions: Mutex<BTreeMap<String, SceneSession>>,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh pending scene. An existing record under the same id
    /// is overwritten: a stale record under a reused id must not leak into
    /// the new login attempt. Expired records are swept on the way in.
    pub fn create_scene(&self, scene_id: &str, now: Instant, ttl: Duration) {
        let mut sessions = self.sessions.lock().expect("scene store lock");
        sessions.retain(|_, s| now.saturating_duration_since(s.created_at) < ttl);
        sessions.insert(
            scene_id.to_string(),
            SceneSession {
                state: SceneState::Pending,
                external_identity: None,
                created_at: now,
            },
        );
    }

    /// Records a scan. Creates the record if the scan raced ahead of scene
    /// registration. Repeated scans are idempotent overwrites (last identity
    /// wins); a scanned scene never regresses to pending.
    pub fn mark_scanned(&self, scene_id: &str, external_identity: &str, now: Instant) {
        let mut sessions = self.sessions.lock().expect("scene store lock");
        match sessions.get_mut(scene_id) {
            Some(session) => {
                session.state = SceneState::Scanned;
                session.external_identity = Some(external_identity.to_string());
            }
            None => {
                sessions.insert(
                    scene_id.to_string(),
                    SceneSession {
                        state: SceneState::Scanned,
                        external_identity: Some(external_identity.to_string()),
                        created_at: now,
                    },
                );
            }
        }
    }

    /// Snapshot of a scene; no side effects.
    pub fn get(&self, scene_id: &str) -> Option<SceneSession> {
        self.sessions
            .lock()
            .expect("scene store lock")
            .get(scene_id)
            .cloned()
    }

    pub fn remove(&self, scene_id: &str) -> Option<SceneSession> {
        self.sessions
            .lock()
            .expect("scene store lock")
            .remove(scene_id)
    }

    /// Drops every record older than `ttl`, scanned or not.
    pub fn evict_expired(&self, now: Instant, ttl: Duration) {
        self.sessions
            .lock()
            .expect("scene store lock")
            .retain(|_, s| now.saturating_duration_since(s.created_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("scene store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
