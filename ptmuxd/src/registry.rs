//! Process-wide mapping from session id to Session.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ptmux_protocol::ErrorKind;
use rand::Rng;
use tracing::instrument;

use crate::{
    pty::SpawnParams,
    session::{Session, SessionInfo},
};

const ID_LEN: usize = 16;
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const MAX_ID_COLLISION_RETRIES: usize = 8;

pub struct CreateParams {
    pub name: String,
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<String>,
    pub argv: Option<Vec<String>>,
    pub env: Option<Vec<(String, String)>>,
}

pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    history_bytes: usize,
    queue_depth: usize,
    slow_consumer_window: Duration,
    default_shell: String,
}

impl Registry {
    pub fn new(
        history_bytes: usize,
        queue_depth: usize,
        slow_consumer_window: Duration,
        default_shell: String,
    ) -> Self {
        Registry {
            sessions: RwLock::new(HashMap::new()),
            history_bytes,
            queue_depth,
            slow_consumer_window,
            default_shell,
        }
    }

    #[instrument(skip(self, params), fields(name = %params.name))]
    pub fn create(&self, params: CreateParams) -> anyhow::Result<Arc<Session>> {
        let argv = params
            .argv
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| vec![self.default_shell.clone()]);
        let cwd = params
            .cwd
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| "/".into()));
        let env = scrubbed_env(params.env.unwrap_or_default());

        let spawn_params =
            SpawnParams { argv, env, cwd, cols: params.cols.max(1), rows: params.rows.max(1) };

        let created_at = now_unix_ms();
        let mut sessions = self.sessions.write().unwrap();
        let id = Self::fresh_id(&sessions)?;

        let session = Session::spawn(
            id.clone(),
            params.name,
            spawn_params,
            self.history_bytes,
            self.queue_depth,
            self.slow_consumer_window,
            created_at,
        )?;
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    fn fresh_id(existing: &HashMap<String, Arc<Session>>) -> anyhow::Result<String> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_ID_COLLISION_RETRIES {
            let id: String = (0..ID_LEN)
                .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
                .collect();
            if !existing.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(anyhow::anyhow!("could not generate a unique session id"))
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<Session>, ErrorKind> {
        self.sessions.read().unwrap().get(id).cloned().ok_or(ErrorKind::NotFound)
    }

    /// Send `signal` (default SIGHUP) to the Session and drop it from the
    /// mapping. Remaining subscribers were already notified of the exit by
    /// the Session's own reader loop before this removes the map entry.
    pub fn remove(&self, id: &str, signal: Option<&str>) -> Result<(), ErrorKind> {
        let session = {
            let mut sessions = self.sessions.write().unwrap();
            sessions.remove(id).ok_or(ErrorKind::NotFound)?
        };
        session.kill(signal);
        Ok(())
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions.read().unwrap().values().map(|s| s.info()).collect()
    }

    /// All live sessions, for the shutdown kill-escalation sweep.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Build a minimal, scrubbed environment for a freshly spawned session:
/// only the handful of vars a shell needs to function, plus whatever the
/// `create` request explicitly asked to inject. The daemon's own
/// environment is never inherited wholesale.
fn scrubbed_env(extra: Vec<(String, String)>) -> Vec<(std::ffi::OsString, std::ffi::OsString)> {
    let mut env = Vec::new();
    for key in ["PATH", "HOME", "USER", "SHELL", "TERM"] {
        if let Some(val) = std::env::var_os(key) {
            env.push((std::ffi::OsString::from(key), val));
        }
    }
    for (k, v) in extra {
        env.retain(|(ek, _)| ek.to_string_lossy() != k);
        env.push((std::ffi::OsString::from(k), std::ffi::OsString::from(v)));
    }
    env
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scrubbed_env_lets_request_env_override() {
        let env = scrubbed_env(vec![("PATH".to_string(), "/custom/bin".to_string())]);
        let path_entries: Vec<_> =
            env.iter().filter(|(k, _)| k == std::ffi::OsStr::new("PATH")).collect();
        assert_eq!(path_entries.len(), 1);
        assert_eq!(path_entries[0].1, std::ffi::OsString::from("/custom/bin"));
    }
}
