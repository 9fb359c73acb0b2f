//! Client sessions against a shared engine.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::builder::{Outcome, ResultSetBuilder};
use crate::catalog::{plain_names, Catalog};
use crate::channel::ChannelHandles;
use crate::codec::{CommandKind, ProtocolCodec};
use crate::config::DriverConfig;
use crate::constants::{CURRENT_DB_COMMAND, SHOW_DBS_COMMAND, USE_DB_COMMAND};
use crate::error::{Error, Result};
use crate::positioned::PositionedOpExecutor;
use crate::registry;
use crate::supervisor::ProcessSupervisor;
use crate::sync::NamedMutex;
use crate::table::ResultTable;

/// Anything that can run one command against the engine
pub trait QueryRunner {
    /// Send one command and return the raw response text
    fn run_raw(&self, kind: CommandKind, text: &str) -> Result<String>;

    /// Send one command and parse its response
    fn execute(&self, kind: CommandKind, text: &str) -> Result<Outcome> {
        let raw = self.run_raw(kind, text)?;
        ResultSetBuilder::build(kind, &raw)
    }
}

/// Connection state of a live session
#[derive(Debug)]
struct Connected {
    /// Registry id inside the shared session record
    client_id: u32,
    /// Engine this client is attached to
    engine_pid: u32,
    /// Whether this client spawned the engine
    launched: bool,
    /// Local channel endpoints
    handles: ChannelHandles,
}

#[derive(Debug)]
pub(crate) struct SessionInner {
    supervisor: ProcessSupervisor,
    query_lock: NamedMutex,
    codec: ProtocolCodec,
    state: Mutex<Option<Connected>>,
}

impl SessionInner {
    fn state(&self) -> Result<MutexGuard<'_, Option<Connected>>> {
        self.state.lock().map_err(|_| Error::SessionClosed)
    }

    /// Leave the engine; a closed session is left alone
    pub(crate) fn disconnect(&self) -> Result<()> {
        let Some(connected) = self.state()?.take() else {
            return Ok(());
        };
        log::info!("disconnecting client {}", connected.client_id);
        self.supervisor
            .release_engine(connected.client_id, connected.handles)
    }

    fn run_raw(&self, kind: CommandKind, text: &str) -> Result<String> {
        if kind == CommandKind::Quit {
            return Err(Error::Unsupported(
                "the engine is stopped by disconnecting the last client".to_string(),
            ));
        }
        let mut state = self.state()?;
        let connected = state.as_mut().ok_or(Error::SessionClosed)?;

        let _query = self
            .query_lock
            .acquire(self.supervisor.config().timeouts.query_lock)?;
        self.codec.send(&mut connected.handles, kind, text)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::warn!("disconnect on drop failed: {}", e);
        }
    }
}

/// One client's connection to the engine of a working directory
#[derive(Debug)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Launch the engine or join the running one
    pub fn connect(config: DriverConfig) -> Result<Self> {
        let supervisor = ProcessSupervisor::new(config)?;
        let attachment = supervisor.ensure_engine()?;

        let inner = Arc::new(SessionInner {
            query_lock: supervisor.query_lock(),
            codec: supervisor.codec().clone(),
            state: Mutex::new(Some(Connected {
                client_id: attachment.client_id,
                engine_pid: attachment.engine_pid,
                launched: attachment.launched,
                handles: attachment.handles,
            })),
            supervisor,
        });
        registry::register_session(&inner);
        Ok(Session { inner })
    }

    /// Leave the engine. Idempotent; the last client stops the engine.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn client_id(&self) -> Result<u32> {
        self.connected(|c| c.client_id)
    }

    pub fn engine_pid(&self) -> Result<u32> {
        self.connected(|c| c.engine_pid)
    }

    /// Whether this session spawned the engine
    pub fn launched_engine(&self) -> Result<bool> {
        self.connected(|c| c.launched)
    }

    fn connected<T>(&self, f: impl FnOnce(&Connected) -> T) -> Result<T> {
        let state = self.inner.state()?;
        state.as_ref().map(f).ok_or(Error::SessionClosed)
    }

    pub fn config(&self) -> &DriverConfig {
        self.inner.supervisor.config()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.inner.supervisor
    }

    /// Run a statement in TAPI mode
    pub fn execute(&self, sql: &str) -> Result<Outcome> {
        QueryRunner::execute(self, CommandKind::Query, sql)
    }

    /// Run a statement and keep only its rows
    pub fn query(&self, sql: &str) -> Result<ResultTable> {
        self.execute(sql).map(Outcome::into_table)
    }

    /// Send a command and return the response text unparsed
    pub fn raw(&self, kind: CommandKind, text: &str) -> Result<String> {
        self.run_raw(kind, text)
    }

    pub fn show_databases(&self) -> Result<Vec<String>> {
        let raw = self.plain(SHOW_DBS_COMMAND)?;
        Ok(plain_names(&raw))
    }

    pub fn use_database(&self, name: &str) -> Result<()> {
        self.plain(&format!("{} {}", USE_DB_COMMAND, name)).map(|_| ())
    }

    pub fn current_database(&self) -> Result<String> {
        let raw = self.plain(CURRENT_DB_COMMAND)?;
        plain_names(&raw)
            .into_iter()
            .next()
            .ok_or_else(|| Error::parse(0, "no current database in response"))
    }

    /// Run a script file through the engine's batch processor
    pub fn process_batch(&self, path: &Path) -> Result<String> {
        match QueryRunner::execute(self, CommandKind::Batch, &path.display().to_string())? {
            Outcome::Text(text) => Ok(text),
            _ => Ok(String::new()),
        }
    }

    fn plain(&self, command: &str) -> Result<String> {
        match QueryRunner::execute(self, CommandKind::Plain, command)? {
            Outcome::Text(text) => Ok(text),
            _ => Ok(String::new()),
        }
    }

    pub fn catalog(&self) -> Catalog<'_, Self> {
        Catalog::new(self)
    }

    pub fn positioned(&self) -> PositionedOpExecutor<'_, Self> {
        PositionedOpExecutor::new(self, self.config().max_statement_bytes)
    }
}

impl QueryRunner for Session {
    fn run_raw(&self, kind: CommandKind, text: &str) -> Result<String> {
        self.inner.run_raw(kind, text)
    }
}

pub fn connect(config: DriverConfig) -> Result<Session> {
    Session::connect(config)
}

pub fn disconnect(session: Session) -> Result<()> {
    session.disconnect()
}

pub fn execute(session: &Session, sql: &str) -> Result<Outcome> {
    session.execute(sql)
}
