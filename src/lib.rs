// src/lib.rs
//! Driver core for a single-threaded interactive database engine shared
//! by every client pointed at the same working directory.

#[cfg(not(unix))]
compile_error!("tapi-bridge needs POSIX named pipes and flock");

pub mod builder;
pub mod catalog;
pub mod channel;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod positioned;
pub mod registry;
pub mod schema;
pub mod session;
pub mod shared;
pub mod supervisor;
pub mod sync;
pub mod table;

pub use builder::{Outcome, ResultSetBuilder};
pub use catalog::Catalog;
pub use codec::{CommandKind, ProtocolCodec};
pub use config::{AttachMode, DriverConfig, Timeouts};
pub use error::{Error, ErrorCategory, Result, SyncObject};
pub use handshake::{ChannelTransfer, SameProcessTransfer};
pub use identity::EngineIdentity;
pub use positioned::{PositionedOpExecutor, RowStatus, RowTarget};
pub use schema::DBSchemaRelationInfo;
pub use session::{connect, disconnect, execute, QueryRunner, Session};
pub use supervisor::ProcessSupervisor;
pub use table::{Column, ResultTable, SqlType};
