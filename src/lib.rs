//! `ashlar` — a transactional write-ahead log and crash-recovery core.
//!
//! The crate is organised as the five cooperating components described
//! in the design notes, wired together behind one owning handle:
//!
//! ```text
//!  client tx ──► LogWriter.append ──► in-memory buffer ──► file
//!                                         │
//!                                         └► (on demand) LogCache blocks
//!  Applier ◄── SeqReader ◄── LogCache / file
//!  Checkpointer drives LogWriter.flush, records restart point, triggers
//!  deletion of logs strictly older than the checkpoint's min kept log.
//! ```
//!
//! External callers construct a [`Config`], then either
//! [`Engine::create`] a fresh database or [`Engine::open`] an existing
//! one (which runs recovery first). The `Table` trait in [`applier`] is
//! the narrow contract a data/index file collaborator implements to
//! receive replayed mutations; this crate owns no record/row/index
//! storage of its own.

pub mod applier;
pub mod cache;
pub mod checkpoint;
pub mod checkpointer;
pub mod config;
pub mod engine;
pub mod error;
pub mod header;
pub mod position;
pub mod reader;
pub mod record;
pub mod recovery;
pub mod writer;

pub use applier::{Applier, Table};
pub use config::Config;
pub use engine::Engine;
pub use error::{ErrorKind, Result, XlogError};
pub use position::{LogId, LogOffset, LogPosition, OpSeq, RecId, RowId, TabId, XactId};
pub use record::LogOperation;
