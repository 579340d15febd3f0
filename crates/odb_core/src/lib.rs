//! # ODB Core
//!
//! The object transaction manager of ODB: a typed object store layered
//! on an ordered key-value engine.
//!
//! This crate provides:
//! - [`ObjectDb`]: the database facade owning the registries and the
//!   oid and dictionary-id allocators
//! - [`ObjectTransaction`]: per-transaction object identity resolution,
//!   dirty tracking, lazy materialization, singleton management, and
//!   commit
//! - [`TableHandlers`]: the registration seam for per-type generated
//!   serializers, keyed by `(table, version)`
//! - [`ObjectIter`]: lazy enumeration of all objects in oid order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use odb_core::{ObjectDb, Options};
//! use odb_kv::MemoryKvStore;
//! use std::sync::Arc;
//!
//! let db = ObjectDb::new(Arc::new(MemoryKvStore::new()), Options::default())?;
//! db.register_table::<User>("User", 1, vec![], user_handlers())?;
//!
//! let tr = db.start_transaction()?;
//! let user = tr.new_object::<User>()?;
//! tr.store(&user)?;
//! tr.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
pub mod keyspace;
mod object;
mod table;
mod transaction;
mod types;

pub use config::Options;
pub use database::ObjectDb;
pub use error::{OdbError, OdbResult};
pub use object::{
    downcast_mut, downcast_ref, new_ref, type_id_of, Indirection, ObjKey, ObjRef, ObjWeak,
    ObjectCache, SMALL_CACHE_LIMIT,
};
pub use table::{
    CreatorFn, FreeContentFn, InitializerFn, LoaderFn, SaverFn, TableHandlers, TableInfo,
    TableRegistry,
};
pub use transaction::enumerate::ObjectIter;
pub use transaction::inline::{ObjectReader, ObjectWriter};
pub use transaction::relation::{RelationConstructorFn, RelationFactory};
pub use transaction::ObjectTransaction;
pub use types::{ObjectMetadata, ObjectState, Oid, TableId, INLINE_SENTINEL};
