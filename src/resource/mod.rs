//! Named resource management.
//!
//! # Data Flow
//! ```text
//! make("primary")
//!     → factory.rs (cached? return it)
//!     → keyed.rs (look up per-key options, intercept, connect, instrument)
//!     → entry cached with its closer
//!
//! Shutdown:
//!     factory.close() → every cached closer once → aggregate CloseError
//! ```
//!
//! # Design Decisions
//! - One factory per resource family; no shared lock between families
//! - Failed constructions are never cached
//! - Closing is final: `make` after `close` fails

pub mod error;
pub mod factory;
pub mod http_client;
pub mod keyed;

pub use error::{CloseError, CloseFailure, ResourceError};
pub use factory::{Closer, Factory, Maker, Pair};
pub use keyed::{Instrument, Interceptor, KeyedFactoryBuilder};
