//! Per-stream state and the fetch loop.
//!
//! A tracked stream has two halves:
//! - [`StreamEntry`]: identity, names, tag view and the termination flag.
//!   Shared (`Arc`) between the registry and whoever holds the cursor, so a
//!   sync can refresh tags or retire a stream while a worker is fetching it.
//! - [`StreamState`]: the read cursor. It is a plain owned value that moves
//!   from the scheduler to exactly one worker and back, so two workers can
//!   never advance the same stream at once.

mod fetch;
mod state;
mod window;

pub use fetch::{FetchContext, FetchSummary, WindowEnd};
pub use state::{StreamEntry, StreamIdentity, StreamState, TagPolicy};
pub use window::WindowPolicy;
