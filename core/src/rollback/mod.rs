//! Rollback engine
//!
//! Frame-indexed state history and resimulation, independent of networking.
//!
//! # Architecture
//!
//! - [`RollbackSession`]: owns the [`Simulation`](crate::Simulation) and a
//!   sliding window of per-frame state blobs and inputs. Any retained frame
//!   can be restored and replayed forward.
//! - [`InputLedger`]: inputs that have actually been received, plus the
//!   carry-forward rule that fills in players whose input has not arrived.
//! - [`StateBlob`]: opaque serialized state with an xxHash3 checksum.
//!
//! # Resimulation Flow
//!
//! 1. A corrected input for frame `F` arrives and is recorded in the ledger
//! 2. The session rolls back to `F - 1`
//! 3. Frames `F..=current` are rebuilt from the ledger and advanced with
//!    visuals suppressed
//! 4. History beyond the window is pruned as frames are recorded
//!
//! # Module Structure
//!
//! - `config`: rollback window settings
//! - `inputs`: per-frame input sets and the ledger
//! - `state`: serialized state blobs
//! - `session`: the rollback session itself

mod config;
mod inputs;
mod session;
mod state;

pub use config::{DEFAULT_MAX_ROLLBACK_FRAMES, RollbackConfig};
pub use inputs::{FrameInputs, InputLedger};
pub use session::{RollbackError, RollbackSession, RollbackStats};
pub use state::StateBlob;
