//! CCM Session - Chip session registry for shared combo-chip hardware
//!
//! This crate provides the control plane that lets several independent
//! drivers (FM, Bluetooth, ...) share one physical chip:
//! - `registry` - Reference-counted chip sessions and their subordinate chain
//! - `init` - One-time, process-wide platform initialization
//! - `sim` - Simulated collaborators for tests and the `ccm` tool
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  acquire / release / configure  ┌──────────────────────────┐
//! │  FM driver   │───────────────────────────────▶│   ChipSessionRegistry    │
//! ├──────────────┤                                 │  ┌────────┐ ┌────────┐  │
//! │  BT driver   │───────────────────────────────▶│  │ slot 0 │ │ slot 1 │  │
//! └──────────────┘                                 │  └───┬────┘ └────────┘  │
//!                                                  └──────┼──────────────────┘
//!                                                         │ owns
//!                        ┌────────────────────────────────┼────────────────────┐
//!                        ▼                                ▼                    ▼
//!               ConfigAbstraction                      Adapter          AudioCoordinator
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Event publishing ignores the absence of subscribers

pub mod init;
pub mod registry;
pub mod sim;

pub use init::InitLatch;
pub use registry::{
    ChipSessionRegistry, ChipSessionView, SessionEvent, SessionHandle, EVENT_BUFFER,
};
