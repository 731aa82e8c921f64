//! Actor-based runtime
//!
//! Each actor runs as an independent tokio task and talks over channels.
//!
//! ```text
//!  SchedulerActor (one per check)        CollectorActor (one per agent)
//!          │ CheckEvent                          │ StatEvent
//!          ▼                                     │
//!   ┌──────────────┐  IncidentEvent              │
//!   │IncidentActor │──────────────┐              │
//!   └──────────────┘              ▼              ▼
//!          ▲               ┌────────────────────────┐
//!          └── CheckEvent ─│      StorageActor      │
//!                          └────────────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Events**: actors publish events on broadcast channels for fan-out
//! 3. **Request/Response**: oneshot channels inside commands

pub mod collector;
pub mod incident;
pub mod messages;
pub mod scheduler;
pub mod storage;
