//! # Repository Module
//!
//! Database repository implementations for the gateway.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  pinhub-sync                                                            │
//! │       │                                                                 │
//! │       │  db.pin_history().insert(&sample)                               │
//! │       │  db.device_tokens().find_token(&identity)                       │
//! │       ▼                                                                 │
//! │  PinHistoryRepository          DeviceTokenRepository                    │
//! │  ├── insert                    ├── find_token                           │
//! │  ├── delete_older_than_        ├── upsert_token                         │
//! │  │   keep_latest               ├── delete_token                         │
//! │  ├── latest                    └── list                                 │
//! │  └── count / count_for                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine talks to these through its own traits (`PinHistoryStore`,
//! `DeviceRegistry`) so tests can swap in in-memory versions.

pub mod device_token;
pub mod pin_history;
