//! Board: Workspace → Project → Ticket → Task tracking back-end.
//!
//! ## Overview
//!
//! Every level is owned by the one above it. A child can only be created
//! under an existing parent, and deleting a parent removes its whole subtree.
//! The schema carries parent ids as plain indexed columns with no foreign
//! keys, so both rules are enforced by `db` inside a single transaction.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, CORS, TraceLayer)      │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘  JSON    │         │  auth.rs  (RequireActor / MaybeActor)   │
//!                       │         │                                        │
//!                       │         │ DbHandle::call() (spawn_blocking)      │
//!                       │         v                                        │
//!                       │  db.rs  (BoardDb: CRUD, validate_parent_exists,  │
//!                       │          cascade_delete, filtered paging)        │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                              |
//! |-----------|-------------------------------------------------------------|
//! | `models`  | Entities, enums, create/patch payloads, `Validate`, paging  |
//! | `auth`    | JWT verification and issuing, actor extractors              |
//!
//! ## Typical Request Flow (delete a workspace)
//!
//! 1. `DELETE /api/workspaces/{id}` → `RequireActor` verifies the bearer token.
//! 2. `api::delete_workspace` hands off to `BoardDb::cascade_delete`.
//! 3. One transaction removes tasks, then tickets, then projects, then the
//!    workspace itself. A missing workspace rolls back with `NotFound` (404).
//! 4. The per-level counts are logged and the handler answers 204.

pub mod api;
pub mod auth;
pub mod db;
pub mod models;
pub mod server;
