//! Security-check orchestrator binary: wires `warden_config`,
//! `warden_registry`, `warden_pipeline`, and `warden_verdict` into a running
//! `Runtime`, and ships the reference `gitleaks`/`defectdojo`/`slack`
//! handlers plus the GitLab webhook ingress contract (spec.md §6).
//!
//! The original's FastAPI app (`app/main.py`, `app/routers/gitlab.py`) and
//! its Celery worker pool have no direct counterpart here: `warden` has no
//! HTTP server or message broker of its own (see spec.md's Non-goals). This
//! crate is the library an embedding HTTP service calls into — `ingress`'s
//! functions are pure, and `runtime::Runtime::handle_webhook` does the
//! orchestration a router's request handler would otherwise inline. The CLI
//! in `main.rs` drives the same `Runtime` for local testing and config
//! validation.

pub mod handlers;
pub mod ingress;
pub mod runtime;

pub use runtime::Runtime;
