//! Reference handler implementations (C9): one `ScanHandler`
//! (`gitleaks`), one `OutputHandler` (`defectdojo`), and one
//! `NotificationHandler` (`slack`), registered by `crate::runtime::Runtime`.
//!
//! These are deliberately the same three vendors the original shipped
//! (`app/secbot/inputs/gitlab/handlers/{gitleaks,defectdojo,slack}`), kept
//! as a working reference implementation rather than a generic plugin
//! ecosystem — new handlers are added by implementing the traits in
//! `warden_registry` and registering them alongside these.

pub mod defectdojo;
pub mod gitleaks;
pub mod slack;
