//! # rostersync-verify
//!
//! Convergence checks for the Verification phase.
//!
//! [`engine::DriftVerifier`] implements
//! [`rostersync_core::traits::ConvergenceVerifier`]. For each roster user it
//! compares the expected end state with a freshly loaded snapshot:
//!
//! 1. **Presence**: the user exists and is not deactivated.
//! 2. **Attributes**: display name, profile fields, custom fields, manager.
//! 3. **Memberships**: every expected group is among the observed groups.
//! 4. **Custom checks**: functions registered with `register_check`.
//!
//! Extra memberships are not drift; stale ones are the planner's concern.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use rostersync_verify::engine::DriftVerifier;
//!
//! let mut verifier = DriftVerifier::new();
//! verifier.register_check("has-title", Box::new(|_expected, observed| {
//!     observed.profile.get("title").is_none().then(|| Drift {
//!         field: "profile.title".into(),
//!         expected: "set".into(),
//!         actual: "".into(),
//!     })
//! }));
//! ```

pub mod engine;

pub use engine::DriftVerifier;
