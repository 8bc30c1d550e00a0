//! # rostersync-ref-workspace
//!
//! Reference runtime for rostersync: an in-memory workspace service and five
//! end-to-end scenarios wiring the real engine, policy, audit and verifier.
//!
//! 1. **New hire**: a roster addition is created, profiled, placed in its
//!    manager's team and verified.
//! 2. **Protected group**: a removal from a protected group is skipped and
//!    audited, never sent.
//! 3. **Rate limit**: three 429 answers are absorbed by exponential backoff.
//! 4. **Deactivation**: leavers are deactivated only after confirmation, and
//!    only after everything they manage has moved to the fallback manager.
//! 5. **Rerun**: a second run against the converged workspace changes nothing.
//!
//! All data is fictional. No external service is contacted.

pub mod mock_data;
pub mod scenarios;
pub mod workspace;

pub use workspace::InMemoryWorkspace;
