//! Conversation runtime - the effectful half of the propbot engine
//!
//! `propbot-core` decides what happens next; this crate makes it happen:
//! - Resolves operator identity from phone numbers (`identity`)
//! - Extracts proposal drafts from free text through an LLM (`extraction`, `llm`)
//! - Transcribes voice notes (`transcription`)
//! - Commits proposals, creates clients and dispatches emails (`commit`)
//! - Pushes out-of-band messages to operators (`notify`)
//!
//! # Architecture
//!
//! Every inbound message runs through [`runtime::ConversationRuntime::handle`]:
//! 1. **Load** the session (expired or unreadable rows start over)
//! 2. **Identify** the sender when the machine asks for it
//! 3. **Step** the pure state machine
//! 4. **Effects** (extract, commit, email, status) are executed and fed back
//! 5. **Reply** through the channel transport, then persist or delete
//!
//! # Safety Principle
//!
//! The LLM only fills draft fields. Completeness, validation and every state
//! transition are decided by the deterministic machine in `propbot-core`.

pub mod commit;
pub mod extraction;
pub mod identity;
pub mod llm;
pub mod notify;
pub mod resilience;
pub mod runtime;
pub mod transcription;

pub use commit::{CommitError, EmailDispatcher, ProposalCommitService};
pub use extraction::{ExtractionError, ExtractionResult, LlmProposalExtractor, ProposalExtractor};
pub use identity::IdentityResolver;
pub use notify::{NotifyError, OperatorNotifier};
pub use runtime::{ConversationRuntime, HandleOutcome, RuntimeDeps, RuntimeError};
pub use transcription::{Transcriber, TranscriptionError};
