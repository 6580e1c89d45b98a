pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use domain::draft::{DraftField, ProposalDraft};
pub use domain::identity::{Identity, OperatorId, OperatorProfile, TransportAddress};
pub use domain::message::{Channel, InboundMessage, MessageKind, OutboundMessage};
pub use domain::proposal::{Client, ClientId, ProposalId, ProposalStatus, ProposalSummary};
pub use domain::session::{Session, SessionKey};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{ConversationMachine, Effect, Step, Transition};
