pub mod engine;
pub mod labels;
pub mod render;
pub mod states;
pub mod validation;

pub use engine::ConversationMachine;
pub use labels::{global_intent, ChannelLabels, Intent, Menu, MenuOption, MenuSet};
pub use states::{
    ChannelFlows, CommitOutcome, Effect, EffectError, EmailOutcome, ExtractionOutcome, FlowKind,
    SessionUpdate, StatusOutcome, Step, Transition,
};
