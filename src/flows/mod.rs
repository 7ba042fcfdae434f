//! Login flows

pub mod login;

pub use login::{LoginFlow, LoginFlowBuilder, LoginOutcome, Settled};
