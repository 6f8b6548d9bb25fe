//! Session lifecycle engine.

pub use self::{
    reporter::Reporter,
    session::{Outcome, Session, State},
};

mod reporter;
mod session;
