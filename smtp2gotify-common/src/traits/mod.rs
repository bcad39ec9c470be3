pub mod fsm;
pub mod protocol;
pub mod sink;

pub use self::{
    fsm::FiniteStateMachine,
    protocol::{Protocol, SessionHandler},
    sink::{Notification, NotificationSink},
};
