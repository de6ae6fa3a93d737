//! Session and break lifecycle.

mod lifecycle;

pub use lifecycle::{
    end_break, end_session, idle_ratio, mark_compromised, pause_session, resume_session,
    start_break, start_session, SessionResult, COMPROMISE_IDLE_RATIO, IDLE_COMPROMISE_REASON,
};
