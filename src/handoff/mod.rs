pub mod client;
pub mod clock;
pub mod protocol;
pub mod worker;

pub use client::{HandoffBackend, PollPolicy};
pub use clock::{Clock, ManualClock, TokioClock};
pub use protocol::{
    HandoffDirectory, HandoffState, parse_request_file_name, request_file_name,
    response_file_name,
};
pub use worker::HandoffWorker;
