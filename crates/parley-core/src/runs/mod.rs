pub mod dispatcher;
pub mod http;
pub mod ledger;
#[cfg(test)]
pub(crate) mod scripted;
pub mod transport;

pub use dispatcher::{
    PollPolicy, RequestId, RunCompletion, RunDispatcher, RunEvent, RunEventKind, RunHandle,
    RunPhase, RunRequest, RunSignal,
};
pub use http::HttpTransport;
pub use ledger::{DedupLedger, RunKey};
pub use transport::{
    AssistantTransport, DispatchReply, DispatchRequest, DispatchStatus, RunStatus, StatusQuery,
    StatusReply,
};
