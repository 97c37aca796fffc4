mod control;
mod lifecycle;
mod runner;
mod session_id;
mod spec;

pub use control::SessionHandle;
pub use control::SessionState;
pub use control::StopResponse;
pub use control::StopStatus;
pub use lifecycle::SessionController;
pub use runner::RunHandle;
pub use runner::SessionRunner;
pub use session_id::SessionId;
pub use spec::RunnerKind;
pub use spec::SessionSpec;
