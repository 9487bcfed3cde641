pub mod dispatch;
pub mod handlers;
pub mod json_rpc;
pub mod state;
pub mod stdio;

pub use dispatch::dispatch;
pub use state::{CoreContext, ProjectHandles, catch_up_project};
pub use stdio::serve_stdio;
