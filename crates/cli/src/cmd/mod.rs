mod apply;
mod plan;
mod report;
mod set;

pub use apply::cmd_apply;
pub use plan::cmd_plan;
pub use set::{VariableArgs, cmd_set};
