pub mod analyze;
pub mod apply_cmd;
pub mod events_cmd;
pub mod proposals;
pub mod report_cmd;
