pub mod alert_rules;
pub mod dead_letters;
pub mod diff_snapshots;
pub mod leases;
pub mod projects;
pub mod repositories;
pub mod runs;
pub mod secrets;
pub mod structured_events;
pub mod tasks;
pub mod workers;
pub mod workflow_executions;
pub mod workflows;
