pub mod auditor;
pub mod auth;
pub mod clock;
pub mod images;
pub mod init;
pub mod orchestrator;
pub mod reconciler;
pub mod retention;
pub mod source;
pub mod staleness;
pub mod trigger;
pub mod twitch;
