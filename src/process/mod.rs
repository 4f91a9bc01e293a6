pub mod events;
pub mod manager;
pub mod registry;
pub mod terminator;

pub use events::{Notification, NotificationReceiver, NotificationSender};
pub use manager::{LaunchOutcome, ProcessManager, ScriptStatus};
pub use registry::{ManagedProcess, ProcessRegistry, ProcessState};
pub use terminator::{ProcessTerminator, SysinfoTerminator};
