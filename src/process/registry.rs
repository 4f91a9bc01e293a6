use crate::error::RegistryError;
use crate::process::events::NotificationSender;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state of a managed process. Only `Running` entries are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited { code: Option<i32>, signal: Option<i32> },
    Failed(String),
}

/// A live script process tracked by the registry.
///
/// The OS child itself is owned by the process's monitor task; the entry
/// holds the launch identity and the pid used to address it.
#[derive(Debug)]
pub struct ManagedProcess {
    pub script_name: String,
    pub launch_id: Uuid,
    pub pid: u32,
    pub state: ProcessState,
    pub started_at: DateTime<Utc>,
    notifier: Option<NotificationSender>,
}

impl ManagedProcess {
    pub fn new(script_name: impl Into<String>, pid: u32, notifier: Option<NotificationSender>) -> Self {
        Self {
            script_name: script_name.into(),
            launch_id: Uuid::new_v4(),
            pid,
            state: ProcessState::Running,
            started_at: Utc::now(),
            notifier,
        }
    }

    pub fn notifier(&self) -> Option<&NotificationSender> {
        self.notifier.as_ref()
    }
}

/// Name → live process map. At most one entry per script name.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: HashMap<String, ManagedProcess>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `process` under `name`. Never overwrites an existing entry.
    pub fn insert(&mut self, name: &str, process: ManagedProcess) -> Result<(), RegistryError> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::DuplicateEntry(name.to_string()));
        }
        self.entries.insert(name.to_string(), process);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ManagedProcess> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ManagedProcess> {
        self.entries.remove(name)
    }

    /// Removes `name` only if it still belongs to launch `launch_id`.
    pub fn remove_launch(&mut self, name: &str, launch_id: Uuid) -> Option<ManagedProcess> {
        match self.entries.get(name) {
            Some(entry) if entry.launch_id == launch_id => self.entries.remove(name),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pairs every configured name with its live entry, if any.
    ///
    /// The iterator is lazy and `Clone`, so a report can walk it more than once.
    pub fn list_all<'a, I>(&'a self, configured: I) -> impl Iterator<Item = (&'a str, Option<&'a ManagedProcess>)> + Clone + 'a
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: Clone + 'a,
    {
        configured.into_iter().map(move |name| (name, self.entries.get(name)))
    }
}
