//! Batch descriptors.

use std::collections::VecDeque;
use std::fmt;

use crate::session::{ReadType, ResultSink, WriteData};

/// Per-step completion callback; receives the step's success.
pub type StepCallback = Box<dyn FnOnce(bool) + Send>;

/// One primitive with its arguments.
#[derive(Debug, Clone)]
pub enum Command {
    Open {
        name: String,
        create: bool,
        exclusive: bool,
    },
    Read {
        kind: ReadType,
        sink: ResultSink,
    },
    Write {
        data: WriteData,
    },
    Truncate {
        size: u64,
    },
    Mkdir {
        name: String,
    },
    Chdir {
        name: String,
    },
    Fetch {
        name: String,
        url: String,
        overwrite: bool,
    },
    /// A command name nothing implements. Fails when dispatched.
    Unknown(String),
}

impl Command {
    /// Wire name of the command.
    pub fn name(&self) -> &str {
        match self {
            Command::Open { .. } => "open",
            Command::Read { .. } => "read",
            Command::Write { .. } => "write",
            Command::Truncate { .. } => "truncate",
            Command::Mkdir { .. } => "mkdir",
            Command::Chdir { .. } => "chdir",
            Command::Fetch { .. } => "fetch",
            Command::Unknown(name) => name,
        }
    }
}

/// A command plus its force flag and optional callback.
pub struct Descriptor {
    pub command: Command,
    /// Continue the batch even if this step fails.
    pub force: bool,
    pub(crate) callback: Option<StepCallback>,
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("command", &self.command)
            .field("force", &self.force)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl From<Command> for Descriptor {
    fn from(command: Command) -> Self {
        Self::new(command)
    }
}

impl Descriptor {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            force: false,
            callback: None,
        }
    }

    pub fn open(name: impl Into<String>, create: bool, exclusive: bool) -> Self {
        Self::new(Command::Open {
            name: name.into(),
            create,
            exclusive,
        })
    }

    /// Read into `sink`; keep a clone of the sink to see the result.
    pub fn read(kind: ReadType, sink: &ResultSink) -> Self {
        Self::new(Command::Read {
            kind,
            sink: sink.clone(),
        })
    }

    pub fn write(data: impl Into<WriteData>) -> Self {
        Self::new(Command::Write { data: data.into() })
    }

    pub fn truncate(size: u64) -> Self {
        Self::new(Command::Truncate { size })
    }

    pub fn mkdir(name: impl Into<String>) -> Self {
        Self::new(Command::Mkdir { name: name.into() })
    }

    pub fn chdir(name: impl Into<String>) -> Self {
        Self::new(Command::Chdir { name: name.into() })
    }

    pub fn fetch(name: impl Into<String>, url: impl Into<String>, overwrite: bool) -> Self {
        Self::new(Command::Fetch {
            name: name.into(),
            url: url.into(),
            overwrite,
        })
    }

    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(Command::Unknown(name.into()))
    }

    /// Mark the step as forced.
    pub fn forced(self) -> Self {
        self.with_force(true)
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Call `callback` with the step's outcome once it completes.
    pub fn on_complete(mut self, callback: impl FnOnce(bool) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Ordered list of descriptors, consumed front to back by the executor.
#[derive(Debug, Default)]
pub struct Batch {
    steps: VecDeque<Descriptor>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn push(&mut self, step: impl Into<Descriptor>) {
        self.steps.push_back(step.into());
    }

    /// Builder form of [`Batch::push`].
    pub fn then(mut self, step: impl Into<Descriptor>) -> Self {
        self.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn pop_front(&mut self) -> Option<Descriptor> {
        self.steps.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.steps.iter()
    }
}

impl FromIterator<Descriptor> for Batch {
    fn from_iter<I: IntoIterator<Item = Descriptor>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Descriptor>> for Batch {
    fn from(steps: Vec<Descriptor>) -> Self {
        steps.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(Descriptor::open("a", true, false).command.name(), "open");
        assert_eq!(Descriptor::truncate(0).command.name(), "truncate");
        assert_eq!(Descriptor::unknown("frobnicate").command.name(), "frobnicate");
    }

    #[test]
    fn test_batch_order_and_flags() {
        let batch = Batch::new()
            .then(Descriptor::mkdir("Foo"))
            .then(Descriptor::chdir("Foo").forced())
            .then(Command::Truncate { size: 3 });

        let names: Vec<_> = batch.iter().map(|d| d.command.name()).collect();
        assert_eq!(names, ["mkdir", "chdir", "truncate"]);

        let forces: Vec<_> = batch.iter().map(|d| d.force).collect();
        assert_eq!(forces, [false, true, false]);
    }

    #[test]
    fn test_debug_hides_callback() {
        let d = Descriptor::mkdir("x").on_complete(|_| {});
        let text = format!("{d:?}");
        assert!(text.contains("callback: true"));
    }
}
