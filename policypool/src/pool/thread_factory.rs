//! Worker thread creation.

use std::io;

/// Creates the OS threads that run pool workers.
pub trait ThreadFactory: Send + Sync {
    /// Starts `body` on a new thread called `name`.
    fn spawn(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<()>;
}

/// Spawns detached, named `std` threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedThreadFactory {
    stack_size: Option<usize>,
}

impl NamedThreadFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl ThreadFactory for NamedThreadFactory {
    fn spawn(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<()> {
        let mut builder = std::thread::Builder::new().name(name);
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        builder.spawn(body).map(|_| ())
    }
}
