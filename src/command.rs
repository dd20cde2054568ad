//! Remote save and load triggers.
//!
//! A transport (a remote procedure service, a debug console) exposes the two operations
//! [`SAVE_TRIGGER`] and [`LOAD_TRIGGER`] through a [`CommandChannel`]. Requests may arrive on the
//! transport's own thread, so a trigger only pushes a [`SaveCommand`] onto a [`CommandQueue`] and
//! acknowledges it. The queue is drained on the simulation thread by
//! [`StateSaveController::process_commands`](crate::StateSaveController::process_commands), one
//! command at a time.
//! ```rust
//! use bevy_state_save::command::{CommandChannel, LocalCommandChannel, SAVE_TRIGGER};
//! use bevy_state_save::blob::MemoryBlobStore;
//! use bevy_state_save::saving::ClassRegistry;
//! use bevy_state_save::{SimWorldHost, StateSaveBuilder};
//!
//! let host = SimWorldHost::new("harbor", ClassRegistry::default_registry());
//! let mut controller = StateSaveBuilder::new(host, MemoryBlobStore::default())
//!     .build()
//!     .unwrap();
//!
//! let mut channel = LocalCommandChannel::default();
//! controller.bind_commands(&mut channel);
//!
//! // Usually called from the transport thread
//! assert_eq!(channel.invoke(SAVE_TRIGGER, Some("checkpoint".to_string())), Some(true));
//!
//! // Called once per tick on the simulation thread
//! assert_eq!(controller.process_commands(), 1);
//! ```

use std::sync::mpsc::{self, Receiver, Sender};

use bevy::utils::HashMap;
use chrono::{DateTime, Utc};

pub const SAVE_TRIGGER: &str = "save-trigger";
pub const LOAD_TRIGGER: &str = "load-trigger";

/// A request to save or load, carrying the optional save name given by the caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveCommand {
    Save(Option<String>),
    Load(Option<String>),
}

#[derive(Clone, Debug)]
pub struct CommandMeta {
    pub command: SaveCommand,
    pub command_time: DateTime<Utc>,
}

/// The queue of pending [`SaveCommand`]s. Doesn't do anything until drained
pub struct CommandQueue {
    sender: Sender<CommandMeta>,
    receiver: Receiver<CommandMeta>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        let (sender, receiver) = mpsc::channel();
        CommandQueue { sender, receiver }
    }
}

impl CommandQueue {
    /// A handle that can push commands from any thread
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Push a new command to the end of the queue
    pub fn push(&self, command: SaveCommand) {
        // The receiver lives as long as self, so this cannot fail
        let _ = self.sender.send(CommandMeta {
            command,
            command_time: Utc::now(),
        });
    }

    /// Take the oldest command in the queue. Returns None if queue is empty
    pub fn pop(&self) -> Option<CommandMeta> {
        self.receiver.try_recv().ok()
    }
}

/// Pushes commands onto a [`CommandQueue`] from any thread
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<CommandMeta>,
}

impl CommandSender {
    /// Queues the command. Returns false if the queue no longer exists.
    pub fn send(&self, command: SaveCommand) -> bool {
        self.sender
            .send(CommandMeta {
                command,
                command_time: Utc::now(),
            })
            .is_ok()
    }
}

/// Handles one remote operation. Receives the optional parameter of the request and returns the
/// acknowledgement sent back.
pub type RemoteHandler = Box<dyn Fn(Option<String>) -> bool + Send + Sync>;

/// A transport exposing named remote operations
pub trait CommandChannel {
    /// Registers the handler of an operation. Returns false if the operation could not be
    /// registered.
    fn register_operation(&mut self, operation: &str, handler: RemoteHandler) -> bool;
}

/// An in process [`CommandChannel`] whose operations are invoked directly
#[derive(Default)]
pub struct LocalCommandChannel {
    handlers: HashMap<String, RemoteHandler>,
}

impl LocalCommandChannel {
    /// Invokes an operation, returning its acknowledgement or None if nothing is registered under
    /// that name
    pub fn invoke(&self, operation: &str, parameter: Option<String>) -> Option<bool> {
        self.handlers
            .get(operation)
            .map(|handler| handler(parameter))
    }

    pub fn operations(&self) -> Vec<String> {
        let mut operations: Vec<String> = self.handlers.keys().cloned().collect();
        operations.sort();
        operations
    }
}

impl CommandChannel for LocalCommandChannel {
    fn register_operation(&mut self, operation: &str, handler: RemoteHandler) -> bool {
        if self.handlers.contains_key(operation) {
            return false;
        }
        self.handlers.insert(operation.to_string(), handler);
        true
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::{CommandChannel, CommandQueue, LocalCommandChannel, SaveCommand};

    #[test]
    fn test_queue_is_fifo() {
        let queue = CommandQueue::default();
        queue.push(SaveCommand::Save(None));
        queue.push(SaveCommand::Load(Some("b".to_string())));

        assert_eq!(queue.pop().map(|m| m.command), Some(SaveCommand::Save(None)));
        assert_eq!(
            queue.pop().map(|m| m.command),
            Some(SaveCommand::Load(Some("b".to_string())))
        );
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_commands_cross_threads() {
        let queue = CommandQueue::default();
        let sender = queue.sender();
        let mut channel = LocalCommandChannel::default();
        assert!(channel.register_operation(
            "save-trigger",
            Box::new(move |name| sender.send(SaveCommand::Save(name)))
        ));
        assert!(!channel.register_operation("save-trigger", Box::new(|_| true)));

        let ack = thread::spawn(move || channel.invoke("save-trigger", Some("x".to_string())))
            .join()
            .unwrap();

        assert_eq!(ack, Some(true));
        assert_eq!(
            queue.pop().map(|m| m.command),
            Some(SaveCommand::Save(Some("x".to_string())))
        );
    }
}
