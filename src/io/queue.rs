//! Command queue and in-flight tracking
//!
//! The wire protocol carries no request id, so correlation is positional:
//! at most one command is in flight and the next one is sent only after its
//! response was processed or the response timeout expired.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::Command;

/// Interval of the queue dispatch tick
pub const COMMAND_TICK: Duration = Duration::from_millis(10);

/// How long a sent command may wait for its response
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// FIFO queue of pending commands with duplicate suppression
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<Command>,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `command` unless an equal command is already queued
    ///
    /// Returns whether the command was added.
    pub fn enqueue(&mut self, command: Command) -> bool {
        if self.commands.contains(&command) {
            return false;
        }
        self.commands.push_back(command);
        true
    }

    /// Take the next command to send
    pub fn pop(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop all queued commands
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// The single correlation slot for the command awaiting its response
#[derive(Debug, Default)]
pub struct InFlightSlot {
    current: Option<(Command, Instant)>,
}

impl InFlightSlot {
    /// Whether no command is awaiting a response
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// The command awaiting a response, if any
    pub fn command(&self) -> Option<&Command> {
        self.current.as_ref().map(|(command, _)| command)
    }

    /// Occupy the slot with `command`, stamping the send time
    pub fn begin(&mut self, command: Command) {
        self.current = Some((command, Instant::now()));
    }

    /// Clear the slot, returning the command that was in flight
    pub fn take(&mut self) -> Option<Command> {
        self.current.take().map(|(command, _)| command)
    }

    /// Whether the occupied slot has waited longer than `timeout`
    ///
    /// An idle slot never reports expiry.
    pub fn expired(&self, timeout: Duration) -> bool {
        self.current
            .as_ref()
            .is_some_and(|(_, sent)| sent.elapsed() >= timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadValue;

    #[test]
    fn test_enqueue_deduplicates() {
        let mut queue = CommandQueue::new();

        assert!(queue.enqueue(Command::read_data("SystemState")));
        assert!(!queue.enqueue(Command::read_data("SystemState")));
        assert_eq!(queue.len(), 1);

        // After dispatch the same command may be queued again.
        let _ = queue.pop().unwrap();
        assert!(queue.enqueue(Command::read_data("SystemState")));
    }

    #[test]
    fn test_differing_values_are_distinct() {
        let mut queue = CommandQueue::new();

        assert!(queue.enqueue(Command::command("Mode", PayloadValue::U32(1))));
        assert!(queue.enqueue(Command::command("Mode", PayloadValue::U32(2))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = CommandQueue::new();
        queue.enqueue(Command::read_token("Connect"));
        queue.enqueue(Command::read_token("Start"));

        assert_eq!(queue.pop().unwrap().name, "Connect");
        assert_eq!(queue.pop().unwrap().name, "Start");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_in_flight_slot() {
        let mut slot = InFlightSlot::default();
        assert!(slot.is_idle());
        assert!(!slot.expired(Duration::ZERO));

        slot.begin(Command::read_data("ImageData"));
        assert!(!slot.is_idle());
        assert_eq!(slot.command().unwrap().name, "ImageData");
        assert!(!slot.expired(Duration::from_secs(60)));
        assert!(slot.expired(Duration::ZERO));

        let command = slot.take().unwrap();
        assert_eq!(command.name, "ImageData");
        assert!(slot.is_idle());
    }
}
