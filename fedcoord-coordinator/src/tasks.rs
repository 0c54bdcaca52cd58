//! Coordinator task framework.
//!
//! The coordinator runs as a small set of async actors communicating over
//! typed mpsc channels. All engine state lives in one task (the engine),
//! which serializes every mutation; the command server task only does
//! network I/O and forwards operations with a oneshot reply channel.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use fedcoord_core::aggregate::AggregateError;
use fedcoord_core::model_store::StoredModel;

use crate::api::{ApiRequest, ApiResponse};

/// Default capacity for task message queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Message envelope wrapping typed payloads with a shutdown signal.
#[derive(Debug)]
pub enum TaskMessage<T> {
    /// Regular message payload.
    Message(T),
    /// The task should terminate gracefully.
    Shutdown,
}

impl<T> TaskMessage<T> {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TaskMessage::Shutdown)
    }

    /// Returns the payload, or `None` for shutdown.
    pub fn into_message(self) -> Option<T> {
        match self {
            TaskMessage::Message(msg) => Some(msg),
            TaskMessage::Shutdown => None,
        }
    }
}

/// Handle for sending messages to a task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    tx: mpsc::Sender<TaskMessage<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> TaskHandle<T> {
    pub fn new(tx: mpsc::Sender<TaskMessage<T>>) -> Self {
        Self { tx }
    }

    /// Sends a message, failing only if the task is gone.
    pub async fn send(&self, msg: T) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Message(msg)).await
    }

    /// Sends a shutdown signal.
    pub async fn shutdown(&self) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates a task channel pair with the default capacity.
pub fn task_channel<T>() -> (TaskHandle<T>, mpsc::Receiver<TaskMessage<T>>) {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    (TaskHandle::new(tx), rx)
}

/// Base trait for coordinator tasks.
#[async_trait::async_trait]
pub trait Task: Send + 'static {
    /// The message type this task processes.
    type Message: Send;

    /// Runs the task's main loop until shutdown.
    async fn run(&mut self, rx: mpsc::Receiver<TaskMessage<Self::Message>>);
}

/// Messages processed by the engine task.
#[derive(Debug)]
pub enum EngineMessage {
    /// One API facade operation with its reply channel. If the caller went
    /// away, the command still runs to completion and the reply is dropped.
    Api {
        request: ApiRequest,
        respond_to: oneshot::Sender<ApiResponse>,
    },
    /// An aggregation worker finished; the engine publishes the result.
    AggregationFinished {
        round_id: u64,
        result: Result<StoredModel, AggregateError>,
        /// When the worker was dispatched, for the aggregation-duration
        /// metric.
        started: Instant,
        /// Present when an explicit `aggregate_round` request is waiting on
        /// this outcome; absent for async-controller triggers.
        respond_to: Option<oneshot::Sender<ApiResponse>>,
    },
}
