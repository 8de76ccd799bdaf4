use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::status::{ExecutionState, SerializableError, StatusNode};

/// Bounded inter-stage queue capacity: tight backpressure, low latency,
/// bounded memory. Fixed rather than exposed as a knob.
const STAGE_QUEUE_CAPACITY: usize = 2;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;
type StageFn<T> = Arc<dyn Fn(T) -> BoxFuture<Result<T, PipelineError>> + Send + Sync>;
type ProducerFn<T> = Arc<dyn Fn(CancellationToken) -> BoxStream<T> + Send + Sync>;

/// Result of running a [`PipelineExecutor`]: the last value seen from the
/// final stage, and the execution status tree built while running it.
pub struct PipelineRun<T> {
    pub result: Result<Option<T>, PipelineError>,
    pub status: Arc<StatusNode>,
}

/// Async pipeline executor: a producer stage yielding an async
/// sequence of `T`, followed by zero or more consumer stages (`T -> T`),
/// connected by bounded queues and run concurrently.
pub struct PipelineExecutor<T> {
    name: String,
    producer_name: String,
    producer: ProducerFn<T>,
    stages: Vec<(String, StageFn<T>)>,
}

pub struct PipelineBuilder<T> {
    name: String,
    producer: Option<(String, ProducerFn<T>)>,
    stages: Vec<(String, StageFn<T>)>,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer: None,
            stages: Vec::new(),
        }
    }

    /// Set the producer stage: a function from a cancellation token to an
    /// async sequence of `T`.
    pub fn producer<F, S>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CancellationToken) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        let f: ProducerFn<T> = Arc::new(move |cancel| Box::pin(f(cancel)) as BoxStream<T>);
        self.producer = Some((name.into(), f));
        self
    }

    /// `Add<Op,T>`: append a plain consumer stage.
    pub fn add_stage<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let func: StageFn<T> = Arc::new(move |item| Box::pin(f(item)));
        self.stages.push((name.into(), func));
        self
    }

    /// # Panics
    /// Panics if no producer was set — a pipeline with nothing to produce
    /// is a construction error, not a runtime one.
    pub fn build(self) -> PipelineExecutor<T> {
        let (producer_name, producer) = self.producer.expect("pipeline requires a producer stage");
        PipelineExecutor {
            name: self.name,
            producer_name,
            producer,
            stages: self.stages,
        }
    }
}

impl<T: Send + 'static> PipelineExecutor<T> {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder<T> {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the pipeline over its configured producer.
    pub async fn execute(&self, cancel: CancellationToken) -> PipelineRun<T> {
        let stream = (self.producer)(cancel.clone());
        self.run(stream, cancel).await
    }

    /// Run the pipeline's consumer stages over a single seed value instead
    /// of its configured producer. Used when this executor is nested inside
    /// a [`crate::SequenceExecutor`] step via `AddAsyncPipeline`, where the
    /// outer value supplies one item per invocation rather than a stream.
    pub async fn execute_seeded(&self, seed: T, cancel: CancellationToken) -> PipelineRun<T> {
        let stream = stream::once(async move { seed });
        self.run(Box::pin(stream), cancel).await
    }

    async fn run(&self, producer_stream: BoxStream<T>, cancel: CancellationToken) -> PipelineRun<T> {
        let root = StatusNode::new(self.name.clone());
        root.start().expect("fresh status node always starts cleanly");
        let producer_node = root.child(self.producer_name.clone());
        let stage_nodes: Vec<Arc<StatusNode>> = self.stages.iter().map(|(name, _)| root.child(name.clone())).collect();

        // A child of the caller's token: cancelling it signals every stage
        // to stop at its next queue wait, without affecting the caller's
        // own token. Any stage faulting cancels it for everyone else.
        let fault_token = cancel.child_token();

        let stage_count = self.stages.len();
        let mut senders: Vec<Option<mpsc::Sender<T>>> = Vec::with_capacity(stage_count + 1);
        let mut receivers: Vec<Option<mpsc::Receiver<T>>> = Vec::with_capacity(stage_count + 1);
        for _ in 0..=stage_count {
            let (tx, rx) = mpsc::channel::<T>(STAGE_QUEUE_CAPACITY);
            senders.push(Some(tx));
            receivers.push(Some(rx));
        }

        let producer_task = {
            let sender = senders[0].take().unwrap();
            let node = producer_node.clone();
            let fault_token = fault_token.clone();
            tokio::spawn(async move {
                node.start().ok();
                let mut stream = producer_stream;
                loop {
                    tokio::select! {
                        biased;
                        () = fault_token.cancelled() => {
                            node.cancel().ok();
                            return;
                        }
                        item = stream.next() => {
                            match item {
                                Some(value) => {
                                    if sender.send(value).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                }
                node.complete().ok();
            })
        };

        let mut stage_tasks = Vec::with_capacity(stage_count);
        for (i, (stage_name, func)) in self.stages.iter().enumerate() {
            let mut rx = receivers[i].take().unwrap();
            let tx = senders[i + 1].take().unwrap();
            let node = stage_nodes[i].clone();
            let func = func.clone();
            let fault_token = fault_token.clone();
            let stage_name = stage_name.clone();
            stage_tasks.push(tokio::spawn(async move {
                node.start().ok();
                loop {
                    let item = tokio::select! {
                        biased;
                        () = fault_token.cancelled() => {
                            node.cancel().ok();
                            return;
                        }
                        item = rx.recv() => item,
                    };
                    let Some(item) = item else { break };
                    match func(item).await {
                        Ok(out) => {
                            if tx.send(out).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(stage = %stage_name, "pipeline stage faulted: {e}");
                            node.fault(SerializableError::new(e.to_string())).ok();
                            fault_token.cancel();
                            return;
                        }
                    }
                }
                node.complete().ok();
            }));
        }

        let last = Arc::new(Mutex::new(None::<T>));
        let sink_task = {
            let mut rx = receivers[stage_count].take().unwrap();
            let last = last.clone();
            tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    *last.lock().unwrap() = Some(item);
                }
            })
        };

        drop(senders);
        drop(receivers);

        let _ = producer_task.await;
        for task in stage_tasks {
            let _ = task.await;
        }
        let _ = sink_task.await;

        let faulted = stage_nodes.iter().find(|n| n.state() == ExecutionState::Faulted).cloned();
        if let Some(node) = faulted {
            let message = node.snapshot().error.map(|e| e.message).unwrap_or_default();
            let stage = node.snapshot().name;
            for sibling in std::iter::once(&producer_node).chain(stage_nodes.iter()) {
                if !sibling.state().is_terminal() {
                    sibling.cancel().ok();
                }
            }
            root.fault(SerializableError::new(format!("stage '{stage}' faulted: {message}"))).ok();
            return PipelineRun {
                result: Err(PipelineError::StageFaulted { stage, message }),
                status: root,
            };
        }

        if cancel.is_cancelled() {
            for sibling in std::iter::once(&producer_node).chain(stage_nodes.iter()) {
                if !sibling.state().is_terminal() {
                    sibling.cancel().ok();
                }
            }
            root.cancel().ok();
            return PipelineRun {
                result: Err(PipelineError::Cancelled),
                status: root,
            };
        }

        root.complete().ok();
        PipelineRun {
            result: Ok(last.lock().unwrap().take()),
            status: root,
        }
    }
}
