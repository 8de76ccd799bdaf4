use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::pipeline::PipelineExecutor;
use crate::status::{ExecutionState, SerializableError, StatusNode};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type StepFn<T> = Arc<dyn Fn(T, CancellationToken) -> BoxFuture<Result<T, PipelineError>> + Send + Sync>;
type ConditionFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// One step in a [`SequenceExecutor`]. Plain steps run unconditionally; a
/// nested sequence or pipeline only runs its sub-tree when `condition`
/// (absent means always) evaluates true against the current value,
/// otherwise its status node transitions straight to `Skipped`.
enum Step<T> {
    Op {
        name: String,
        func: StepFn<T>,
    },
    Nested {
        name: String,
        condition: Option<ConditionFn<T>>,
        run: StepFn<T>,
    },
}

/// Result of running a [`SequenceExecutor`]: the final threaded value, and
/// the status tree built while running it.
pub struct SequenceRun<T> {
    pub result: Result<T, PipelineError>,
    pub status: Arc<StatusNode>,
}

pub struct SequenceBuilder<T> {
    name: String,
    steps: Vec<Step<T>>,
}

pub struct SequenceExecutor<T> {
    name: String,
    steps: Vec<Step<T>>,
}

impl<T: Clone + Send + 'static> SequenceBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// `Add<Op,T>`: an unconditional step threading `T` to `T`.
    pub fn add<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let func: StepFn<T> = Arc::new(move |value, _cancel| Box::pin(f(value)));
        self.steps.push(Step::Op { name: name.into(), func });
        self
    }

    /// `AddSequence(condition?, mapInto, inner, mapOut)`: runs a nested
    /// sequence of `U` only when `condition` is true (or always, if absent),
    /// mapping into and back out of the outer value `T`.
    pub fn add_sequence<U, C, MapInto, MapOut>(
        mut self,
        name: impl Into<String>,
        condition: Option<C>,
        map_into: MapInto,
        inner: SequenceExecutor<U>,
        map_out: MapOut,
    ) -> Self
    where
        U: Clone + Send + 'static,
        C: Fn(&T) -> bool + Send + Sync + 'static,
        MapInto: Fn(&T) -> U + Send + Sync + 'static,
        MapOut: Fn(T, U) -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(inner);
        let run: StepFn<T> = Arc::new(move |value, cancel| {
            let inner = inner.clone();
            let seed = map_into(&value);
            Box::pin(async move {
                let run = inner.execute(seed, cancel).await;
                match run.result {
                    Ok(out) => Ok(map_out(value, out)),
                    Err(e) => Err(e),
                }
            })
        });
        self.steps.push(Step::Nested {
            name: name.into(),
            condition: condition.map(|c| Arc::new(c) as ConditionFn<T>),
            run,
        });
        self
    }

    /// `AddAsyncPipeline(mapInto, inner, mapOut)`: runs a nested async
    /// pipeline over one value derived from the outer value `T`, threading
    /// the pipeline's final value back into `T`.
    pub fn add_async_pipeline<U, MapInto, MapOut>(
        mut self,
        name: impl Into<String>,
        condition: Option<impl Fn(&T) -> bool + Send + Sync + 'static>,
        map_into: MapInto,
        inner: PipelineExecutor<U>,
        map_out: MapOut,
    ) -> Self
    where
        U: Clone + Send + 'static,
        MapInto: Fn(&T) -> U + Send + Sync + 'static,
        MapOut: Fn(T, Option<U>) -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(inner);
        let run: StepFn<T> = Arc::new(move |value, cancel| {
            let inner = inner.clone();
            let seed = map_into(&value);
            Box::pin(async move {
                let run = inner.execute_seeded(seed, cancel).await;
                match run.result {
                    Ok(out) => Ok(map_out(value, out)),
                    Err(e) => Err(e),
                }
            })
        });
        self.steps.push(Step::Nested {
            name: name.into(),
            condition: condition.map(|c| Arc::new(c) as ConditionFn<T>),
            run,
        });
        self
    }

    pub fn build(self) -> SequenceExecutor<T> {
        SequenceExecutor {
            name: self.name,
            steps: self.steps,
        }
    }
}

impl<T: Clone + Send + 'static> SequenceExecutor<T> {
    pub fn builder(name: impl Into<String>) -> SequenceBuilder<T> {
        SequenceBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thread `seed` through every step in order. The first fault halts the
    /// sequence; every step from that point on (including the one that
    /// never got to evaluate its own condition) transitions Pending ->
    /// Skipped, and the caller receives the fault.
    pub async fn execute(&self, seed: T, cancel: CancellationToken) -> SequenceRun<T> {
        let root = StatusNode::new(self.name.clone());
        root.start().expect("fresh status node always starts cleanly");

        // Children are created up front so a downstream step skipped by an
        // earlier fault has a real Pending->Skipped transition to show,
        // rather than never existing in the tree at all.
        let nodes: Vec<Arc<StatusNode>> = self.steps.iter().map(|step| root.child(step_name(step))).collect();

        let mut value = seed;
        let mut fault: Option<PipelineError> = None;

        for (i, step) in self.steps.iter().enumerate() {
            let node = &nodes[i];

            if cancel.is_cancelled() {
                node.cancel().ok();
                fault.get_or_insert(PipelineError::Cancelled);
                continue;
            }

            if fault.is_some() {
                node.skip().ok();
                continue;
            }

            match step {
                Step::Op { name, func } => {
                    node.start().ok();
                    match func(value.clone(), cancel.clone()).await {
                        Ok(out) => {
                            value = out;
                            node.complete().ok();
                        }
                        Err(e) => {
                            tracing::warn!(step = %name, "sequence step faulted: {e}");
                            node.fault(SerializableError::new(e.to_string())).ok();
                            fault = Some(e);
                        }
                    }
                }
                Step::Nested { name, condition, run } => {
                    let should_run = condition.as_ref().is_none_or(|c| c(&value));
                    if !should_run {
                        node.skip().ok();
                        continue;
                    }
                    node.start().ok();
                    match run(value.clone(), cancel.clone()).await {
                        Ok(out) => {
                            value = out;
                            node.complete().ok();
                        }
                        Err(e) => {
                            tracing::warn!(step = %name, "nested sequence/pipeline step faulted: {e}");
                            node.fault(SerializableError::new(e.to_string())).ok();
                            fault = Some(e);
                        }
                    }
                }
            }
        }

        match fault {
            Some(e) => {
                root.fault(SerializableError::new(e.to_string())).ok();
                SequenceRun {
                    result: Err(e),
                    status: root,
                }
            }
            None => {
                root.complete().ok();
                SequenceRun {
                    result: Ok(value),
                    status: root,
                }
            }
        }
    }
}

fn step_name<T>(step: &Step<T>) -> String {
    match step {
        Step::Op { name, .. } => name.clone(),
        Step::Nested { name, .. } => name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn threads_value_through_ops_in_order() {
        let seq: SequenceExecutor<i32> = SequenceExecutor::builder("math")
            .add("double", |n: i32| async move { Ok(n * 2) })
            .add("add-ten", |n: i32| async move { Ok(n + 10) })
            .build();
        let run = seq.execute(5, CancellationToken::new()).await;
        assert_eq!(run.result.unwrap(), 20);
        assert_eq!(run.status.state(), ExecutionState::Completed);
    }

    #[tokio::test]
    async fn fault_halts_sequence_and_skips_downstream() {
        let seq: SequenceExecutor<i32> = SequenceExecutor::builder("faulting")
            .add("ok", |n: i32| async move { Ok(n) })
            .add("boom", |_n: i32| async move { Err(PipelineError::application("nope")) })
            .add("never-runs", |n: i32| async move { Ok(n) })
            .build();
        let run = seq.execute(1, CancellationToken::new()).await;
        assert!(run.result.is_err());
        let snapshot = run.status.snapshot();
        assert_eq!(snapshot.nodes[0].state, ExecutionState::Completed);
        assert_eq!(snapshot.nodes[1].state, ExecutionState::Faulted);
        assert_eq!(snapshot.nodes[2].state, ExecutionState::Skipped);
    }

    #[tokio::test]
    async fn false_condition_skips_nested_sequence_without_running_it() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let inner: SequenceExecutor<i32> = SequenceExecutor::builder("inner")
            .add("mark", move |n: i32| {
                let ran = ran_clone.clone();
                async move {
                    ran.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(n)
                }
            })
            .build();

        let outer: SequenceExecutor<i32> = SequenceExecutor::builder("outer")
            .add_sequence(
                "maybe-inner",
                Some(|n: &i32| *n > 100),
                |n: &i32| *n,
                inner,
                |outer, _inner_out| outer,
            )
            .build();

        let run = outer.execute(1, CancellationToken::new()).await;
        assert!(run.result.is_ok());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        let snapshot = run.status.snapshot();
        assert_eq!(snapshot.nodes[0].state, ExecutionState::Skipped);
    }

    #[tokio::test]
    async fn true_condition_runs_nested_sequence_and_maps_result_back() {
        let inner: SequenceExecutor<i32> = SequenceExecutor::builder("inner").add("triple", |n: i32| async move { Ok(n * 3) }).build();

        let outer: SequenceExecutor<i32> = SequenceExecutor::builder("outer")
            .add_sequence("always-inner", None::<fn(&i32) -> bool>, |n: &i32| *n, inner, |_outer, inner_out| inner_out)
            .build();

        let run = outer.execute(7, CancellationToken::new()).await;
        assert_eq!(run.result.unwrap(), 21);
    }

    #[tokio::test]
    async fn async_pipeline_step_threads_outer_value_through_nested_pipeline() {
        let pipeline: PipelineExecutor<i32> = PipelineExecutor::builder("inner-pipe")
            .producer("unused", |_cancel| futures::stream::pending::<i32>())
            .add_stage("increment", |n: i32| async move { Ok(n + 1) })
            .build();

        let outer: SequenceExecutor<i32> = SequenceExecutor::builder("outer")
            .add_async_pipeline("bump", None::<fn(&i32) -> bool>, |n: &i32| *n, pipeline, |_outer, inner_out| inner_out.unwrap_or(0))
            .build();

        let run = outer.execute(41, CancellationToken::new()).await;
        assert_eq!(run.result.unwrap(), 42);
    }
}
