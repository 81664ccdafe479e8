use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::state::StateStore;
use weft_core::traits::UnitBackend;
use weft_core::types::{
    LoopOutcome, PipelineEvent, RunId, TerminationSignal, UnitReply, UnitRequest, TERMINATION_TOOL,
};
use weft_tools::ToolRegistry;

use crate::composite::{Loop, Parallel, Pipeline, Step};
use crate::report::{RunReport, UnitRecord};
use crate::template;
use crate::unit::Unit;

/// Control-flow outcome of one step.
///
/// A termination signal travels upward through sequential and parallel
/// steps until the nearest enclosing loop consumes it at the end of the
/// iteration; it never aborts anything on the way.
enum Flow {
    Continue,
    Signalled(TerminationSignal),
}

/// Walks a composite tree and dispatches each step to its strategy.
///
/// The engine owns the state store for the duration of a run: units receive
/// resolved instructions and hand back replies, and every state write goes
/// through the engine after the unit returns.
pub struct ExecutionEngine {
    backend: Arc<dyn UnitBackend>,
    tools: Arc<ToolRegistry>,
    config: EngineConfig,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl ExecutionEngine {
    pub fn new(backend: Arc<dyn UnitBackend>, tools: Arc<ToolRegistry>) -> Self {
        Self::with_config(backend, tools, EngineConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn UnitBackend>,
        tools: Arc<ToolRegistry>,
        config: EngineConfig,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_capacity));
        Self {
            backend,
            tools,
            config,
            event_bus,
            cancel: CancellationToken::new(),
        }
    }

    /// The bus pipeline events are published on.
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Get a cancellation token for this engine. Cancelling aborts the
    /// current run between steps or mid-invocation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a pipeline against an initial state, returning the final state
    /// and per-unit records.
    pub async fn run(&self, pipeline: &Pipeline, initial: StateStore) -> Result<RunReport> {
        let run_id = RunId::new();
        let start = Instant::now();

        self.verify_tools(pipeline)?;
        for key in pipeline.input_keys() {
            if !initial.contains_key(key) {
                warn!(
                    pipeline = %pipeline.name(),
                    key = %key,
                    "declared input key missing from initial state"
                );
            }
        }

        info!(run_id = %run_id, pipeline = %pipeline.name(), "Pipeline run started");
        self.event_bus.publish(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            pipeline: pipeline.name().to_string(),
        });

        let mut state = initial;
        let mut records = Vec::new();
        let result = self
            .execute_step(pipeline.root(), &mut state, &mut records)
            .await;

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(Flow::Continue) => {
                info!(run_id = %run_id, elapsed_ms = total_elapsed_ms, "Pipeline run completed");
                self.event_bus.publish(PipelineEvent::RunCompleted {
                    run_id: run_id.clone(),
                    elapsed_ms: total_elapsed_ms,
                });
                Ok(RunReport {
                    run_id,
                    records,
                    state,
                    total_elapsed_ms,
                })
            }
            Ok(Flow::Signalled(signal)) => {
                // Unreachable for validated pipelines; a hand-assembled tree
                // must still never have its signal dropped silently.
                let err = WeftError::Definition(format!(
                    "termination signal ({}) escaped the pipeline root with no loop to catch it",
                    signal.status
                ));
                self.event_bus.publish(PipelineEvent::RunFailed {
                    run_id,
                    error: err.to_string(),
                });
                Err(err)
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Pipeline run failed");
                self.event_bus.publish(PipelineEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Every tool a unit declares must be registered before a run starts.
    fn verify_tools(&self, pipeline: &Pipeline) -> Result<()> {
        let mut missing: Option<(String, String)> = None;
        pipeline.root().visit_units(&mut |u| {
            for tool in &u.tools {
                if missing.is_none() && !self.tools.contains(tool) {
                    missing = Some((u.name.clone(), tool.clone()));
                }
            }
        });
        match missing {
            Some((unit, tool)) => Err(WeftError::Definition(format!(
                "unit '{}' declares tool '{}', which is not registered",
                unit, tool
            ))),
            None => Ok(()),
        }
    }

    fn execute_step<'a>(
        &'a self,
        step: &'a Step,
        state: &'a mut StateStore,
        records: &'a mut Vec<UnitRecord>,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            match step {
                Step::Unit(unit) => self.execute_unit(unit, state, records).await,
                Step::Sequential(seq) => self.execute_children(&seq.children, state, records).await,
                Step::Parallel(par) => self.execute_parallel(par, state, records).await,
                Step::Loop(l) => self.execute_loop(l, state, records).await,
            }
        })
    }

    /// Sequential semantics: strict left-to-right, every child sees all
    /// predecessor writes. Shared by `Sequential` and each loop iteration.
    async fn execute_children(
        &self,
        children: &[Step],
        state: &mut StateStore,
        records: &mut Vec<UnitRecord>,
    ) -> Result<Flow> {
        let mut flow = Flow::Continue;
        for child in children {
            if self.cancel.is_cancelled() {
                return Err(WeftError::Cancelled);
            }
            if let Flow::Signalled(signal) = self.execute_step(child, state, records).await? {
                // The remaining children still run; the nearest loop checks
                // for the signal once the iteration is over.
                if matches!(flow, Flow::Continue) {
                    flow = Flow::Signalled(signal);
                }
            }
        }
        Ok(flow)
    }

    /// Parallel semantics: every branch runs against its own clone of one
    /// snapshot, all branches run to completion, and only declared output
    /// keys are merged back. A failed branch never cancels its siblings.
    async fn execute_parallel(
        &self,
        par: &Parallel,
        state: &mut StateStore,
        records: &mut Vec<UnitRecord>,
    ) -> Result<Flow> {
        if self.cancel.is_cancelled() {
            return Err(WeftError::Cancelled);
        }

        debug!(parallel = %par.name, branches = par.children.len(), "Dispatching parallel branches");
        let snapshot = state.snapshot();

        let futs: Vec<_> = par
            .children
            .iter()
            .map(|child| {
                let mut branch_state = snapshot.clone();
                async move {
                    let mut branch_records = Vec::new();
                    let flow = self
                        .execute_step(child, &mut branch_state, &mut branch_records)
                        .await;
                    (child, branch_state, branch_records, flow)
                }
            })
            .collect();

        let results = futures::future::join_all(futs).await;

        let mut failures: Vec<(String, String)> = Vec::new();
        let mut branches = Vec::with_capacity(results.len());
        for (child, branch_state, branch_records, flow) in results {
            // Branch records are kept in child order, success or not.
            records.extend(branch_records);
            match flow {
                Ok(flow) => branches.push((child, branch_state, flow)),
                Err(e) => failures.push((child.name().to_string(), e.to_string())),
            }
        }

        if !failures.is_empty() {
            return Err(WeftError::ParallelBranches { failures });
        }

        // Merge each branch's declared output keys into the live store.
        // Disjointness across siblings was proven at definition time.
        let mut flow = Flow::Continue;
        let mut merged_keys = Vec::new();
        for (child, branch_state, branch_flow) in branches {
            for key in child.output_keys() {
                if let Some(value) = branch_state.get(&key) {
                    state.set(key.as_str(), value.clone());
                    merged_keys.push(key);
                }
            }
            if let Flow::Signalled(signal) = branch_flow {
                if matches!(flow, Flow::Continue) {
                    flow = Flow::Signalled(signal);
                }
            }
        }

        debug!(parallel = %par.name, keys = ?merged_keys, "Merged parallel outputs");
        self.event_bus.publish(PipelineEvent::ParallelMerged {
            name: par.name.clone(),
            keys: merged_keys,
        });
        Ok(flow)
    }

    /// Loop semantics: children run with sequential semantics each
    /// iteration; the signal check happens at the iteration boundary. The
    /// iteration budget is a designed exit, not a failure.
    async fn execute_loop(
        &self,
        l: &Loop,
        state: &mut StateStore,
        records: &mut Vec<UnitRecord>,
    ) -> Result<Flow> {
        for iteration in 1..=l.max_iterations {
            if self.cancel.is_cancelled() {
                return Err(WeftError::Cancelled);
            }
            debug!(loop_name = %l.name, iteration, "Loop iteration started");
            self.event_bus.publish(PipelineEvent::LoopIteration {
                name: l.name.clone(),
                iteration,
            });

            if let Flow::Signalled(signal) =
                self.execute_children(&l.children, state, records).await?
            {
                info!(
                    loop_name = %l.name,
                    iteration,
                    status = %signal.status,
                    "Loop terminated by signal"
                );
                self.event_bus.publish(PipelineEvent::LoopFinished {
                    name: l.name.clone(),
                    outcome: LoopOutcome::Signalled,
                    iterations: iteration,
                });
                // Consumed here: the signal never crosses the loop boundary.
                return Ok(Flow::Continue);
            }
        }

        info!(loop_name = %l.name, iterations = l.max_iterations, "Loop exhausted iteration budget");
        self.event_bus.publish(PipelineEvent::LoopFinished {
            name: l.name.clone(),
            outcome: LoopOutcome::MaxIterations,
            iterations: l.max_iterations,
        });
        Ok(Flow::Continue)
    }

    async fn execute_unit(
        &self,
        unit: &Unit,
        state: &mut StateStore,
        records: &mut Vec<UnitRecord>,
    ) -> Result<Flow> {
        let start = Instant::now();
        self.event_bus.publish(PipelineEvent::UnitStarted {
            unit: unit.name.clone(),
        });

        // One snapshot per invocation: a key referenced twice in the
        // template always resolves to the same value.
        let resolved = template::resolve(&unit.instruction, &state.snapshot());
        for key in &resolved.missing {
            warn!(unit = %unit.name, key = %key, "template key absent, substituted empty string");
        }

        let tools = self.tools.definitions_for(&unit.tools)?;
        let request = UnitRequest {
            unit: unit.name.clone(),
            instruction: resolved.text,
            tools,
        };

        info!(unit = %unit.name, output_key = %unit.output_key, "Invoking unit");
        let reply = self.invoke_backend(unit, request).await?;

        let mut flow = Flow::Continue;
        if let Some(call) = reply.tool_call {
            if !unit.declares_tool(&call.name) {
                return Err(WeftError::ToolNotDeclared {
                    unit: unit.name.clone(),
                    tool: call.name,
                });
            }
            self.event_bus.publish(PipelineEvent::ToolInvoked {
                unit: unit.name.clone(),
                tool: call.name.clone(),
            });
            let result = self.tools.execute(&call.name, call.input).await?;
            if call.name == TERMINATION_TOOL {
                let signal = parse_signal(&result.content);
                debug!(unit = %unit.name, status = %signal.status, "Unit raised termination signal");
                flow = Flow::Signalled(signal);
            } else {
                debug!(
                    unit = %unit.name,
                    tool = %call.name,
                    is_error = result.is_error,
                    "Tool executed"
                );
            }
        }

        let wrote_value = reply.value.is_some();
        match reply.value {
            // All writes are mediated here; units never hold the store.
            Some(value) => state.set(unit.output_key.as_str(), value),
            None => debug!(unit = %unit.name, "Unit produced no value"),
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        records.push(UnitRecord {
            unit: unit.name.clone(),
            output_key: unit.output_key.clone(),
            wrote_value,
            elapsed_ms,
            completed_at: Utc::now(),
        });
        self.event_bus.publish(PipelineEvent::UnitCompleted {
            unit: unit.name.clone(),
            output_key: unit.output_key.clone(),
            elapsed_ms,
        });

        Ok(flow)
    }

    /// Backend invocation with the configured timeout, raced against
    /// cancellation. Only this call may suspend for long.
    async fn invoke_backend(&self, unit: &Unit, request: UnitRequest) -> Result<UnitReply> {
        let invocation = self.backend.invoke(request);
        let guarded = async {
            match self.config.unit_timeout_secs {
                Some(secs) => {
                    match tokio::time::timeout(Duration::from_secs(secs), invocation).await {
                        Ok(reply) => reply,
                        Err(_) => Err(WeftError::UnitTimeout {
                            unit: unit.name.clone(),
                            timeout_secs: secs,
                        }),
                    }
                }
                None => invocation.await,
            }
        };

        tokio::select! {
            reply = guarded => reply,
            _ = self.cancel.cancelled() => Err(WeftError::Cancelled),
        }
    }
}

fn parse_signal(content: &str) -> TerminationSignal {
    serde_json::from_str(content).unwrap_or_else(|_| TerminationSignal::approved(content))
}
