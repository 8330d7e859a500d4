//! CF-012: Executor — input validation, unit invocation, and the plan run-loop.
//!
//! Per step: slice context → validate → execute → merge outputs → journal.
//! The first failing step aborts the rest of the plan (jidoka); there is no
//! retry and no rollback of earlier steps.

use super::context::Context;
use super::error::{ExecError, RunError, ValidationError};
use super::planner;
use super::registry::Registry;
use super::types::{
    Inputs, OrderedPlan, Outputs, RunEvent, StepState, UnitDescriptor, Value,
};
use super::unit::{Unit, UnitRef};
use crate::journal::eventlog;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Check `inputs` against a descriptor's input schema.
///
/// Order: every required property is present, then types, then verifiers.
/// Keys not declared by the schema are ignored.
pub fn validate_inputs(descriptor: &UnitDescriptor, inputs: &Inputs) -> Result<(), ValidationError> {
    if let Some(absent) = descriptor
        .required_inputs()
        .find(|p| !inputs.contains_key(&p.name))
    {
        return Err(ValidationError::missing(&absent.name));
    }

    for property in descriptor.inputs.values() {
        if let Some(value) = inputs.get(&property.name) {
            if !value.matches(&property.type_tag) {
                return Err(ValidationError::TypeMismatch {
                    property: property.name.clone(),
                    expected: property.type_tag.clone(),
                    actual: value.type_name(),
                });
            }
        }
    }

    for property in descriptor.inputs.values() {
        let Some(value) = inputs.get(&property.name) else {
            continue;
        };
        for verifier in &property.verifiers {
            let verdict = panic::catch_unwind(AssertUnwindSafe(|| {
                verifier.verify(&property.name, value, inputs)
            }))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));
            match verdict {
                Ok(true) => {}
                Ok(false) => {
                    return Err(ValidationError::verification(
                        &property.name,
                        verifier.name(),
                        None,
                    ))
                }
                Err(reason) => {
                    return Err(ValidationError::verification(
                        &property.name,
                        verifier.name(),
                        Some(reason),
                    ))
                }
            }
        }
    }

    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Move `state` to `next`, logging the transition.
fn transition(unit_id: &str, state: &mut StepState, next: StepState) {
    match state.advance(next) {
        Ok(s) => {
            trace!(unit = %unit_id, from = %state, to = %s, "step transition");
            *state = s;
        }
        Err(e) => warn!(unit = %unit_id, "{}", e),
    }
}

/// Outcome of one executed plan step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub unit_id: String,
    pub state: StepState,
    pub duration_seconds: f64,
    /// Keys this step bound into the context
    pub bound: Vec<String>,
    /// Keys this step produced that were already bound
    pub discarded: Vec<String>,
}

/// Result of a completed plan run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub target: String,
    pub plan_hash: String,
    pub steps: Vec<StepRecord>,
    pub context: Context,
    pub total_seconds: f64,
}

impl RunReport {
    /// Final context value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn succeeded(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Succeeded)
            .count()
    }
}

/// Runs units and plans against a registry.
#[derive(Debug, Clone, Copy)]
pub struct Executor<'a> {
    registry: &'a Registry,
    journal: Option<&'a Path>,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            journal: None,
        }
    }

    /// Append run events under `state_dir`.
    pub fn with_journal(mut self, state_dir: &'a Path) -> Self {
        self.journal = Some(state_dir);
        self
    }

    /// Validate `inputs` and invoke `unit`. Outputs are returned unchanged.
    pub fn run(&self, unit: &dyn Unit, inputs: &Inputs) -> Result<Outputs, ExecError> {
        let mut state = StepState::Pending;
        self.run_tracked(unit, inputs, &mut state)
    }

    fn run_tracked(
        &self,
        unit: &dyn Unit,
        inputs: &Inputs,
        state: &mut StepState,
    ) -> Result<Outputs, ExecError> {
        let descriptor = unit.descriptor();
        let unit_id = descriptor.id.as_str();

        transition(unit_id, state, StepState::Validating);
        let validated = validate_inputs(descriptor, inputs).and_then(|()| {
            unit.validate(inputs)
                .map_err(|reason| ValidationError::SelfCheckFailed {
                    unit_id: unit_id.to_string(),
                    reason,
                })
        });
        if let Err(source) = validated {
            transition(unit_id, state, StepState::Invalid);
            transition(unit_id, state, StepState::Failed);
            return Err(ExecError::Invalid {
                unit_id: unit_id.to_string(),
                source,
            });
        }
        transition(unit_id, state, StepState::Valid);

        transition(unit_id, state, StepState::Executing);
        let result = panic::catch_unwind(AssertUnwindSafe(|| unit.execute(inputs)))
            .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload.as_ref()))));
        match result {
            Ok(outputs) => {
                transition(unit_id, state, StepState::Succeeded);
                Ok(outputs)
            }
            Err(source) => {
                transition(unit_id, state, StepState::Failed);
                Err(ExecError::UnitExecution {
                    unit_id: unit_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Execute `plan` step by step, threading `context` through it.
    pub fn run_plan(&self, plan: &OrderedPlan, context: Context) -> Result<RunReport, RunError> {
        let units = self.resolve_steps(plan)?;
        let mut run = RunState::start(self, plan, context);

        for unit in &units {
            let inputs = run.context.slice(unit.descriptor());
            run.started(unit.descriptor());
            let started = Instant::now();
            let mut state = StepState::Pending;
            let result = self.run_tracked(unit.as_ref(), &inputs, &mut state);
            run.finish_step(unit.descriptor(), state, result, started.elapsed().as_secs_f64())?;
        }

        Ok(run.complete())
    }

    /// Execute `plan` level by level; units within a level run on scoped threads.
    ///
    /// Every unit in a level sees the context as it stood when the level began.
    /// Outputs are merged in level order once the whole level has finished, so
    /// binding order matches [`Executor::run_plan`].
    pub fn run_plan_parallel(
        &self,
        plan: &OrderedPlan,
        context: Context,
    ) -> Result<RunReport, RunError> {
        let units = self.resolve_steps(plan)?;
        let by_id = |id: &str| units.iter().find(|u| u.descriptor().id == id);
        let mut run = RunState::start(self, plan, context);

        for (depth, level) in plan.levels.iter().enumerate() {
            let level_units: Vec<&UnitRef> = level.iter().filter_map(|id| by_id(id.as_str())).collect();
            debug!(depth, width = level_units.len(), "running level");

            let jobs: Vec<(&UnitRef, Inputs)> = level_units
                .iter()
                .map(|u| (*u, run.context.slice(u.descriptor())))
                .collect();
            for (unit, _) in &jobs {
                run.started(unit.descriptor());
            }

            let results: Vec<(StepState, Result<Outputs, ExecError>, f64)> =
                std::thread::scope(|scope| {
                    let handles: Vec<_> = jobs
                        .iter()
                        .map(|(unit, inputs)| {
                            scope.spawn(move || {
                                let started = Instant::now();
                                let mut state = StepState::Pending;
                                let result = self.run_tracked(unit.as_ref(), inputs, &mut state);
                                (state, result, started.elapsed().as_secs_f64())
                            })
                        })
                        .collect();
                    handles
                        .into_iter()
                        .zip(&jobs)
                        .map(|(handle, (unit, _))| {
                            handle.join().unwrap_or_else(|payload| {
                                let source = anyhow::anyhow!(panic_message(payload.as_ref()));
                                (
                                    StepState::Failed,
                                    Err(ExecError::UnitExecution {
                                        unit_id: unit.descriptor().id.clone(),
                                        source,
                                    }),
                                    0.0,
                                )
                            })
                        })
                        .collect()
                });

            for ((unit, _), (state, result, duration)) in jobs.iter().zip(results) {
                run.finish_step(unit.descriptor(), state, result, duration)?;
            }
        }

        Ok(run.complete())
    }

    fn resolve_steps(&self, plan: &OrderedPlan) -> Result<Vec<UnitRef>, RunError> {
        plan.steps
            .iter()
            .map(|id| {
                self.registry
                    .get(id)
                    .cloned()
                    .ok_or_else(|| RunError::UnitNotFound(id.clone()))
            })
            .collect()
    }

    fn record(&self, event: RunEvent) {
        if let Some(dir) = self.journal {
            if let Err(e) = eventlog::append_event(dir, event) {
                warn!(error = %e, "failed to append run journal event");
            }
        }
    }
}

/// Bookkeeping shared by the sequential and level-parallel loops.
struct RunState<'e, 'a> {
    executor: &'e Executor<'a>,
    run_id: String,
    target: String,
    plan_hash: String,
    context: Context,
    steps: Vec<StepRecord>,
    started: Instant,
}

impl<'e, 'a> RunState<'e, 'a> {
    fn start(executor: &'e Executor<'a>, plan: &OrderedPlan, context: Context) -> Self {
        let run_id = eventlog::generate_run_id();
        let plan_hash = planner::plan_fingerprint(executor.registry, plan);
        info!(run_id = %run_id, unit = %plan.target, steps = plan.steps.len(), "run started");
        executor.record(RunEvent::RunStarted {
            run_id: run_id.clone(),
            target: plan.target.clone(),
            plan_hash: plan_hash.clone(),
            steps: plan.steps.len(),
        });
        Self {
            executor,
            run_id,
            target: plan.target.clone(),
            plan_hash,
            context,
            steps: Vec::new(),
            started: Instant::now(),
        }
    }

    fn started(&self, descriptor: &UnitDescriptor) {
        debug!(unit = %descriptor.id, version = %descriptor.version, "step started");
        self.executor.record(RunEvent::StepStarted {
            run_id: self.run_id.clone(),
            unit: descriptor.id.clone(),
            version: descriptor.version.clone(),
        });
    }

    fn finish_step(
        &mut self,
        descriptor: &UnitDescriptor,
        state: StepState,
        result: Result<Outputs, ExecError>,
        duration: f64,
    ) -> Result<(), RunError> {
        let outputs = match result {
            Ok(outputs) => outputs,
            Err(source) => {
                warn!(unit = %descriptor.id, error = %source, "step failed, aborting run");
                self.executor.record(RunEvent::StepFailed {
                    run_id: self.run_id.clone(),
                    unit: descriptor.id.clone(),
                    state,
                    error: source.to_string(),
                });
                self.fail_completed();
                return Err(RunError::Step {
                    unit_id: descriptor.id.clone(),
                    completed: self.steps.len(),
                    source,
                });
            }
        };

        let produced: Vec<String> = outputs.keys().cloned().collect();
        let merged = match self.context.merge(outputs, &descriptor.id) {
            Ok(merged) => merged,
            Err(e) => {
                self.executor.record(RunEvent::StepFailed {
                    run_id: self.run_id.clone(),
                    unit: descriptor.id.clone(),
                    state,
                    error: e.to_string(),
                });
                self.fail_completed();
                return Err(e);
            }
        };

        debug!(unit = %descriptor.id, bound = ?merged.bound, "step succeeded");
        self.executor.record(RunEvent::StepSucceeded {
            run_id: self.run_id.clone(),
            unit: descriptor.id.clone(),
            duration_seconds: duration,
            outputs: produced,
        });
        self.steps.push(StepRecord {
            unit_id: descriptor.id.clone(),
            state,
            duration_seconds: duration,
            bound: merged.bound,
            discarded: merged.discarded,
        });
        Ok(())
    }

    fn fail_completed(&self) {
        self.executor.record(RunEvent::RunCompleted {
            run_id: self.run_id.clone(),
            target: self.target.clone(),
            succeeded: self.steps.len() as u32,
            failed: 1,
            total_seconds: self.started.elapsed().as_secs_f64(),
        });
    }

    fn complete(self) -> RunReport {
        let total_seconds = self.started.elapsed().as_secs_f64();
        info!(run_id = %self.run_id, steps = self.steps.len(), "run completed");
        self.executor.record(RunEvent::RunCompleted {
            run_id: self.run_id.clone(),
            target: self.target.clone(),
            succeeded: self.steps.len() as u32,
            failed: 0,
            total_seconds,
        });
        RunReport {
            run_id: self.run_id,
            target: self.target,
            plan_hash: self.plan_hash,
            steps: self.steps,
            context: self.context,
            total_seconds,
        }
    }
}
