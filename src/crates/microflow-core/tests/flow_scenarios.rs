//! End-to-end flow scenarios: build, validate, run, observe.

use async_trait::async_trait;
use microflow_core::{
    Activity, ActivityContext, ActivityError, CancellationToken, DiagnosticCode, Expression,
    FaultHandlerActivity, FaultInfo, FlowBuilder, NullFlowLogger, RunError, ServiceContainer,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── test activities ────────────────────────────────────────────────────

/// Produces the integer bound to its `Value` input.
#[derive(Default)]
struct ReadNumber {
    value: i64,
}

#[async_trait]
impl Activity for ReadNumber {
    type Output = i64;

    fn required_inputs() -> &'static [&'static str] {
        &["Value"]
    }

    fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
        match property {
            "Value" => {
                self.value = serde_json::from_value(value)?;
                Ok(())
            }
            other => Err(ActivityError::new(format!("unknown input '{other}'"))),
        }
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, ActivityError> {
        Ok(self.value)
    }
}

/// Adds its two inputs and records the sum.
struct Add {
    first: i64,
    second: i64,
    sums: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl Activity for Add {
    type Output = i64;

    fn required_inputs() -> &'static [&'static str] {
        &["FirstNumber", "SecondNumber"]
    }

    fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
        match property {
            "FirstNumber" => self.first = serde_json::from_value(value)?,
            "SecondNumber" => self.second = serde_json::from_value(value)?,
            other => return Err(ActivityError::new(format!("unknown input '{other}'"))),
        }
        Ok(())
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, ActivityError> {
        let sum = self.first + self.second;
        self.sums.lock().unwrap().push(sum);
        Ok(sum)
    }
}

/// Records the text bound to its `Text` input; used to observe which nodes
/// actually ran, and in which order.
struct Mark {
    text: String,
    texts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Activity for Mark {
    type Output = String;

    fn required_inputs() -> &'static [&'static str] {
        &["Text"]
    }

    fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
        match property {
            "Text" => {
                self.text = serde_json::from_value(value)?;
                Ok(())
            }
            other => Err(ActivityError::new(format!("unknown input '{other}'"))),
        }
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<String, ActivityError> {
        self.texts.lock().unwrap().push(self.text.clone());
        Ok(self.text.clone())
    }
}

/// Always faults with message `boom` and payload `"E"`.
struct Explode;

#[async_trait]
impl Activity for Explode {
    type Output = ();

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<(), ActivityError> {
        Err(ActivityError::new("boom").with_value("E"))
    }
}

/// Fault handler capturing the fault assigned to its `Exception` property.
struct CaptureFault {
    fault: Option<FaultInfo>,
    seen: Arc<Mutex<Vec<FaultInfo>>>,
}

#[async_trait]
impl Activity for CaptureFault {
    type Output = ();

    fn required_inputs() -> &'static [&'static str] {
        // Assigned by the engine at dispatch time, never by a user binding.
        &["Exception"]
    }

    fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
        match property {
            "Exception" => {
                self.fault = Some(serde_json::from_value(value)?);
                Ok(())
            }
            other => Err(ActivityError::new(format!("unknown input '{other}'"))),
        }
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<(), ActivityError> {
        if let Some(fault) = self.fault.take() {
            self.seen.lock().unwrap().push(fault);
        }
        Ok(())
    }
}

impl FaultHandlerActivity for CaptureFault {
    fn fault_input() -> &'static str {
        "Exception"
    }
}

/// Produces its `Value` input and counts completions across instances.
struct YieldNumber {
    value: i64,
    completions: Arc<AtomicUsize>,
}

#[async_trait]
impl Activity for YieldNumber {
    type Output = i64;

    fn required_inputs() -> &'static [&'static str] {
        &["Value"]
    }

    fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
        match property {
            "Value" => {
                self.value = serde_json::from_value(value)?;
                Ok(())
            }
            other => Err(ActivityError::new(format!("unknown input '{other}'"))),
        }
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, ActivityError> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(self.value)
    }
}

/// Reads three inputs and records them with the completion count observed
/// at invocation time.
struct Consume {
    a: i64,
    b: i64,
    c: i64,
    completions: Arc<AtomicUsize>,
    observed: Arc<Mutex<Vec<(i64, i64, i64, usize)>>>,
}

#[async_trait]
impl Activity for Consume {
    type Output = ();

    fn required_inputs() -> &'static [&'static str] {
        &["A", "B", "C"]
    }

    fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
        match property {
            "A" => self.a = serde_json::from_value(value)?,
            "B" => self.b = serde_json::from_value(value)?,
            "C" => self.c = serde_json::from_value(value)?,
            other => return Err(ActivityError::new(format!("unknown input '{other}'"))),
        }
        Ok(())
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<(), ActivityError> {
        self.observed.lock().unwrap().push((
            self.a,
            self.b,
            self.c,
            self.completions.load(Ordering::SeqCst),
        ));
        Ok(())
    }
}

/// Waits until cancelled; completes only if left alone for five seconds.
struct WaitForCancel {
    started: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

#[async_trait]
impl Activity for WaitForCancel {
    type Output = ();

    async fn execute(&mut self, ctx: &ActivityContext) -> Result<(), ActivityError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = ctx.cancellation_token().cancelled() => {
                Err(ActivityError::new("interrupted"))
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

// ── shared fixtures ────────────────────────────────────────────────────

struct Recorder {
    sums: Arc<Mutex<Vec<i64>>>,
    texts: Arc<Mutex<Vec<String>>>,
    faults: Arc<Mutex<Vec<FaultInfo>>>,
    completions: Arc<AtomicUsize>,
    observed: Arc<Mutex<Vec<(i64, i64, i64, usize)>>>,
    started: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            sums: Arc::new(Mutex::new(Vec::new())),
            texts: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Mutex::new(Vec::new())),
            completions: Arc::new(AtomicUsize::new(0)),
            observed: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Container with every test activity registered against this recorder.
    fn services(&self) -> Arc<ServiceContainer> {
        let mut services = ServiceContainer::new();
        services.add_transient(|_| Ok(ReadNumber::default()));
        let sums = self.sums.clone();
        services.add_transient(move |_| {
            Ok(Add {
                first: 0,
                second: 0,
                sums: sums.clone(),
            })
        });
        let texts = self.texts.clone();
        services.add_transient(move |_| {
            Ok(Mark {
                text: String::new(),
                texts: texts.clone(),
            })
        });
        services.add_transient(|_| Ok(Explode));
        let faults = self.faults.clone();
        services.add_transient(move |_| {
            Ok(CaptureFault {
                fault: None,
                seen: faults.clone(),
            })
        });
        let completions = self.completions.clone();
        services.add_transient(move |_| {
            Ok(YieldNumber {
                value: 0,
                completions: completions.clone(),
            })
        });
        let (completions, observed) = (self.completions.clone(), self.observed.clone());
        services.add_transient(move |_| {
            Ok(Consume {
                a: 0,
                b: 0,
                c: 0,
                completions: completions.clone(),
                observed: observed.clone(),
            })
        });
        let (started, completed) = (self.started.clone(), self.completed.clone());
        services.add_transient(move |_| {
            Ok(WaitForCancel {
                started: started.clone(),
                completed: completed.clone(),
            })
        });
        Arc::new(services)
    }
}

fn texts(recorder: &Recorder) -> Vec<String> {
    recorder.texts.lock().unwrap().clone()
}

// ── scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn sum_two_inputs() {
    let mut b = FlowBuilder::new("sum-two-inputs");
    let first = b.activity::<ReadNumber>("first");
    let second = b.activity::<ReadNumber>("second");
    let add = b.activity::<Add>("add");
    let handler = b.fault_handler::<CaptureFault>("on-fault");

    b.bind(&first, "Value").to_constant(7);
    b.bind(&second, "Value").to_constant(5);
    b.bind(&add, "FirstNumber").to_result_of(&first);
    b.bind(&add, "SecondNumber").to_result_of(&second);

    b.connect(&first, &second);
    b.connect(&second, &add);
    b.with_initial_node(&first);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services()).await.expect("flow completes");

    assert_eq!(*recorder.sums.lock().unwrap(), vec![12]);
    assert!(recorder.faults.lock().unwrap().is_empty(), "no fault expected");
}

#[tokio::test]
async fn condition_routes_to_false_branch() {
    let mut b = FlowBuilder::new("condition-branches");
    let first = b.activity::<ReadNumber>("first");
    let second = b.activity::<ReadNumber>("second");
    b.bind(&first, "Value").to_constant(3);
    b.bind(&second, "Value").to_constant(9);

    let first_result = first.result();
    let second_result = second.result();
    let branch = b.condition(
        "first-greater",
        Expression::new(move |scope| {
            Ok(Value::Bool(
                scope.result(&first_result)? > scope.result(&second_result)?,
            ))
        })
        .reading_result(&first_result)
        .reading_result(&second_result),
    );

    let greater = b.activity::<Mark>("out-a");
    let less_or_equal = b.activity::<Mark>("out-b");
    b.bind(&greater, "Text").to_constant("gt");
    b.bind(&less_or_equal, "Text").to_constant("le");

    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.connect(&first, &second);
    b.connect(&second, &branch);
    b.connect_true(&branch, &greater);
    b.connect_false(&branch, &less_or_equal);
    b.with_initial_node(&first);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services()).await.expect("flow completes");

    assert_eq!(texts(&recorder), vec!["le"], "3 > 9 is false");
}

#[tokio::test]
async fn fault_is_handled_by_default_handler() {
    let mut b = FlowBuilder::new("activity-fault");
    let explode = b.activity::<Explode>("explode");
    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.with_initial_node(&explode);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services())
        .await
        .expect("handled fault completes the run cleanly");

    let faults = recorder.faults.lock().unwrap();
    assert_eq!(faults.len(), 1, "handler invoked exactly once");
    assert_eq!(faults[0].message, "boom");
    assert_eq!(faults[0].value, Some(json!("E")));
    assert_eq!(faults[0].node_name, "explode");
}

#[tokio::test]
async fn fork_join_runs_children_before_consumer() {
    let mut b = FlowBuilder::new("fork-join");
    let fan_out = b.fork_join("fan-out");
    let one = b.fork::<YieldNumber>(&fan_out, "one");
    let two = b.fork::<YieldNumber>(&fan_out, "two");
    let three = b.fork::<YieldNumber>(&fan_out, "three");
    b.bind(&one, "Value").to_constant(1);
    b.bind(&two, "Value").to_constant(2);
    b.bind(&three, "Value").to_constant(3);

    let v1 = b.variable::<i64>("v1");
    let v2 = b.variable::<i64>("v2");
    let v3 = b.variable::<i64>("v3");
    b.bind_variable_to_result_of(&v1, &one);
    b.after_completion_of(&two).assign_result(&v2);
    b.after_completion_of(&three).assign_result(&v3);

    let consumer = b.activity::<Consume>("consumer");
    b.bind(&consumer, "A").to_expression(
        Expression::new(move |scope| Ok(json!(scope.variable(&v1)?))).reading_variable(&v1),
    );
    b.bind(&consumer, "B").to_expression(
        Expression::new(move |scope| Ok(json!(scope.variable(&v2)?))).reading_variable(&v2),
    );
    b.bind(&consumer, "C").to_expression(
        Expression::new(move |scope| Ok(json!(scope.variable(&v3)?))).reading_variable(&v3),
    );

    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.connect(&fan_out, &consumer);
    b.with_initial_node(&fan_out);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services()).await.expect("flow completes");

    let observed = recorder.observed.lock().unwrap();
    assert_eq!(
        *observed,
        vec![(1, 2, 3, 3)],
        "consumer sees each branch's variable and all three completions"
    );
}

#[tokio::test]
async fn fork_child_fault_cancels_siblings() {
    let mut b = FlowBuilder::new("fork-child-fault");
    let fan_out = b.fork_join("fan-out");
    let _bad = b.fork::<Explode>(&fan_out, "bad");
    let _slow_one = b.fork::<WaitForCancel>(&fan_out, "slow-one");
    let _slow_two = b.fork::<WaitForCancel>(&fan_out, "slow-two");

    let handler = b.fault_handler::<CaptureFault>("join-fault");
    b.connect_fault(&fan_out, &handler);
    b.with_initial_node(&fan_out);
    b.with_default_cancellation_handler(&handler);
    b.with_default_fault_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services())
        .await
        .expect("fork fault handled by the fork-join's handler");

    let faults = recorder.faults.lock().unwrap();
    assert_eq!(faults.len(), 1, "one aggregate fault");
    assert_eq!(faults[0].message, "boom");
    assert_eq!(faults[0].node_name, "bad");
    assert_eq!(
        recorder.completed.load(Ordering::SeqCst),
        0,
        "siblings were cancelled, not run to completion"
    );
}

#[tokio::test]
async fn missing_required_input_refuses_to_run() {
    let mut b = FlowBuilder::new("missing-input");
    let add = b.activity::<Add>("add");
    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.with_initial_node(&add);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let report = flow.validate();
    assert!(report.has_error(DiagnosticCode::MissingRequiredInput));
    assert!(
        report.errors.iter().any(|d| d.message.contains("FirstNumber")),
        "diagnostic names the property: {:?}",
        report.errors
    );
    assert!(report.errors.iter().any(|d| d.message.contains("SecondNumber")));

    let recorder = Recorder::new();
    let result = flow.run(recorder.services()).await;
    assert!(
        matches!(result, Err(RunError::ValidationFailed(_))),
        "run refuses an invalid flow"
    );
    assert!(
        recorder.sums.lock().unwrap().is_empty(),
        "no activity was invoked"
    );
}

// ── boundary behaviors ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_switch_takes_default() {
    let mut b = FlowBuilder::new("empty-switch");
    let route = b.switch::<String>("route", Expression::new(|_| Ok(json!("anything"))));
    let fallback = b.activity::<Mark>("fallback");
    b.bind(&fallback, "Text").to_constant("default");
    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.connect_default(&route, &fallback);
    b.with_initial_node(&route);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services()).await.expect("flow completes");
    assert_eq!(texts(&recorder), vec!["default"]);
}

#[tokio::test]
async fn switch_dispatches_by_key_equality() {
    let mut b = FlowBuilder::new("switch-dispatch");
    let route = b.switch::<String>("route", Expression::new(|_| Ok(json!("b"))));
    let case_a = b.activity::<Mark>("case-a");
    let case_b = b.activity::<Mark>("case-b");
    let fallback = b.activity::<Mark>("fallback");
    b.bind(&case_a, "Text").to_constant("a");
    b.bind(&case_b, "Text").to_constant("b");
    b.bind(&fallback, "Text").to_constant("default");
    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.connect_case(&route, "a".to_string(), &case_a);
    b.connect_case(&route, "b".to_string(), &case_b);
    b.connect_default(&route, &fallback);
    b.with_initial_node(&route);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services()).await.expect("flow completes");
    assert_eq!(texts(&recorder), vec!["b"]);
}

#[tokio::test]
async fn unmapped_key_faults_to_default_handler() {
    let mut b = FlowBuilder::new("partial-switch");
    let route = b.switch::<String>("route", Expression::new(|_| Ok(json!("zebra"))));
    let case_a = b.activity::<Mark>("case-a");
    b.bind(&case_a, "Text").to_constant("a");
    b.connect_case(&route, "a".to_string(), &case_a);
    b.allow_partial_coverage(&route);

    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.with_initial_node(&route);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();
    assert!(flow.validate().is_ok(), "partial switch accepted when marked");

    let recorder = Recorder::new();
    flow.run(recorder.services())
        .await
        .expect("unhandled case was handled by the default handler");

    let faults = recorder.faults.lock().unwrap();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].message.contains("no case"), "{}", faults[0].message);
    assert!(texts(&recorder).is_empty(), "no case activity ran");
}

#[tokio::test]
async fn single_node_block_runs_and_exits() {
    let mut b = FlowBuilder::new("single-node-block");
    let wrap = b.block("wrap", |b| {
        let inner = b.activity::<Mark>("inner");
        b.bind(&inner, "Text").to_constant("inner");
        inner
    });
    let after = b.activity::<Mark>("after");
    b.bind(&after, "Text").to_constant("after");
    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.connect(&wrap, &after);
    b.with_initial_node(&wrap);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services()).await.expect("flow completes");
    assert_eq!(texts(&recorder), vec!["inner", "after"]);
}

#[tokio::test]
async fn zero_child_fork_join_is_rejected() {
    let mut b = FlowBuilder::new("empty-fork");
    let fan_out = b.fork_join("fan-out");
    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.with_initial_node(&fan_out);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let report = flow.validate();
    assert!(report.has_error(DiagnosticCode::ForkJoinEmpty));
}

#[tokio::test]
async fn loop_runs_until_condition_flips() {
    let mut b = FlowBuilder::new("loop");
    let counter = b.variable_with_initial::<i64>("counter", 0);
    let step = b.activity::<Mark>("step");
    b.bind(&step, "Text").to_constant("tick");
    b.after_completion_of(&step)
        .update(&counter, |current| current.unwrap_or(0) + 1);

    let again = b.condition(
        "again",
        Expression::new(move |scope| Ok(Value::Bool(scope.variable(&counter)? < 3)))
            .reading_variable(&counter),
    );
    let done = b.activity::<Mark>("done");
    b.bind(&done, "Text").to_constant("done");

    let handler = b.fault_handler::<CaptureFault>("on-fault");
    b.connect(&step, &again);
    b.connect_true(&again, &step);
    b.connect_false(&again, &done);
    b.with_initial_node(&step);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    flow.run(recorder.services()).await.expect("flow completes");
    assert_eq!(texts(&recorder), vec!["tick", "tick", "tick", "done"]);
}

#[tokio::test]
async fn cancellation_routes_to_cancellation_handler() {
    let mut b = FlowBuilder::new("cancelled-before-start");
    let wait = b.activity::<WaitForCancel>("wait");
    let handler = b.fault_handler::<CaptureFault>("cleanup");
    b.with_initial_node(&wait);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    let token = CancellationToken::new();
    token.cancel();
    let result = flow
        .run_with(recorder.services(), Arc::new(NullFlowLogger), token)
        .await;

    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(
        recorder.started.load(Ordering::SeqCst),
        0,
        "no activity downstream of the cancellation point starts"
    );
}

#[tokio::test]
async fn mid_run_cancellation_stops_the_activity() {
    let mut b = FlowBuilder::new("cancelled-mid-run");
    let wait = b.activity::<WaitForCancel>("wait");
    let after = b.activity::<Mark>("after");
    b.bind(&after, "Text").to_constant("after");
    let handler = b.fault_handler::<CaptureFault>("cleanup");
    b.connect(&wait, &after);
    b.with_initial_node(&wait);
    b.with_default_fault_handler(&handler);
    b.with_default_cancellation_handler(&handler);
    let flow = b.build();

    let recorder = Recorder::new();
    let services = recorder.services();
    let token = CancellationToken::new();
    let run_token = token.clone();
    let run = {
        let flow = flow.clone();
        tokio::spawn(async move {
            flow.run_with(services, Arc::new(NullFlowLogger), run_token)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    let result = run.await.expect("run task joins");

    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(recorder.started.load(Ordering::SeqCst), 1, "activity started");
    assert_eq!(
        recorder.completed.load(Ordering::SeqCst),
        0,
        "activity was interrupted"
    );
    assert!(
        texts(&recorder).is_empty(),
        "nothing downstream of the cancellation ran"
    );
}

#[tokio::test]
async fn validation_is_idempotent() {
    let mut b = FlowBuilder::new("idempotent");
    let step = b.activity::<Mark>("step");
    b.with_initial_node(&step);
    // Deliberately missing: the Text binding and both default handlers.
    let flow = b.build();

    let first = flow.validate();
    let second = flow.validate();
    assert!(!first.is_ok());
    assert_eq!(first, second, "same flow, same diagnostics");
}
