use std::sync::Arc;

use common::{FlowId, SagaKey, SwitchId};
use criterion::{Criterion, criterion_group, criterion_main};
use model::{FlowEndpoint, InMemoryFlowRepository};
use saga::{
    FlowHub, FlowRequest, FlowRuleManager, FlowServices, InMemoryPathComputer,
    InMemoryResourceManager, RecordingCarrier, SagaError, SpeakerResponse,
    fsm::{MachineContext, MachineEvent, StateMachine, TransitionTable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Step {
    Start,
    Middle,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Signal {
    Next,
    Error,
}

impl MachineEvent for Signal {
    fn next() -> Self {
        Signal::Next
    }

    fn error() -> Self {
        Signal::Error
    }
}

#[derive(Default)]
struct Counter {
    steps: u64,
}

impl MachineContext for Counter {
    fn on_action_error(&mut self, _error: &SagaError) {}
}

fn chain_table() -> Arc<TransitionTable<Step, Signal, Counter, ()>> {
    let mut b = TransitionTable::builder(Step::Start);
    b.transition(Step::Start, Signal::Next, Step::Middle)
        .with(|c: &mut Counter, _| {
            c.steps += 1;
            Ok(Some(Signal::Next))
        });
    b.transition(Step::Middle, Signal::Next, Step::Done)
        .with(|c: &mut Counter, _| {
            c.steps += 1;
            Ok(None)
        });
    b.transition(Step::Start, Signal::Error, Step::Done);
    b.transition(Step::Middle, Signal::Error, Step::Done);
    b.final_state(Step::Done);
    b.build()
}

fn bench_fire_chain(c: &mut Criterion) {
    let table = chain_table();

    c.bench_function("engine/fire_two_step_chain", |b| {
        b.iter(|| {
            let mut machine = StateMachine::new(Arc::clone(&table), Counter::default());
            machine.fire(Signal::Next, &()).unwrap();
        });
    });
}

fn endpoint(dpid: u64, port: u32) -> FlowEndpoint {
    FlowEndpoint::new(SwitchId::new(dpid), port, 100)
}

fn hub() -> (FlowHub, Arc<RecordingCarrier>) {
    let paths = InMemoryPathComputer::new();
    paths.add_link(SwitchId::new(1), 10, SwitchId::new(2), 10, 10_000);
    paths.add_link(SwitchId::new(2), 11, SwitchId::new(3), 10, 10_000);
    let carrier = Arc::new(RecordingCarrier::new());
    let services = FlowServices::new(
        Arc::new(InMemoryFlowRepository::new()),
        Arc::new(InMemoryResourceManager::new()),
        Arc::new(paths),
        Arc::new(FlowRuleManager::new()),
        carrier.clone(),
    );
    (FlowHub::new(services), carrier)
}

/// Answers every command the carrier saw until the sagas stop sending.
fn answer_all(hub: &mut FlowHub, carrier: &RecordingCarrier) {
    loop {
        let requests = carrier.take_requests();
        if requests.is_empty() {
            break;
        }
        for (key, request) in requests {
            let response = SpeakerResponse::success(key.command_id, request.switch_id);
            let _ = hub.handle_async_response(&key, response);
        }
    }
}

fn bench_create_saga(c: &mut Criterion) {
    c.bench_function("hub/create_three_switch_flow", |b| {
        b.iter(|| {
            let (mut hub, carrier) = hub();
            let request = FlowRequest::unicast(FlowId::new("F1"), endpoint(1, 1), endpoint(3, 1), 10);
            hub.start_create(SagaKey::generate(), request).unwrap();
            answer_all(&mut hub, &carrier);
            assert_eq!(hub.in_flight(), 0);
        });
    });
}

criterion_group!(benches, bench_fire_chain, bench_create_saga);
criterion_main!(benches);
