//! Concurrent readers never observe a half-swapped flow.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use common::{FlowId, PathId, SwitchId};
use model::{
    Flow, FlowEndpoint, FlowPathIds, FlowRepository, FlowRepositoryExt, InMemoryFlowRepository,
};

fn generation_of(path_id: &PathId) -> &str {
    path_id
        .as_str()
        .rsplit('_')
        .next()
        .unwrap_or_default()
}

#[test]
fn readers_never_see_mixed_path_generations() {
    let repo = Arc::new(InMemoryFlowRepository::new());
    let flow_id = FlowId::new("F1");
    let mut flow = Flow::unicast(
        flow_id.clone(),
        FlowEndpoint::new(SwitchId::new(1), 1, 10),
        FlowEndpoint::new(SwitchId::new(2), 1, 10),
        1_000,
    );
    flow.paths = FlowPathIds {
        forward: Some(PathId::new("F1_fw_0")),
        reverse: Some(PathId::new("F1_rv_0")),
        ..Default::default()
    };
    repo.seed(vec![flow], vec![]);

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let repo = repo.clone();
            let done = done.clone();
            let flow_id = flow_id.clone();
            thread::spawn(move || {
                let mut observed = 0usize;
                loop {
                    let flow = repo.get_flow(&flow_id).unwrap();
                    let forward = flow.paths.forward.unwrap();
                    let reverse = flow.paths.reverse.unwrap();
                    assert_eq!(generation_of(&forward), generation_of(&reverse));
                    observed += 1;
                    if done.load(Ordering::SeqCst) {
                        break observed;
                    }
                }
            })
        })
        .collect();

    for generation in 1..=500 {
        repo.in_transaction(|tx| {
            let mut flow = tx.flow(&flow_id)?.unwrap();
            flow.paths.forward = Some(PathId::new(format!("F1_fw_{generation}")));
            // Intermediate state inside the transaction is never published.
            tx.save_flow(flow.clone())?;
            flow.paths.reverse = Some(PathId::new(format!("F1_rv_{generation}")));
            tx.save_flow(flow)
        })
        .unwrap();
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    let flow = repo.find_flow(&flow_id).unwrap().unwrap();
    assert_eq!(flow.paths.forward, Some(PathId::new("F1_fw_500")));
    assert_eq!(flow.paths.reverse, Some(PathId::new("F1_rv_500")));
}
