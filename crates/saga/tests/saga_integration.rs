//! End-to-end runs of flow sagas through the hub, with a scripted switch
//! agent answering the speaker commands.

mod support;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use common::{Cookie, FlowId, SagaKey, SwitchId};
use model::{FlowRepositoryExt, FlowStatus, PathStatus};
use saga::{
    CleanupItem, ErrorKind, FlowRequest, HubError, RerouteRequest, SagaConfig, SpeakerResponse,
    messages::{CommandKind, RuleKind},
};
use support::{Reply, TestHarness, endpoint, sw};

fn key(name: &str) -> SagaKey {
    SagaKey::new(name)
}

fn bandwidth_update(h: &TestHarness, flow_id: &str, bandwidth: u64) -> FlowRequest {
    let mut request = FlowRequest::from_flow(&h.flow(flow_id));
    request.bandwidth = bandwidth;
    request
}

fn installs_ingress(request: &saga::SpeakerRequest) -> bool {
    request.kind == CommandKind::Install && request.rules.iter().any(|r| r.kind == RuleKind::Ingress)
}

#[test]
fn update_moves_flow_to_new_resources() {
    let mut h = TestHarness::new();
    h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    h.answer_all();

    assert!(h.response(&key("update")).is_success());
    assert_eq!(h.hub.in_flight(), 0);

    let flow = h.flow("F1");
    assert_eq!(flow.status, FlowStatus::Up);
    assert_eq!(flow.bandwidth, 20);
    let forward = h.path(flow.paths.forward.as_ref().unwrap());
    assert_eq!(forward.cookie, Cookie::new(101));
    assert_eq!(forward.status, PathStatus::Active);
    assert_eq!(h.repo.path_count(), 2);

    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(101)]);
    assert_eq!(h.resources.double_free_count(), 0);

    let switches: HashSet<SwitchId> = h
        .seen
        .iter()
        .filter(|(_, r)| r.kind == CommandKind::Install)
        .map(|(_, r)| r.switch_id)
        .collect();
    assert_eq!(switches, HashSet::from([sw(1), sw(2)]));
    assert_eq!(h.listener.completed(), vec![FlowId::new("F1")]);
}

#[test]
fn update_without_path_leaves_flow_untouched() {
    let mut h = TestHarness::new();
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20_000);
    h.hub.start_update(key("update"), request).unwrap();

    let response = h.response(&key("update"));
    assert_eq!(response.error_kind(), Some(ErrorKind::NoPathFound));
    assert_eq!(h.flow("F1"), original);
    assert_eq!(h.resources.lease_count(), 1);
    assert!(h.carrier.sent_requests().is_empty());
    assert_eq!(h.hub.in_flight(), 0);
}

#[test]
fn saga_timeout_during_install_rolls_back() {
    let mut h = TestHarness::new();
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    let abandoned = h.take_unanswered();
    assert_eq!(abandoned.len(), 2);
    assert_eq!(h.flow("F1").status, FlowStatus::InProgress);

    h.hub.handle_timeout(&key("update")).unwrap();
    h.answer_all();

    let response = h.response(&key("update"));
    assert_eq!(response.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(h.flow("F1"), original);
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(100)]);
    assert_eq!(h.resources.double_free_count(), 0);
    assert_eq!(h.repo.path_count(), 2);

    let removals = h
        .seen
        .iter()
        .filter(|(_, r)| r.kind == CommandKind::Remove)
        .count();
    assert_eq!(removals, 2);

    // Late answers to abandoned commands find nobody waiting.
    let (late, request) = &abandoned[0];
    let err = h
        .hub
        .handle_async_response(late, SpeakerResponse::success(late.command_id, request.switch_id))
        .unwrap_err();
    assert!(matches!(err, HubError::UnknownKey(_)));
}

#[test]
fn expired_command_deadlines_fail_the_step() {
    let config = SagaConfig {
        command_timeout: Duration::ZERO,
        speaker_command_retries_limit: 0,
        ..SagaConfig::default()
    };
    let mut h = TestHarness::with_config(config);
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    h.take_unanswered();

    assert_eq!(h.hub.sweep_command_deadlines(Instant::now()), 2);
    h.answer_all();

    let response = h.response(&key("update"));
    assert_eq!(response.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(h.flow("F1"), original);
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(100)]);
    assert_eq!(h.hub.in_flight(), 0);
}

#[test]
fn redelivered_response_is_rejected() {
    let mut h = TestHarness::new();
    h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    let batch = h.take_unanswered();
    let (first, first_request) = batch[0].clone();
    let (second, second_request) = batch[1].clone();
    let answer = |k: &saga::CommandKey, switch_id| SpeakerResponse::success(k.command_id, switch_id);

    h.hub
        .handle_async_response(&first, answer(&first, first_request.switch_id))
        .unwrap();
    let err = h
        .hub
        .handle_async_response(&first, answer(&first, first_request.switch_id))
        .unwrap_err();
    assert!(matches!(err, HubError::UnexpectedCommand { .. }));

    h.hub
        .handle_async_response(&second, answer(&second, second_request.switch_id))
        .unwrap();
    h.answer_all();
    assert!(h.response(&key("update")).is_success());

    let err = h
        .hub
        .handle_async_response(&first, answer(&first, first_request.switch_id))
        .unwrap_err();
    assert!(matches!(err, HubError::UnknownKey(_)));
}

#[test]
fn create_installs_new_flow() {
    let mut h = TestHarness::new();
    let request = FlowRequest::unicast(FlowId::new("F2"), endpoint(1, 1), endpoint(2, 1), 10);

    h.hub.start_create(key("create"), request).unwrap();
    h.answer_all();

    assert!(h.response(&key("create")).is_success());
    let flow = h.flow("F2");
    assert_eq!(flow.status, FlowStatus::Up);
    assert!(flow.paths.forward.is_some());
    assert!(flow.paths.reverse.is_some());
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(100)]);
}

#[test]
fn create_with_failing_ingress_retries_then_reverts() {
    let mut h = TestHarness::new();
    let request = FlowRequest::unicast(FlowId::new("F2"), endpoint(1, 1), endpoint(2, 1), 10);

    h.hub.start_create(key("create"), request).unwrap();
    h.answer_with(|r| {
        if installs_ingress(r) && r.switch_id == sw(1) {
            Reply::Failure
        } else {
            Reply::Success
        }
    });

    let response = h.response(&key("create"));
    assert_eq!(response.error_kind(), Some(ErrorKind::SpeakerFailure));

    let attempts = h
        .seen
        .iter()
        .filter(|(_, r)| installs_ingress(r) && r.switch_id == sw(1))
        .count();
    assert_eq!(attempts, 4);

    let flow = h.flow("F2");
    assert_eq!(flow.status, FlowStatus::Down);
    assert!(flow.paths.is_empty());
    assert!(flow.status_info.is_some());
    assert_eq!(h.resources.lease_count(), 0);
    assert_eq!(h.resources.double_free_count(), 0);

    let failed = h.listener.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].flow_id, FlowId::new("F2"));
}

#[test]
fn multi_destination_flow_branches_at_split_switch() {
    let mut h = TestHarness::build(
        SagaConfig::default(),
        &[(1, 1, 2, 1), (2, 2, 3, 1), (2, 3, 4, 1)],
    );
    let request = FlowRequest::multi_destination(
        FlowId::new("M1"),
        endpoint(1, 10),
        vec![endpoint(3, 30), endpoint(4, 40)],
        10,
    );

    h.hub.start_create(key("create"), request).unwrap();
    h.answer_all();

    assert!(h.response(&key("create")).is_success());
    let flow = h.flow("M1");
    assert_eq!(flow.status, FlowStatus::Up);
    assert!(flow.paths.reverse.is_none());

    let forward = h.path(flow.paths.forward.as_ref().unwrap());
    assert_eq!(forward.branches.len(), 2);
    assert!(forward.group_id.is_some());
    assert!(h.seen.iter().any(|(_, r)| {
        r.switch_id == sw(2) && r.rules.iter().any(|rule| rule.kind == RuleKind::Group)
    }));
}

#[test]
fn reroute_moves_flow_off_failed_link() {
    let mut h = TestHarness::new();
    h.seed_flow_up("F1");
    h.paths.remove_link(sw(1), 10, sw(2), 10);

    h.hub
        .start_reroute(key("reroute"), RerouteRequest::new(FlowId::new("F1"), "link down"))
        .unwrap();
    h.answer_all();

    assert!(h.response(&key("reroute")).is_success());
    let flow = h.flow("F1");
    assert_eq!(flow.status, FlowStatus::Up);
    let forward = h.path(flow.paths.forward.as_ref().unwrap());
    assert_eq!(forward.segments.len(), 2);
    assert_eq!(forward.segments[0].dst_switch, sw(3));
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(101)]);
}

#[test]
fn reroute_onto_same_path_sends_nothing() {
    let mut h = TestHarness::new();
    let original = h.seed_flow_up("F1");

    h.hub
        .start_reroute(key("reroute"), RerouteRequest::new(FlowId::new("F1"), "periodic"))
        .unwrap();

    assert!(h.response(&key("reroute")).is_success());
    assert!(h.carrier.sent_requests().is_empty());
    assert_eq!(h.flow("F1").paths, original.paths);
    assert_eq!(h.flow("F1").status, FlowStatus::Up);
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(100)]);
}

#[test]
fn delete_removes_flow_and_frees_lease() {
    let mut h = TestHarness::new();
    h.seed_flow_up("F1");

    h.hub.start_delete(key("delete"), FlowId::new("F1")).unwrap();
    h.answer_all();

    assert!(h.response(&key("delete")).is_success());
    assert!(h.find_flow("F1").is_none());
    assert_eq!(h.repo.path_count(), 0);
    assert_eq!(h.resources.lease_count(), 0);
    assert!(h.hub.cleanup_debt().is_empty());
}

#[test]
fn delete_keeps_refused_rule_removals_as_debt() {
    let mut h = TestHarness::new();
    h.seed_flow_up("F1");

    h.hub.start_delete(key("delete"), FlowId::new("F1")).unwrap();
    h.answer_with(|r| {
        if r.switch_id == sw(2) {
            Reply::Failure
        } else {
            Reply::Success
        }
    });

    assert!(h.response(&key("delete")).is_success());
    assert!(h.find_flow("F1").is_none());

    let debt = h.hub.cleanup_debt();
    assert_eq!(debt.len(), 1);
    assert!(matches!(
        &debt[0].item,
        CleanupItem::StaleRules { switch_id, .. } if *switch_id == sw(2)
    ));
    assert_eq!(h.hub.retry_cleanup_debt(), 0);
    assert_eq!(h.hub.cleanup_debt().len(), 1);
}

#[test]
fn failed_deallocation_is_retried_later() {
    let mut h = TestHarness::new();
    h.seed_flow_up("F1");
    h.resources.set_fail_on_deallocate(true);

    h.hub.start_delete(key("delete"), FlowId::new("F1")).unwrap();
    h.answer_all();

    assert!(h.response(&key("delete")).is_success());
    assert_eq!(h.resources.lease_count(), 1);
    assert!(matches!(
        h.hub.cleanup_debt()[0].item,
        CleanupItem::Resources(_)
    ));

    assert_eq!(h.hub.retry_cleanup_debt(), 0);

    h.resources.set_fail_on_deallocate(false);
    assert_eq!(h.hub.retry_cleanup_debt(), 1);
    assert!(h.hub.cleanup_debt().is_empty());
    assert_eq!(h.resources.lease_count(), 0);
    assert_eq!(h.resources.double_free_count(), 0);
}

#[test]
fn path_swap_exchanges_primary_and_protected() {
    let mut h = TestHarness::new();
    let mut request = FlowRequest::unicast(FlowId::new("F3"), endpoint(1, 1), endpoint(2, 1), 10);
    request.allocate_protected_path = true;
    h.hub.start_create(key("create"), request).unwrap();
    h.answer_all();
    assert!(h.response(&key("create")).is_success());

    let before = h.flow("F3").paths;
    assert!(before.protected_forward.is_some());

    h.hub.start_path_swap(key("swap"), FlowId::new("F3")).unwrap();
    h.answer_all();

    assert!(h.response(&key("swap")).is_success());
    let after = h.flow("F3");
    assert_eq!(after.status, FlowStatus::Up);
    assert_eq!(after.paths.forward, before.protected_forward);
    assert_eq!(after.paths.protected_forward, before.forward);
    assert_eq!(h.resources.lease_count(), 2);
}

#[test]
fn disabled_operation_is_not_permitted() {
    let config = SagaConfig {
        update_enabled: false,
        ..SagaConfig::default()
    };
    let mut h = TestHarness::with_config(config);
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();

    let response = h.response(&key("update"));
    assert_eq!(response.error_kind(), Some(ErrorKind::NotPermitted));
    assert_eq!(h.flow("F1"), original);
}

#[test]
fn flow_in_progress_is_rejected() {
    let mut h = TestHarness::new();
    h.seed_flow_up("F1");
    h.set_status("F1", FlowStatus::InProgress);

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();

    let response = h.response(&key("update"));
    assert_eq!(response.error_kind(), Some(ErrorKind::InProgress));
    assert_eq!(h.flow("F1").status, FlowStatus::InProgress);
    assert_eq!(h.flow("F1").bandwidth, 10);
}

#[test]
fn update_of_unknown_flow_is_not_found() {
    let mut h = TestHarness::new();
    let request = FlowRequest::unicast(FlowId::new("ghost"), endpoint(1, 1), endpoint(2, 1), 10);

    h.hub.start_update(key("update"), request).unwrap();

    let response = h.response(&key("update"));
    assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));
    assert!(h.find_flow("ghost").is_none());
}

#[test]
fn abandoned_saga_expires_and_leaves_debt() {
    let config = SagaConfig {
        abandoned_saga_ttl: Duration::ZERO,
        ..SagaConfig::default()
    };
    let mut h = TestHarness::with_config(config);
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    h.take_unanswered();
    assert_eq!(h.resources.lease_count(), 2);
    assert_eq!(h.repo.path_count(), 4);

    assert_eq!(h.hub.expire_abandoned(Instant::now()), 1);
    assert_eq!(h.hub.in_flight(), 0);

    let response = h.response(&key("update"));
    assert_eq!(response.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(h.flow("F1"), original);
    assert_eq!(h.repo.path_count(), 2);

    let debt = h.hub.cleanup_debt();
    assert!(debt.iter().any(|e| matches!(e.item, CleanupItem::Resources(_))));
    assert!(debt.iter().any(|e| matches!(e.item, CleanupItem::StaleRules { .. })));

    assert_eq!(h.hub.retry_cleanup_debt(), 1);
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(100)]);
}

#[test]
fn saga_expired_after_swap_restores_old_paths() {
    let config = SagaConfig {
        abandoned_saga_ttl: Duration::ZERO,
        ..SagaConfig::default()
    };
    let mut h = TestHarness::with_config(config);
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    h.answer_with(|r| if installs_ingress(r) { Reply::Silent } else { Reply::Success });
    assert_ne!(h.flow("F1").paths, original.paths);

    assert_eq!(h.hub.expire_abandoned(Instant::now() + Duration::from_secs(7200)), 1);

    let response = h.response(&key("update"));
    assert_eq!(response.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(h.flow("F1"), original);
    let forward = h.path(original.paths.forward.as_ref().unwrap());
    assert_eq!(forward.status, PathStatus::Active);
    assert_eq!(h.repo.path_count(), 2);

    let debt = h.hub.cleanup_debt();
    let stale = debt
        .iter()
        .filter(|e| matches!(e.item, CleanupItem::StaleRules { .. }))
        .count();
    assert_eq!(stale, 2);
    assert_eq!(h.hub.retry_cleanup_debt(), 1);
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(100)]);

    let request = bandwidth_update(&h, "F1", 30);
    h.hub.start_update(key("again"), request).unwrap();
    h.answer_all();
    assert!(h.response(&key("again")).is_success());
    assert_eq!(h.flow("F1").bandwidth, 30);
}

#[test]
fn saga_expired_after_commit_keeps_new_paths() {
    let config = SagaConfig {
        abandoned_saga_ttl: Duration::ZERO,
        ..SagaConfig::default()
    };
    let mut h = TestHarness::with_config(config);
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    h.answer_with(|r| {
        if r.kind == CommandKind::Remove {
            Reply::Silent
        } else {
            Reply::Success
        }
    });

    assert_eq!(h.hub.expire_abandoned(Instant::now()), 1);

    let flow = h.flow("F1");
    assert_eq!(flow.status, FlowStatus::Up);
    assert_eq!(flow.bandwidth, 20);
    let forward = h.path(flow.paths.forward.as_ref().unwrap());
    assert_eq!(forward.cookie, Cookie::new(101));
    assert_eq!(forward.status, PathStatus::Active);
    assert!(h.find_flow("F1").is_some());
    assert!(original.paths.all().iter().all(|id| h.repo.get_path(id).is_err()));
    assert_eq!(h.repo.path_count(), 2);

    let debt = h.hub.cleanup_debt();
    assert!(debt.iter().any(|e| matches!(e.item, CleanupItem::StaleRules { .. })));
    assert_eq!(h.hub.retry_cleanup_debt(), 1);
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(101)]);
    assert_eq!(h.resources.double_free_count(), 0);
}

#[test]
fn unremoved_paths_of_expired_saga_are_retried() {
    let config = SagaConfig {
        abandoned_saga_ttl: Duration::ZERO,
        ..SagaConfig::default()
    };
    let mut h = TestHarness::with_config(config);
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    h.take_unanswered();

    h.repo.fail_next_transactions(1);
    assert_eq!(h.hub.expire_abandoned(Instant::now()), 1);
    assert_eq!(h.flow("F1"), original);
    assert_eq!(h.repo.path_count(), 4);
    assert!(h.hub.cleanup_debt().iter().any(|e| matches!(
        &e.item,
        CleanupItem::Paths { flow_id, path_ids } if *flow_id == FlowId::new("F1") && path_ids.len() == 2
    )));

    assert_eq!(h.hub.retry_cleanup_debt(), 2);
    assert_eq!(h.repo.path_count(), 2);
    assert_eq!(h.resources.leased_cookies(), vec![Cookie::new(100)]);
}

#[test]
fn delivered_saga_timeout_is_not_listed_again() {
    let config = SagaConfig {
        saga_timeout: Duration::ZERO,
        ..SagaConfig::default()
    };
    let mut h = TestHarness::with_config(config);
    let original = h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();
    h.take_unanswered();

    for saga_key in h.hub.overdue_sagas(Instant::now()) {
        h.hub.handle_timeout(&saga_key).unwrap();
    }
    assert_eq!(h.hub.in_flight(), 1);
    assert!(h.hub.overdue_sagas(Instant::now()).is_empty());

    h.answer_all();
    assert_eq!(h.response(&key("update")).error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(h.flow("F1"), original);
    assert!(h.hub.cleanup_debt().is_empty());
}

#[test]
fn rollback_steps_are_recorded_with_the_failure() {
    let mut h = TestHarness::new();
    let request = FlowRequest::unicast(FlowId::new("F2"), endpoint(1, 1), endpoint(2, 1), 10);

    h.hub.start_create(key("create"), request).unwrap();
    h.answer_with(|r| if installs_ingress(r) { Reply::Failure } else { Reply::Success });

    let entries: Vec<_> = h
        .history
        .entries()
        .into_iter()
        .filter(|e| e.saga_key == key("create") && e.action.starts_with("Reverting"))
        .collect();
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, ["Reverting paths swap", "Reverting new rules"]);
    assert!(entries.iter().all(|e| e.kind == history::HistoryKind::Error));
    assert!(entries.iter().all(|e| {
        e.details
            .as_deref()
            .is_some_and(|d| d.starts_with("Failed to install rules"))
    }));
}

#[test]
fn overdue_sagas_are_listed() {
    let config = SagaConfig {
        saga_timeout: Duration::ZERO,
        ..SagaConfig::default()
    };
    let mut h = TestHarness::with_config(config);
    h.seed_flow_up("F1");

    let request = bandwidth_update(&h, "F1", 20);
    h.hub.start_update(key("update"), request).unwrap();

    assert_eq!(h.hub.overdue_sagas(Instant::now()), vec![key("update")]);
}
