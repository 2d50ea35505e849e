//! Integration tests: failures after the first mutation roll the world
//! back to a single serviceable copy on the source.

mod support;

use std::sync::Arc;
use std::time::Duration;

use vmshift_core::{MigrationOutcome, MigrationPhase, MigrationPlan, VmState};
use vmshift_engine::{MigrationOptions, Migrator, RetryBudget, Unattended};

use support::{CollectSink, FakeDatacenter};

fn migrator(dc: &Arc<FakeDatacenter>, sink: &Arc<CollectSink>) -> Migrator {
    Migrator::new(
        Arc::clone(dc) as _,
        Arc::clone(dc) as _,
        Arc::clone(dc) as _,
        Arc::clone(dc) as _,
    )
    .with_events(Arc::clone(sink) as _)
}

fn quick_options() -> MigrationOptions {
    let mut options = MigrationOptions::offline();
    options.retry = RetryBudget::new(3, Duration::from_millis(1));
    options
}

#[tokio::test]
async fn import_failure_restores_the_source_and_cleans_the_destination() {
    let dc = FakeDatacenter::standalone_pair();
    let sink = CollectSink::new();
    let vm = dc.add_vm("hv-a", "web-01", VmState::Running);
    let plan = MigrationPlan::new(vm.clone(), "hv-b".into()).with_storage_path("c:/vms-dest");
    dc.fail("realize_import");

    let outcome = migrator(&dc, &sink)
        .migrate(&plan, &quick_options(), &Unattended::approve_all())
        .await
        .expect("post-mutation failures must not surface as Err");

    match outcome {
        MigrationOutcome::Failed { phase, .. } => assert_eq!(phase, MigrationPhase::Import),
        MigrationOutcome::Moved { .. } => panic!("import was forced to fail"),
    }

    // The source copy is the only one left, running again.
    assert_eq!(dc.realized_hosts(vm.id), vec!["hv-a".into()]);
    assert_eq!(dc.hosts_with(vm.id), vec!["hv-a".into()], "planned copy must be removed");
    let record = dc.vm_on("hv-a", vm.id).expect("source record");
    assert_eq!(record.state, VmState::Running, "the source must be restarted");

    // Export artifacts scrubbed, trust revoked.
    assert!(!dc.fs_contains("c:/vms-dest/web-01"), "export directory must be removed");
    assert_eq!(dc.outstanding_grants(), 0);
    assert!(
        sink.events().iter().any(|e| matches!(
            e,
            vmshift_engine::MigrationEvent::DestinationCleaned { vm: id } if *id == vm.id
        )),
        "destination cleanup must be reported"
    );
}

#[tokio::test]
async fn rollback_restores_the_running_state_even_without_restart_after() {
    let dc = FakeDatacenter::standalone_pair();
    let sink = CollectSink::new();
    let vm = dc.add_vm("hv-a", "web-01", VmState::Running);
    let plan = MigrationPlan::new(vm.clone(), "hv-b".into()).with_storage_path("c:/vms-dest");
    dc.fail("realize_import");

    // restart_after only qualifies the success path; a rollback must put
    // the source back in the exact state preflight captured.
    let mut options = quick_options();
    options.restart_after = false;

    let outcome = migrator(&dc, &sink)
        .migrate(&plan, &options, &Unattended::approve_all())
        .await
        .expect("post-mutation failures must not surface as Err");
    assert!(!outcome.is_moved(), "import was forced to fail: {outcome:?}");

    let record = dc.vm_on("hv-a", vm.id).expect("source record");
    assert_eq!(
        record.state,
        VmState::Running,
        "a VM that was running before the attempt must be running after rollback"
    );
    assert_eq!(
        record.start_action,
        vmshift_core::StartAction::Start,
        "the original start action must come back too"
    );
}

#[tokio::test]
async fn export_failure_leaves_no_trust_grant_behind() {
    let dc = FakeDatacenter::standalone_pair();
    let sink = CollectSink::new();
    let vm = dc.add_vm("hv-a", "web-01", VmState::Running);
    let plan = MigrationPlan::new(vm.clone(), "hv-b".into()).with_storage_path("c:/vms-dest");
    dc.fail("export_vm");

    let outcome = migrator(&dc, &sink)
        .migrate(&plan, &quick_options(), &Unattended::approve_all())
        .await
        .expect("post-mutation failures must not surface as Err");

    match outcome {
        MigrationOutcome::Failed { phase, .. } => assert_eq!(phase, MigrationPhase::Export),
        MigrationOutcome::Moved { .. } => panic!("export was forced to fail"),
    }
    assert_eq!(dc.outstanding_grants(), 0, "the grant must be revoked on the failure path");
    assert_eq!(dc.realized_hosts(vm.id), vec!["hv-a".into()]);
    let record = dc.vm_on("hv-a", vm.id).expect("source record");
    assert_eq!(record.state, VmState::Running);
}

#[tokio::test]
async fn unresolvable_comparison_stops_before_import() {
    let dc = FakeDatacenter::standalone_pair();
    let sink = CollectSink::new();
    let vm = dc.add_vm("hv-a", "web-01", VmState::Off);
    let plan = MigrationPlan::new(vm.clone(), "hv-b".into()).with_storage_path("c:/vms-dest");
    // With no switch listing the resolver cannot place the adapter.
    dc.fail("list_switches");

    let outcome = migrator(&dc, &sink)
        .migrate(&plan, &quick_options(), &Unattended::approve_all())
        .await
        .expect("post-mutation failures must not surface as Err");

    match outcome {
        MigrationOutcome::Failed { phase, .. } => assert_eq!(phase, MigrationPhase::Resolve),
        MigrationOutcome::Moved { .. } => panic!("resolution was forced to fail"),
    }
    assert_eq!(dc.hosts_with(vm.id), vec!["hv-a".into()], "planned copy must be removed");
}

#[tokio::test]
async fn stuck_source_removal_downgrades_to_a_warning() {
    let dc = FakeDatacenter::standalone_pair();
    let sink = CollectSink::new();
    let vm = dc.add_vm("hv-a", "web-01", VmState::Off);
    let plan = MigrationPlan::new(vm.clone(), "hv-b".into()).with_storage_path("c:/vms-dest");
    // Removal reports success but the VM stays enumerable.
    dc.stall("remove_vm");

    let outcome = migrator(&dc, &sink)
        .migrate(&plan, &quick_options(), &Unattended::approve_all())
        .await
        .expect("a cleanup timeout must not abort the migration");

    assert!(outcome.is_moved(), "the migration itself succeeded: {outcome:?}");
    let warnings = sink.warnings();
    assert!(
        warnings.iter().any(|w| w.contains("still enumerable")),
        "the stuck removal must be reported for review: {warnings:?}"
    );
}
