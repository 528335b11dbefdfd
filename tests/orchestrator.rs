use std::time::Duration;

use mpc_engine::{
    Collaborators, EntropySource, InMemoryJobStore, InMemoryPartyDirectory, JobParams, JobQuery, JobRequest,
    JobResult, JobRunner, JobStatus, JobType, JobView, MpcError, MpcJobOrchestrator, PartyStatus,
    SimulatedPartyClient,
    aggregation::{KeySource, SecureSumParams},
    client::Fault,
    joint_query::{JointQueryParams, QueryType},
    psi::PsiParams,
};
use num_bigint::BigUint;
use rand_chacha::ChaCha20Rng;

mod common;

use common::{Bank, CountingEntropy, bank, init_tracing, numbers, simulated, test_config};

const POLL: Duration = Duration::from_millis(10);

type Orchestrator = MpcJobOrchestrator<
    InMemoryPartyDirectory,
    SimulatedPartyClient,
    InMemoryJobStore,
    CountingEntropy,
>;

fn banks() -> SimulatedPartyClient {
    simulated([
        (
            "BANK_A",
            Bank::default()
                .set("account", numbers(1..=10))
                .value("deposit", 10)
                .record("CUST_007", QueryType::TotalDebt, 40_000),
        ),
        (
            "BANK_B",
            Bank::default()
                .set("account", numbers(5..=15))
                .value("deposit", 20)
                .record("CUST_007", QueryType::TotalDebt, 40_000),
        ),
        (
            "BANK_C",
            Bank::default()
                .set("account", numbers(100..=110))
                .value("deposit", 30)
                .record("CUST_007", QueryType::TotalDebt, 40_000),
        ),
    ])
}

fn spawn(client: SimulatedPartyClient) -> (Orchestrator, CountingEntropy) {
    init_tracing();
    let entropy = CountingEntropy::default();
    let directory =
        InMemoryPartyDirectory::new(["BANK_A", "BANK_B", "BANK_C", "BANK_D"].map(bank));
    directory.set_status("BANK_D", PartyStatus::Offline);
    let orchestrator = MpcJobOrchestrator::spawn(
        Collaborators {
            directory,
            client,
            store: InMemoryJobStore::new(),
            entropy: entropy.clone(),
        },
        test_config(),
    )
    .unwrap();
    (orchestrator, entropy)
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn psi(party_ids: &[&str]) -> JobRequest {
    JobRequest {
        party_ids: ids(party_ids),
        params: JobParams::Psi(PsiParams {
            field: "account".into(),
            reveal_intersection: false,
        }),
    }
}

fn secure_sum(party_ids: &[&str]) -> JobRequest {
    JobRequest {
        party_ids: ids(party_ids),
        params: JobParams::SecureSum(SecureSumParams {
            field: "deposit".into(),
            key: KeySource::Ephemeral,
        }),
    }
}

fn joint_query(party_ids: &[&str], threshold: u32) -> JobRequest {
    JobRequest {
        party_ids: ids(party_ids),
        params: JobParams::JointQuery(JointQueryParams {
            subject: "CUST_007".into(),
            query_type: QueryType::TotalDebt,
            threshold,
        }),
    }
}

fn rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Pending => 0,
        JobStatus::Running => 1,
        JobStatus::Success | JobStatus::Failed => 2,
    }
}

/// Polls until the job is terminal, checking that the observed states never move backwards.
async fn observe(orchestrator: &Orchestrator, id: mpc_engine::JobId) -> JobView {
    let mut last = JobStatus::Pending;
    loop {
        let view = orchestrator.status(id).await.unwrap();
        assert!(
            rank(view.status) >= rank(last),
            "illegal transition {last:?} -> {:?}",
            view.status
        );
        last = view.status;
        if view.status.is_terminal() {
            // terminal states never change again
            for _ in 0..3 {
                tokio::time::sleep(POLL).await;
                assert_eq!(orchestrator.status(id).await.unwrap(), view);
            }
            return view;
        }
        tokio::time::sleep(POLL).await;
    }
}

#[tokio::test]
async fn psi_job_succeeds() {
    let (orchestrator, entropy) = spawn(banks());
    let id = orchestrator.submit(psi(&["BANK_A", "BANK_B"])).await.unwrap();
    let view = observe(&orchestrator, id).await;

    assert_eq!(view.status, JobStatus::Success);
    assert_eq!(view.job_type, JobType::Psi);
    let Some(JobResult::Psi(result)) = view.result else {
        panic!("expected a PSI result, got {view:?}");
    };
    assert_eq!(result.intersection_size, 6);
    assert!(view.error.is_none());
    assert!(view.started_at.is_some() && view.ended_at.is_some());
    assert_eq!(entropy.drawn(), 1);
}

#[tokio::test]
async fn psi_job_over_disjoint_sets() {
    let (orchestrator, _) = spawn(banks());
    let id = orchestrator.submit(psi(&["BANK_A", "BANK_C"])).await.unwrap();
    let view = observe(&orchestrator, id).await;
    let Some(JobResult::Psi(result)) = view.result else {
        panic!("expected a PSI result, got {view:?}");
    };
    assert_eq!(result.intersection_size, 0);
}

#[tokio::test]
async fn secure_sum_job_succeeds() {
    let (orchestrator, _) = spawn(banks());
    let id = orchestrator
        .submit(secure_sum(&["BANK_A", "BANK_B", "BANK_C"]))
        .await
        .unwrap();
    let view = observe(&orchestrator, id).await;
    let Some(JobResult::SecureSum(result)) = view.result else {
        panic!("expected a secure sum result, got {view:?}");
    };
    assert_eq!(result.sum, BigUint::from(60u32));
    assert_eq!(result.party_count, 3);
}

#[tokio::test]
async fn offline_party_is_rejected_before_any_work() {
    let (orchestrator, entropy) = spawn(banks());
    let err = orchestrator
        .submit(secure_sum(&["BANK_A", "BANK_D"]))
        .await
        .unwrap_err();
    assert!(matches!(&err, MpcError::PartyOffline(id) if id == "BANK_D"));
    assert_eq!(err.kind(), "PartyOfflineError");

    let err = orchestrator
        .submit(psi(&["BANK_A", "BANK_X"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PartyNotFoundError");

    assert_eq!(entropy.drawn(), 0);
    let page = orchestrator.list(JobQuery::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let (orchestrator, entropy) = spawn(banks());
    for request in [
        psi(&[]),
        psi(&["BANK_A", "BANK_A"]),
        joint_query(&["BANK_A", "BANK_B"], 3),
        joint_query(&["BANK_A", "BANK_B"], 0),
    ] {
        assert!(orchestrator.submit(request).await.is_err());
    }
    assert_eq!(entropy.drawn(), 0);
}

#[tokio::test]
async fn failing_party_fails_the_job_with_a_sanitized_message() {
    let (orchestrator, _) = spawn(banks().with_fault("BANK_B", Fault::Unavailable));
    let id = orchestrator
        .submit(secure_sum(&["BANK_A", "BANK_B", "BANK_C"]))
        .await
        .unwrap();
    let view = observe(&orchestrator, id).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.result.is_none());
    let error = view.error.unwrap();
    assert_eq!(
        error,
        "AggregationError: secure aggregation failed: party BANK_B failed to provide its data"
    );
}

#[tokio::test]
async fn joint_query_tolerates_one_missing_party() {
    let (orchestrator, _) = spawn(banks().with_fault("BANK_C", Fault::Unavailable));
    let id = orchestrator
        .submit(joint_query(&["BANK_A", "BANK_B", "BANK_C"], 2))
        .await
        .unwrap();
    let view = observe(&orchestrator, id).await;
    let Some(JobResult::JointQuery(result)) = view.result else {
        panic!("expected a joint query result, got {view:?}");
    };
    assert_eq!(result.value, BigUint::from(40_000u32));
}

#[tokio::test]
async fn joint_query_below_threshold_fails() {
    let (orchestrator, _) = spawn(
        banks()
            .with_fault("BANK_B", Fault::Unavailable)
            .with_fault("BANK_C", Fault::Unavailable),
    );
    let id = orchestrator
        .submit(joint_query(&["BANK_A", "BANK_B", "BANK_C"], 2))
        .await
        .unwrap();
    let view = observe(&orchestrator, id).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.unwrap().starts_with("InsufficientSharesError"));
}

#[tokio::test(start_paused = true)]
async fn slow_party_does_not_count_towards_the_threshold() {
    let (orchestrator, _) = spawn(
        banks()
            .with_fault("BANK_B", Fault::Delay(Duration::from_secs(60)))
            .with_fault("BANK_C", Fault::Unavailable),
    );
    let id = orchestrator
        .submit(joint_query(&["BANK_A", "BANK_B", "BANK_C"], 2))
        .await
        .unwrap();
    let view = orchestrator.wait(id, POLL).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.unwrap().starts_with("InsufficientSharesError"));
}

#[tokio::test]
async fn list_and_statistics() {
    let (orchestrator, _) = spawn(banks());
    let psi_id = orchestrator.submit(psi(&["BANK_A", "BANK_B"])).await.unwrap();
    let sum_id = orchestrator
        .submit(secure_sum(&["BANK_A", "BANK_C"]))
        .await
        .unwrap();
    orchestrator.wait(psi_id, POLL).await.unwrap();
    orchestrator.wait(sum_id, POLL).await.unwrap();

    let sums = orchestrator
        .list(JobQuery {
            job_type: Some(JobType::SecureSum),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sums.total, 1);
    assert_eq!(sums.items[0].id, sum_id);

    let stats = orchestrator.statistics().await.unwrap();
    assert_eq!(stats.jobs.total, 2);
    assert_eq!(stats.jobs.by_status[&JobStatus::Success], 2);
    assert_eq!(stats.total_parties, 4);
    assert_eq!(stats.online_parties, 3);
}

#[tokio::test]
async fn full_queue_rejects_jobs() {
    init_tracing();
    let config = mpc_engine::MpcConfig {
        queue_capacity: 1,
        worker_concurrency: 1,
        ..test_config()
    };
    let (runner, orchestrator) = JobRunner::new(
        Collaborators {
            directory: InMemoryPartyDirectory::new(["BANK_A", "BANK_B"].map(bank)),
            client: banks(),
            store: InMemoryJobStore::new(),
            entropy: CountingEntropy::default(),
        },
        config,
    )
    .unwrap();

    // the runner is not started yet, so the single queue slot stays occupied
    let first = orchestrator.submit(psi(&["BANK_A", "BANK_B"])).await.unwrap();
    let err = orchestrator
        .submit(psi(&["BANK_A", "BANK_B"]))
        .await
        .unwrap_err();
    assert!(matches!(err, MpcError::QueueFull));
    assert_eq!(
        orchestrator.status(first).await.unwrap().status,
        JobStatus::Pending
    );

    tokio::spawn(runner.start());
    let view = orchestrator.wait(first, POLL).await.unwrap();
    assert_eq!(view.status, JobStatus::Success);
}

#[tokio::test]
async fn stopped_runner_rejects_jobs() {
    init_tracing();
    let (runner, orchestrator) = JobRunner::new(
        Collaborators {
            directory: InMemoryPartyDirectory::new(["BANK_A"].map(bank)),
            client: banks(),
            store: InMemoryJobStore::new(),
            entropy: CountingEntropy::default(),
        },
        test_config(),
    )
    .unwrap();
    drop(runner);
    let err = orchestrator.submit(psi(&["BANK_A"])).await.unwrap_err();
    assert!(matches!(err, MpcError::RunnerStopped));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (orchestrator, _) = spawn(banks());
    let id = mpc_engine::JobId::new();
    assert!(matches!(
        orchestrator.status(id).await,
        Err(MpcError::JobNotFound(unknown)) if unknown == id
    ));
}

/// An entropy source whose generator cannot be seeded.
struct BrokenEntropy;

impl EntropySource for BrokenEntropy {
    type Rng = ChaCha20Rng;

    fn rng(&self) -> Self::Rng {
        panic!("no entropy available")
    }
}

#[tokio::test]
async fn entropy_failure_fails_the_job() {
    init_tracing();
    let orchestrator = MpcJobOrchestrator::spawn(
        Collaborators {
            directory: InMemoryPartyDirectory::new(["BANK_A", "BANK_B"].map(bank)),
            client: banks(),
            store: InMemoryJobStore::new(),
            entropy: BrokenEntropy,
        },
        test_config(),
    )
    .unwrap();
    let id = orchestrator.submit(psi(&["BANK_A", "BANK_B"])).await.unwrap();
    let view = tokio::time::timeout(Duration::from_secs(5), orchestrator.wait(id, POLL))
        .await
        .expect("job never reached a terminal state")
        .unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(
        view.error.as_deref(),
        Some("InternalError: internal error while executing the job")
    );
}
