//! A secure multi-party computation (MPC) engine that lets mutually distrustful organizations,
//! e.g. banks, jointly compute over their private datasets without disclosing their records to
//! each other or to the coordinator.
//!
//! ## Protocols
//!
//! * [`psi`]: private set intersection cardinality over salted hash commitments.
//! * [`aggregation`]: an exact sum of one value per party under [Paillier] encryption.
//! * [`joint_query`]: a threshold query about a single subject based on [Shamir] secret sharing.
//!
//! ## Main Components
//!
//! * [`MpcJobOrchestrator`]: validates participants, schedules jobs onto a bounded worker pool,
//!   fans out to the parties and records each job's terminal state.
//! * [`PartyClient`]: the transport boundary to every party's own systems.
//! * [`PartyDirectory`] and [`JobStore`]: where parties are registered and jobs are persisted.
//! * [`EntropySource`]: the CSPRNG collaborator. Every job draws a generator of its own.
//!
//! ## Example
//!
//! ```ignore
//! use mpc_engine::{
//!     Collaborators, InMemoryJobStore, InMemoryPartyDirectory, JobParams, JobRequest, MpcConfig,
//!     MpcJobOrchestrator, OsEntropy, psi::PsiParams,
//! };
//!
//! # async fn example(client: impl mpc_engine::PartyClient) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = MpcJobOrchestrator::spawn(
//!     Collaborators {
//!         directory: InMemoryPartyDirectory::new(/* ... */),
//!         client,
//!         store: InMemoryJobStore::new(),
//!         entropy: OsEntropy,
//!     },
//!     MpcConfig::default(),
//! )?;
//! let id = orchestrator
//!     .submit(JobRequest {
//!         party_ids: vec!["BANK_A".into(), "BANK_B".into()],
//!         params: JobParams::Psi(PsiParams {
//!             field: "customer_id".into(),
//!             reveal_intersection: false,
//!         }),
//!     })
//!     .await?;
//! let view = orchestrator.wait(id, std::time::Duration::from_millis(50)).await?;
//! println!("{view:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! All protocols assume semi-honest parties and a semi-honest coordinator. Results never contain
//! raw party data, shares or ciphertexts. The PSI construction is not oblivious: see [`psi`] for
//! what it leaks to the coordinator.
//!
//! [Paillier]: paillier
//! [Shamir]: shamir
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod aggregation;
pub mod bigint;
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod job;
pub mod joint_query;
mod orchestrator;
pub mod paillier;
pub mod party;
pub mod psi;
pub mod rng;
pub mod shamir;

pub use client::{PartyClient, PartyDataUnavailable, SimulatedPartyClient};
pub use config::MpcConfig;
pub use error::MpcError;
pub use job::{
    InMemoryJobStore, JobId, JobParams, JobQuery, JobResult, JobStatus, JobStore, JobType, JobView,
    MpcJob,
};
pub use orchestrator::{Collaborators, JobRequest, JobRunner, MpcJobOrchestrator, Statistics};
pub use party::{InMemoryPartyDirectory, Party, PartyDirectory, PartyStatus};
pub use rng::{EntropySource, OsEntropy};
