// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fleet-daemon: the orchestration control loop. Wires a `Config` and a
//! concrete `ContainerEngine`/`Provider`/`CoordinationStore` into a
//! `ScalerSupervisor` that owns everything else (`PerRepoController`,
//! `LeaderElector`, `TokenBroker`, `LifecycleReconciler`).

pub mod env;
pub mod events;
pub mod leader_elector;
pub mod lifecycle_reconciler;
pub mod per_repo_controller;
pub mod scaler_supervisor;
pub mod token_broker;

pub use env::Config;
pub use events::EventBus;
pub use leader_elector::LeaderElector;
pub use lifecycle_reconciler::{LifecycleReconciler, SyncOutcome, TrackedWorker};
pub use per_repo_controller::{BusyMap, PerRepoController};
pub use scaler_supervisor::ScalerSupervisor;
pub use token_broker::TokenBroker;
