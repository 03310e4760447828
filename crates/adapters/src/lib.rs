// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fleet-adapters: trait boundaries for the ContainerEngine, Provider, and
//! CoordinationStore external interfaces, plus the adapters that
//! implement them.

pub mod container_engine;
pub mod coordination;
pub mod error;
pub mod provider;

pub use container_engine::{
    worker_name, ContainerEngine, ContainerInspection, ContainerLabels, ContainerSpec,
    ContainerStats, ContainerSummary, KubernetesEngine,
};
pub use coordination::{CoordinationMessage, CoordinationStore, InMemoryCoordinationStore};
pub use error::{CoordinationError, ContainerEngineError, ProviderError};
pub use provider::{HttpProvider, HttpProviderConfig, JobSummary, Provider, ProviderWorker, ProviderWorkerStatus};

#[cfg(any(test, feature = "test-support"))]
pub use container_engine::FakeContainerEngine;
#[cfg(any(test, feature = "test-support"))]
pub use provider::FakeProvider;
