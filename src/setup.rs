// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Build engine objects from a loaded [`NeuriteConfig`].

use neurite_config::{BackendKind, ComputeConfig, EngineConfig, NeuriteConfig, PartitionKind};
use neurite_npu_cycle_engine::{
    create_backend, BackendConfig, BackendType, Context, CycleScheduler, Error, Network,
    PartitionMode, Result, WorkPartitioner,
};
use tracing::info;

pub fn partition_mode(kind: PartitionKind) -> PartitionMode {
    match kind {
        PartitionKind::Sequential => PartitionMode::Sequential,
        PartitionKind::Rayon => PartitionMode::Rayon,
        PartitionKind::Atomic => PartitionMode::AtomicChunks,
    }
}

/// Map the configured backend; `wgpu` needs the `gpu` feature
pub fn backend_type(kind: BackendKind) -> Result<BackendType> {
    match kind {
        BackendKind::Cpu => Ok(BackendType::CPU),
        BackendKind::Auto => Ok(BackendType::Auto),
        #[cfg(feature = "gpu")]
        BackendKind::Wgpu => Ok(BackendType::WGPU),
        #[cfg(not(feature = "gpu"))]
        BackendKind::Wgpu => Err(Error::InvalidBackend(
            "wgpu backend requested but the 'gpu' feature is not enabled".to_string(),
        )),
    }
}

pub fn backend_config(compute: &ComputeConfig) -> BackendConfig {
    BackendConfig {
        gpu_neuron_threshold: compute.gpu_neuron_threshold,
        gpu_synapse_threshold: compute.gpu_synapse_threshold,
        force_cpu: compute.backend == BackendKind::Cpu,
        force_gpu: compute.backend == BackendKind::Wgpu,
    }
}

pub fn partitioner(compute: &ComputeConfig) -> Result<WorkPartitioner> {
    WorkPartitioner::new(partition_mode(compute.partition), compute.threads, compute.chunk_size)
}

pub fn context(engine: &EngineConfig) -> Context {
    Context::new(
        engine.ndata,
        engine.theta_cycles,
        engine.plus_cycles,
        engine.slow_interval,
        engine.seed,
    )
}

/// Scheduler for `net` with the configured backend, partitioning and timing.
/// The network must have been built with `engine.ndata` replicas.
pub fn scheduler(config: &NeuriteConfig, net: &Network) -> Result<CycleScheduler> {
    let backend = create_backend(
        backend_type(config.compute.backend)?,
        net.net_ref(),
        &net.store,
        &backend_config(&config.compute),
        partitioner(&config.compute)?,
    )?;
    let mut sched = CycleScheduler::new(net, backend, context(&config.engine))?;
    sched.set_learning(config.engine.learning);
    info!(
        "[CYCLE-SCHED] Configured '{}' from file: backend={}, learning={}",
        net.name,
        sched.backend_name(),
        config.engine.learning
    );
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurite_npu_cycle_engine::{LayerKind, NetworkBuilder, PathParams};

    fn net(ndata: u32) -> Network {
        let mut b = NetworkBuilder::new("setup");
        b.ndata(ndata);
        b.add_layer("in", LayerKind::Input, 3);
        b.add_layer("hid", LayerKind::Super, 3);
        b.connect_full("in", "hid", PathParams::excitatory());
        b.build().unwrap()
    }

    #[test]
    fn test_scheduler_from_config() {
        let mut config = NeuriteConfig::default();
        config.engine.ndata = 2;
        config.engine.theta_cycles = 20;
        config.engine.plus_cycles = 5;
        config.engine.learning = false;
        config.compute.backend = BackendKind::Cpu;
        config.compute.partition = PartitionKind::Sequential;
        let mut network = net(2);
        let mut sched = scheduler(&config, &network).unwrap();
        assert!(!sched.learning());
        assert!(sched.backend_name().starts_with("CPU"));
        sched.run_trial(&mut network).unwrap();
        assert_eq!(sched.context().cycles_total, 20);
    }

    #[test]
    fn test_ndata_mismatch_surfaces() {
        let config = NeuriteConfig::default();
        assert!(scheduler(&config, &net(3)).is_err());
    }

    #[test]
    fn test_partition_mapping() {
        assert_eq!(partition_mode(PartitionKind::Atomic), PartitionMode::AtomicChunks);
        assert_eq!(partition_mode(PartitionKind::Rayon), PartitionMode::Rayon);
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn test_wgpu_without_feature_rejected() {
        assert!(matches!(backend_type(BackendKind::Wgpu), Err(Error::InvalidBackend(_))));
    }
}
