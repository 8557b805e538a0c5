// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # WGPU Backend
//!
//! Spike routing on the GPU (Metal, Vulkan, DirectX 12). The conductance
//! ring buffers live on the device:
//!
//! - **send**: one invocation per synapse, integer `atomicAdd` into the
//!   path's write slot
//! - **gather**: one invocation per (path, receiver, replica), swapping the
//!   read slot to zero into a compact drain buffer
//!
//! The drained values are written into the host store's read slots and the
//! shared gather kernel integrates them, so conductance integration is the
//! same code on every backend. Host and device synchronize once per phase.
//! Remaining phases run on the host partitioner.
//!
//! The shaders round half away from zero and assume no fused multiply-add,
//! which keeps the fixed-point values identical to the CPU path.

use super::ComputeBackend;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::network::NetRef;
use crate::partition::WorkPartitioner;
use crate::{conductance_router, learning};
use neurite_npu_neural::{NeuronVar as NV, SynapseVar as SV};
use neurite_npu_runtime::StateStore;
use std::sync::atomic::Ordering;
use tracing::{info, trace};
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: usize = 256;
const MAX_GROUPS_X: usize = 65_535;

/// Per-path routing parameters, mirrored by `PathGpu` in the shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct PathGpu {
    gscale: f32,
    write_slot: u32,
    read_slot: u32,
    active: u32,
    is_ctxt: u32,
    recv_neur_st: u32,
    recv_n: u32,
    gbuf_st: u32,
    drain_st: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct ParamsGpu {
    n_syn: u32,
    ndata: u32,
    n_paths: u32,
    total_drain: u32,
}

/// Persistent device buffers
struct WGPUBuffers {
    syn_table: wgpu::Buffer,
    wts: wgpu::Buffer,
    paths: wgpu::Buffer,
    send_vals: wgpu::Buffer,
    gbuf: wgpu::Buffer,
    drained: wgpu::Buffer,
    drain_staging: wgpu::Buffer,
    params: wgpu::Buffer,
}

/// Pipelines and bind groups, built once the network is known
struct WGPUState {
    buffers: WGPUBuffers,
    send_pipeline: wgpu::ComputePipeline,
    send_bind_group: wgpu::BindGroup,
    gather_pipeline: wgpu::ComputePipeline,
    gather_bind_group: wgpu::BindGroup,
    n_syn: usize,
    n_neurons: usize,
    ndata: usize,
    total_drain: usize,
    path_gpu: Vec<PathGpu>,
    send_vals: Vec<f32>,
    wts: Vec<f32>,
}

/// WGPU backend: spike routing on the device
pub struct WGPUBackend {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    partitioner: WorkPartitioner,
    state: Option<WGPUState>,
    weights_dirty: bool,
}

impl WGPUBackend {
    /// Acquire an adapter and device; fails when no GPU is available
    pub fn new(partitioner: WorkPartitioner) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| Error::Gpu("Failed to find WGPU adapter".to_string()))?;

        let adapter_info = adapter.get_info();
        let name = format!("WGPU ({} - {:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Neurite NPU Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| Error::Gpu(format!("Failed to create device: {}", e)))?;

        info!("[WGPU-BACKEND] Device ready: {}", name);
        Ok(Self {
            name,
            device,
            queue,
            partitioner,
            state: None,
            weights_dirty: true,
        })
    }

    fn storage_buffer(&self, label: &str, bytes: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        // zero-sized bindings are invalid
        let pad = [0u8; 4];
        let contents = if bytes.is_empty() { &pad[..] } else { bytes };
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    }

    fn pipeline(&self, label: &str, source: &str, entry_point: &str) -> wgpu::ComputePipeline {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: None,
            module: &module,
            entry_point,
        })
    }

    fn upload(&mut self, net: NetRef<'_>, store: &StateStore) {
        let topo = net.topology;
        let nd = store.ndata();
        let n_syn = topo.n_synapses();

        let syn_table: Vec<u32> = topo.syns.iter().flat_map(|s| [s.send, s.recv, s.path]).collect();
        let wts: Vec<f32> = (0..n_syn).map(|s| store.syn_v(s, SV::Wt)).collect();

        let mut drain_st = 0usize;
        let path_gpu: Vec<PathGpu> = topo
            .paths
            .iter()
            .map(|pj| {
                let p = PathGpu {
                    recv_neur_st: pj.recv_neur_st,
                    recv_n: pj.recv_n,
                    gbuf_st: pj.gbuf_st,
                    drain_st: drain_st as u32,
                    ..Default::default()
                };
                drain_st += pj.recv_n as usize * nd;
                p
            })
            .collect();
        let total_drain = drain_st;

        // pending spikes move to the device; host slots only stage reads
        let gbuf: Vec<i32> = store.gbuf.iter().map(|g| g.load(Ordering::Relaxed)).collect();
        for g in &store.gbuf {
            g.store(0, Ordering::Relaxed);
        }
        let send_vals = vec![0.0f32; topo.n_neurons() * nd * 2];
        let params = ParamsGpu {
            n_syn: n_syn as u32,
            ndata: nd as u32,
            n_paths: path_gpu.len() as u32,
            total_drain: total_drain as u32,
        };

        use wgpu::BufferUsages as U;
        let buffers = WGPUBuffers {
            syn_table: self.storage_buffer("Synapse Table", bytemuck::cast_slice(&syn_table), U::STORAGE),
            wts: self.storage_buffer("Weights", bytemuck::cast_slice(&wts), U::STORAGE | U::COPY_DST),
            paths: self.storage_buffer("Path Params", bytemuck::cast_slice(&path_gpu), U::STORAGE | U::COPY_DST),
            send_vals: self.storage_buffer(
                "Sender Values",
                bytemuck::cast_slice(&send_vals),
                U::STORAGE | U::COPY_DST,
            ),
            gbuf: self.storage_buffer(
                "Conductance Ring Buffers",
                bytemuck::cast_slice(&gbuf),
                U::STORAGE | U::COPY_DST,
            ),
            drained: self.storage_buffer(
                "Drained Slots",
                bytemuck::cast_slice(&vec![0i32; total_drain]),
                U::STORAGE | U::COPY_SRC,
            ),
            drain_staging: self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Drained Staging"),
                size: (total_drain.max(1) * std::mem::size_of::<i32>()) as u64,
                usage: U::MAP_READ | U::COPY_DST,
                mapped_at_creation: false,
            }),
            params: self.storage_buffer("Routing Params", bytemuck::bytes_of(&params), U::UNIFORM),
        };

        let send_pipeline = self.pipeline(
            "Send Spikes",
            include_str!("shaders/send_spikes.wgsl"),
            "send_spikes_main",
        );
        let gather_pipeline = self.pipeline(
            "Gather Spikes",
            include_str!("shaders/gather_spikes.wgsl"),
            "gather_spikes_main",
        );

        let send_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Send Spikes Bind Group"),
            layout: &send_pipeline.get_bind_group_layout(0),
            entries: &[
                entry(0, &buffers.syn_table),
                entry(1, &buffers.wts),
                entry(2, &buffers.paths),
                entry(3, &buffers.send_vals),
                entry(4, &buffers.gbuf),
                entry(5, &buffers.params),
            ],
        });
        let gather_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Gather Spikes Bind Group"),
            layout: &gather_pipeline.get_bind_group_layout(0),
            entries: &[
                entry(0, &buffers.paths),
                entry(1, &buffers.gbuf),
                entry(2, &buffers.drained),
                entry(3, &buffers.params),
            ],
        });

        info!(
            "[WGPU-BACKEND] Uploaded {} synapses, {} paths, {} ring-buffer entries",
            n_syn,
            path_gpu.len(),
            gbuf.len()
        );

        self.state = Some(WGPUState {
            buffers,
            send_pipeline,
            send_bind_group,
            gather_pipeline,
            gather_bind_group,
            n_syn,
            n_neurons: topo.n_neurons(),
            ndata: nd,
            total_drain,
            path_gpu,
            send_vals,
            wts,
        });
        self.weights_dirty = false;
    }

    fn ensure_state(&mut self, net: NetRef<'_>, store: &StateStore) {
        let stale = match &self.state {
            Some(s) => s.n_syn != net.topology.n_synapses() || s.ndata != store.ndata(),
            None => true,
        };
        if stale {
            self.upload(net, store);
        }
    }

    /// Refresh slots, scales and context timing for this cycle
    fn write_paths(queue: &wgpu::Queue, state: &mut WGPUState, net: NetRef<'_>, ctx: &Context) {
        for (pi, p) in state.path_gpu.iter_mut().enumerate() {
            let pj = &net.topology.paths[pi];
            let path = &net.paths[pi];
            let is_ctxt = path.is_context();
            p.gscale = path.gscale;
            p.is_ctxt = is_ctxt as u32;
            p.active = (!is_ctxt || ctx.cycle == ctx.theta_cycles - 1 - pj.delay as i32) as u32;
            p.write_slot = conductance_router::write_slot(ctx.cycles_total, pj.delay, pj.del_len) as u32;
            p.read_slot = conductance_router::read_slot(ctx.cycles_total, pj.del_len) as u32;
        }
        queue.write_buffer(&state.buffers.paths, 0, bytemuck::cast_slice(&state.path_gpu));
    }

    fn dispatch(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        n: usize,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        let groups = n.div_ceil(WORKGROUP_SIZE);
        let x = groups.min(MAX_GROUPS_X);
        let y = groups.div_ceil(x);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(x as u32, y as u32, 1);
    }

    /// Read the drain buffer back to the host (blocking)
    fn read_drained(&self, state: &WGPUState) -> Result<Vec<i32>> {
        let slice = state.buffers.drain_staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| Error::Gpu("Failed to receive drain buffer map result".to_string()))?
            .map_err(|e| Error::Gpu(format!("Failed to map drain buffer: {:?}", e)))?;

        let data = slice.get_mapped_range();
        let values: Vec<i32> = bytemuck::cast_slice(&data)[..state.total_drain].to_vec();
        drop(data);
        state.buffers.drain_staging.unmap();
        Ok(values)
    }
}

#[inline]
fn entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

impl ComputeBackend for WGPUBackend {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn partitioner(&self) -> &WorkPartitioner {
        &self.partitioner
    }

    fn initialize_persistent_data(&mut self, net: NetRef<'_>, store: &StateStore) -> Result<()> {
        self.upload(net, store);
        Ok(())
    }

    fn gather_spikes(&mut self, net: NetRef<'_>, store: &mut StateStore, ctx: &Context) -> Result<()> {
        self.ensure_state(net, store);
        let Some(mut state) = self.state.take() else {
            return Err(Error::Gpu("WGPU state missing after upload".to_string()));
        };
        let drained = if state.total_drain > 0 {
            Self::write_paths(&self.queue, &mut state, net, ctx);
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Gather Spikes Encoder"),
            });
            self.dispatch(
                "Gather Spikes Pass",
                &state.gather_pipeline,
                &state.gather_bind_group,
                state.total_drain,
                &mut encoder,
            );
            let bytes = (state.total_drain * std::mem::size_of::<i32>()) as u64;
            encoder.copy_buffer_to_buffer(&state.buffers.drained, 0, &state.buffers.drain_staging, 0, bytes);
            self.queue.submit(Some(encoder.finish()));
            self.read_drained(&state)
        } else {
            Ok(Vec::new())
        };
        let drained = match drained {
            Ok(d) => d,
            Err(e) => {
                self.state = Some(state);
                return Err(e);
            }
        };

        let strides = *store.strides();
        let nd = state.ndata;
        for (pi, p) in state.path_gpu.iter().enumerate() {
            let pj = &net.topology.paths[pi];
            let st = p.drain_st as usize;
            for (k, &v) in drained[st..st + pj.recv_n as usize * nd].iter().enumerate() {
                let idx = strides.gbuf(pj.gbuf_st as usize, pj.recv_n as usize, p.read_slot as usize, k / nd, k % nd);
                store.gbuf[idx].store(v, Ordering::Relaxed);
            }
        }
        self.state = Some(state);
        conductance_router::gather_spikes(net, store, ctx, &self.partitioner);
        Ok(())
    }

    fn send_spikes(&mut self, net: NetRef<'_>, store: &StateStore, ctx: &Context) -> Result<()> {
        self.ensure_state(net, store);
        let Some(mut state) = self.state.take() else {
            return Err(Error::Gpu("WGPU state missing after upload".to_string()));
        };
        if self.weights_dirty {
            for (s, w) in state.wts.iter_mut().enumerate() {
                *w = store.syn_v(s, SV::Wt);
            }
            self.queue.write_buffer(&state.buffers.wts, 0, bytemuck::cast_slice(&state.wts));
            self.weights_dirty = false;
            trace!("[WGPU-BACKEND] Weights re-uploaded");
        }

        let nd = state.ndata;
        for ni in 0..state.n_neurons {
            for di in 0..nd {
                let base = (ni * nd + di) * 2;
                if store.nrn_flags(ni, di).is_off() {
                    state.send_vals[base] = 0.0;
                    state.send_vals[base + 1] = 0.0;
                    continue;
                }
                state.send_vals[base] = if store.nrn_v(ni, NV::Spike, di) != 0.0 { 1.0 } else { 0.0 };
                state.send_vals[base + 1] = store.nrn_v(ni, NV::CaSpkP, di);
            }
        }
        self.queue
            .write_buffer(&state.buffers.send_vals, 0, bytemuck::cast_slice(&state.send_vals));
        Self::write_paths(&self.queue, &mut state, net, ctx);

        if state.n_syn > 0 {
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Send Spikes Encoder"),
            });
            self.dispatch(
                "Send Spikes Pass",
                &state.send_pipeline,
                &state.send_bind_group,
                state.n_syn,
                &mut encoder,
            );
            self.queue.submit(Some(encoder.finish()));
        }
        self.state = Some(state);
        Ok(())
    }

    fn wt_from_dwt(&mut self, net: NetRef<'_>, store: &mut StateStore) -> Result<()> {
        learning::wt_from_dwt(net, store, &self.partitioner);
        self.weights_dirty = true;
        Ok(())
    }

    fn reset_conductances(&mut self) -> Result<()> {
        if let Some(state) = &self.state {
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Reset Conductances"),
            });
            encoder.clear_buffer(&state.buffers.gbuf, 0, None);
            self.queue.submit(Some(encoder.finish()));
        }
        Ok(())
    }

    fn on_weights_changed(&mut self) -> Result<()> {
        self.weights_dirty = true;
        Ok(())
    }
}
