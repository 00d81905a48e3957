// crates/bfsht-plan/src/plan.rs

//! Plan construction and the execute/destroy protocol.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use num_complex::Complex64;
use tracing::{debug, info};

use bfsht_butterfly::{measure_legendre_leaf, query, BfmPlan, MatrixShape, QueryInfo};
use bfsht_grid::RingGrid;
use bfsht_kernels::fft::{complex_len, scratch_len};
use bfsht_kernels::{RingFftPlanner, RingInverseFft};
use bfsht_resource::{parity_degree_count, AlignedBytes, ResourceFile};

use crate::context::SynthContext;
use crate::error::PlanError;
use crate::sync::{lock_unpoisoned, ExecIo, Semaphore, SharedF64s};
use crate::topology::{CpuId, MachineTopology, NodeId, Topology};
use crate::{fft_stage, legendre_stage};

/// Ring-pairs assembled and transformed per scratch refill.
pub const FFT_CHUNK_SIZE: usize = 4;

/// Concurrent bandwidth-heavy streams allowed per node.
const CONCURRENT_MEMORY_BUS_USE: usize = 1;

const CACHELINE: usize = 64;

/// Planning switches.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanFlags {
    /// Ask the FFT backend for measured plans. Accepted for interface
    /// compatibility; the pure-Rust backend has one planning strategy, so
    /// this is recorded but changes nothing.
    pub measure: bool,
    /// Skip the node-local matrix copy and stream from the mapping
    /// (test/benchmark only).
    pub no_resource_copy: bool,
}

/// A planning request.
#[derive(Clone, Debug)]
pub struct PlanSpec {
    /// Grid resolution (power of two).
    pub nside: usize,
    /// Maximum degree; must match the resource file.
    pub lmax: usize,
    /// Maximum order; must match the resource file.
    pub mmax: usize,
    /// Independent maps synthesized together.
    pub nmaps: usize,
    /// Worker threads (one per assigned CPU).
    pub nthreads: usize,
    /// Switches.
    pub flags: PlanFlags,
    /// Explicit resource file, bypassing the context root/cache
    /// (debug/benchmark).
    pub resource_path: Option<PathBuf>,
}

impl PlanSpec {
    /// Single-map, single-thread request with `mmax = lmax`.
    #[must_use]
    pub fn new(nside: usize, lmax: usize) -> Self {
        Self {
            nside,
            lmax,
            mmax: lmax,
            nmaps: 1,
            nthreads: 1,
            flags: PlanFlags::default(),
            resource_path: None,
        }
    }
}

/* --------------------------- coefficient layout --------------------------- */

/// First double of the m-block in the packed coefficient array.
#[inline]
#[must_use]
pub fn coeff_block_start(lmax: usize, nmaps: usize, m: usize) -> usize {
    nmaps * m * (2 * lmax - m + 3)
}

/// Index of the real part of `a_{l,m}` for `map`; the imaginary part
/// follows at `+1`.
#[inline]
#[must_use]
pub fn coeff_index(lmax: usize, nmaps: usize, l: usize, m: usize, map: usize) -> usize {
    coeff_block_start(lmax, nmaps, m) + (l - m) * 2 * nmaps + 2 * map
}

/// Total doubles in the coefficient array.
#[inline]
#[must_use]
pub fn coeff_len(lmax: usize, mmax: usize, nmaps: usize) -> usize {
    coeff_block_start(lmax, nmaps, mmax + 1)
}

/* ------------------------------- plan state -------------------------------- */

/// Where one (m, parity) matrix lives.
#[derive(Debug)]
pub(crate) enum BlobStore {
    /// Registered absent in the resource file (offset 0).
    Missing,
    /// Streamed straight from the mapping (`no_resource_copy`).
    Mapped,
    /// Node-local page-aligned copy.
    Copied(AlignedBytes),
}

impl BlobStore {
    pub(crate) fn bytes<'a>(
        &'a self,
        res: &'a ResourceFile,
        m: usize,
        odd: usize,
    ) -> Option<&'a [u8]> {
        match self {
            Self::Missing => None,
            Self::Mapped => res.blob(m, odd),
            Self::Copied(b) => Some(b),
        }
    }
}

/// One m assigned to a node, with its two parity matrices.
#[derive(Debug)]
pub(crate) struct MResource {
    pub(crate) m: usize,
    pub(crate) stores: [BlobStore; 2],
}

/// Per-node plan: assigned m's, the phase-vector table, and the queue.
#[derive(Debug)]
pub(crate) struct NodePlan {
    #[allow(dead_code)] // reported in logs; topology nodes keep their ids
    pub(crate) node_id: NodeId,
    pub(crate) m_resources: Vec<MResource>,
    /// `[2·nm × work_q_stride]` doubles: even slab then odd slab per m.
    pub(crate) work_q: SharedF64s,
    /// Cursor of the m queue for the current execute.
    pub(crate) queue: Mutex<usize>,
    pub(crate) bus_sem: Semaphore,
    pub(crate) k_max: usize,
    pub(crate) nblocks_max: usize,
}

/// One northern ring and its southern twin.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RingPair {
    /// Half-sphere index: 0 at the equator, growing poleward.
    pub(crate) ring_number: usize,
    pub(crate) phi0: f64,
    pub(crate) offset_top: usize,
    pub(crate) offset_bottom: usize,
    pub(crate) length: usize,
}

/// Per-CPU assignment.
#[derive(Debug)]
pub(crate) struct CpuAssign {
    pub(crate) cpu_id: CpuId,
    pub(crate) node_idx: usize,
    pub(crate) ring_pairs: Vec<RingPair>,
    /// Exclusive ownership of this CPU's working set inside heavy leaves.
    pub(crate) cpu_lock: Mutex<()>,
}

/// Everything workers share; immutable after planning except the queue
/// cursors and the execute-scoped I/O cell.
#[derive(Debug)]
pub(crate) struct PlanShared {
    pub(crate) grid: RingGrid,
    pub(crate) nside: usize,
    pub(crate) lmax: usize,
    pub(crate) mmax: usize,
    pub(crate) nmaps: usize,
    pub(crate) nvecs: usize,
    pub(crate) work_q_stride: usize,
    pub(crate) flags: PlanFlags,
    pub(crate) resources: Arc<ResourceFile>,
    pub(crate) nodes: Vec<NodePlan>,
    pub(crate) cpus: Vec<CpuAssign>,
    /// Per m: `(node_idx, offset of the even slab in that node's work_q)`.
    pub(crate) m_to_phase: Vec<(usize, usize)>,
    /// Per m: `(node_idx, position within the node's m list)`.
    pub(crate) m_index: Vec<(usize, usize)>,
    pub(crate) barrier: Barrier,
    pub(crate) destructing: AtomicBool,
    pub(crate) io: ExecIo,
}

/// Thread-owned scratch of one worker.
pub(crate) struct CpuScratch {
    pub(crate) bfm: BfmPlan,
    pub(crate) work_a_l: Vec<f64>,
    /// `[2·FFT_CHUNK_SIZE × nmaps]` rings of `2·Nside + 1` complex bins.
    pub(crate) fft_acc: Vec<Complex64>,
    pub(crate) fft_real: Vec<f64>,
    pub(crate) fft_scratch: Vec<Complex64>,
    /// Parallel to the CPU's ring list.
    pub(crate) ring_ffts: Vec<RingInverseFft>,
}

/// Abort the process on an execute-path failure: resource data is trusted,
/// so corruption (or a missing matrix) mid-flight is unrecoverable by
/// policy.
pub(crate) fn hard_check<T, E: std::fmt::Display>(r: Result<T, E>, what: &str) -> T {
    match r {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("{what}: {e}");
            eprintln!("bfsht: fatal during execute: {what}: {e}");
            std::process::abort();
        }
    }
}

/* --------------------------------- planner --------------------------------- */

/// A planned synthesis with its parked worker pool.
pub struct SynthPlan {
    shared: Arc<PlanShared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SynthPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthPlan")
            .field("nside", &self.shared.nside)
            .field("lmax", &self.shared.lmax)
            .field("mmax", &self.shared.mmax)
            .field("nmaps", &self.shared.nmaps)
            .field("nthreads", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl SynthPlan {
    /// Plan on the host machine topology.
    ///
    /// # Errors
    ///
    /// Configuration, resource, or corruption errors; the plan is not
    /// partially constructed on failure.
    pub fn plan(ctx: &SynthContext, spec: &PlanSpec) -> Result<Self, PlanError> {
        Self::plan_with_topology(ctx, spec, Arc::new(MachineTopology::new()))
    }

    /// Plan against an explicit topology (tests use a stub).
    ///
    /// # Errors
    ///
    /// As [`SynthPlan::plan`].
    pub fn plan_with_topology(
        ctx: &SynthContext,
        spec: &PlanSpec,
        topo: Arc<dyn Topology>,
    ) -> Result<Self, PlanError> {
        let PlanSpec {
            nside,
            lmax,
            mmax,
            nmaps,
            nthreads,
            flags,
            ref resource_path,
        } = *spec;

        if nside == 0 || !nside.is_power_of_two() {
            return Err(PlanError::Config(format!(
                "Nside must be a positive power of two, got {nside}"
            )));
        }
        if mmax > lmax {
            return Err(PlanError::Config(format!("mmax {mmax} exceeds lmax {lmax}")));
        }
        if nmaps == 0 {
            return Err(PlanError::Config("nmaps must be positive".into()));
        }
        if nthreads == 0 {
            return Err(PlanError::Config("nthreads must be positive".into()));
        }

        let grid = RingGrid::new(nside);
        let nrings_half = grid.nrings_half();
        let nvecs = 2 * nmaps;

        /* Resource file: explicit path (debug/benchmark) or context cache. */
        let resources: Arc<ResourceFile> = match resource_path {
            Some(p) => Arc::new(ResourceFile::open(p)?),
            None => ctx.fetch(nside)?,
        };
        if (resources.lmax(), resources.mmax(), resources.nside()) != (lmax, mmax, nside) {
            return Err(PlanError::Config(format!(
                "resource file {} holds (lmax={}, mmax={}, Nside={}), requested \
                 (lmax={lmax}, mmax={mmax}, Nside={nside})",
                resources.path().display(),
                resources.lmax(),
                resources.mmax(),
                resources.nside(),
            )));
        }

        /* Nodes under the bind masks, then CPUs dealt round-robin. */
        let node_ids = topo.runnable_nodes();
        if node_ids.is_empty() {
            return Err(PlanError::Config("no runnable topology nodes".into()));
        }
        let avail: Vec<Vec<CpuId>> = node_ids.iter().map(|&n| topo.cpus_on_node(n)).collect();
        let mut picked: Vec<Vec<CpuId>> = vec![Vec::new(); node_ids.len()];
        let mut inode = 0usize;
        for _ in 0..nthreads {
            let mut hops = 0usize;
            loop {
                if picked[inode].len() < avail[inode].len() {
                    let next = avail[inode][picked[inode].len()];
                    picked[inode].push(next);
                    inode = (inode + 1) % node_ids.len();
                    break;
                }
                inode = (inode + 1) % node_ids.len();
                hops += 1;
                if hops == node_ids.len() {
                    return Err(PlanError::Config(format!(
                        "requested {nthreads} CPUs but only {} are available",
                        avail.iter().map(Vec::len).sum::<usize>()
                    )));
                }
            }
        }
        // Nodes that received no CPU take no part in the plan.
        let active: Vec<(NodeId, Vec<CpuId>)> = node_ids
            .into_iter()
            .zip(picked)
            .filter(|(_, cpus)| !cpus.is_empty())
            .collect();
        let nnodes = active.len();

        /* m round-robin across active nodes; lists come out ascending. */
        let mut node_ms: Vec<Vec<usize>> = vec![Vec::new(); nnodes];
        for m in 0..=mmax {
            node_ms[m % nnodes].push(m);
        }

        /* Flat CPU order (node-major), then ring-pair blocks dealt onto it. */
        let mut cpu_defs: Vec<(usize, CpuId)> = Vec::with_capacity(nthreads);
        for (node_idx, (_, cpus)) in active.iter().enumerate() {
            for &c in cpus {
                cpu_defs.push((node_idx, c));
            }
        }
        let ring_tables = deal_ring_pairs(&grid, cpu_defs.len());

        /* work_q stride: smallest cache-line multiple ≥ nvecs·nrings_half. */
        let mut stride_bytes = nvecs * nrings_half * 8;
        if stride_bytes % CACHELINE != 0 {
            stride_bytes += CACHELINE - stride_bytes % CACHELINE;
        }
        let work_q_stride = stride_bytes / 8;

        /* Phase A: fault pages in, copy blobs node-locally, query maxima. */
        #[derive(Clone, Copy, Default)]
        struct NodeAcc {
            k_max: usize,
            nblocks_max: usize,
        }
        let accs: Vec<Mutex<NodeAcc>> = (0..nnodes).map(|_| Mutex::new(NodeAcc::default())).collect();
        let io_turn = Mutex::new(());

        let mut store_lists: Vec<Vec<(usize, [BlobStore; 2])>> = Vec::with_capacity(nthreads);
        thread::scope(|s| -> Result<(), PlanError> {
            let mut handles = Vec::with_capacity(cpu_defs.len());
            for (node_idx, (_, cpus)) in active.iter().enumerate() {
                for (cpu_pos, &cpu_id) in cpus.iter().enumerate() {
                    let ms = &node_ms[node_idx];
                    let (resources, topo, accs, io_turn) = (&resources, &topo, &accs, &io_turn);
                    handles.push(s.spawn(move || -> Result<Vec<(usize, [BlobStore; 2])>, PlanError> {
                        topo.bind_current_thread(cpu_id);
                        if cpu_pos == 0 {
                            touch_node_blobs(resources, ms, node_idx, io_turn);
                        }
                        let mut out = Vec::new();
                        let mut k_max = 0usize;
                        let mut nblocks_max = 0usize;
                        let mut im = cpu_pos;
                        while im < ms.len() {
                            let m = ms[im];
                            let mut stores = [BlobStore::Missing, BlobStore::Missing];
                            for (odd, slot) in stores.iter_mut().enumerate() {
                                let Some(bytes) = resources.blob(m, odd) else {
                                    continue;
                                };
                                let shape = MatrixShape {
                                    rows: parity_degree_count(lmax, m, odd),
                                    cols: nrings_half,
                                };
                                let info = query(bytes, shape, measure_legendre_leaf)?;
                                k_max = k_max.max(info.k_max);
                                nblocks_max = nblocks_max.max(info.nblocks_max);
                                *slot = if flags.no_resource_copy {
                                    BlobStore::Mapped
                                } else {
                                    BlobStore::Copied(AlignedBytes::copy_from(bytes))
                                };
                            }
                            out.push((im, stores));
                            im += cpus.len();
                        }
                        let mut acc = lock_unpoisoned(&accs[node_idx]);
                        acc.k_max = acc.k_max.max(k_max);
                        acc.nblocks_max = acc.nblocks_max.max(nblocks_max);
                        drop(acc);
                        Ok(out)
                    }));
                }
            }
            for h in handles {
                let r = h
                    .join()
                    .map_err(|_| PlanError::Worker("init thread panicked".into()))?;
                store_lists.push(r?);
            }
            Ok(())
        })?;

        /* Merge the per-thread store lists into per-node m tables. */
        let mut node_stores: Vec<Vec<Option<[BlobStore; 2]>>> = node_ms
            .iter()
            .map(|ms| (0..ms.len()).map(|_| None).collect())
            .collect();
        {
            let mut it = store_lists.into_iter();
            for (node_idx, (_, cpus)) in active.iter().enumerate() {
                for _ in cpus {
                    for (im, stores) in it.next().expect("one list per init thread") {
                        node_stores[node_idx][im] = Some(stores);
                    }
                }
            }
        }

        /* Phase B: per-CPU scratch, FFT plans (serialized), node work_q. */
        let node_maxima: Vec<(usize, usize)> = accs
            .iter()
            .map(|a| {
                let a = lock_unpoisoned(a);
                (a.k_max, a.nblocks_max)
            })
            .collect();
        let fft_planner = Mutex::new(RingFftPlanner::new());
        let mut scratches: Vec<CpuScratch> = Vec::with_capacity(nthreads);
        let mut work_qs: Vec<Option<SharedF64s>> = Vec::with_capacity(nthreads);
        thread::scope(|s| -> Result<(), PlanError> {
            let mut handles = Vec::with_capacity(cpu_defs.len());
            for (node_idx, (_, cpus)) in active.iter().enumerate() {
                for (cpu_pos, &cpu_id) in cpus.iter().enumerate() {
                    let rings = &ring_tables[cpu_global_index(&active, node_idx, cpu_pos)];
                    let nm = node_ms[node_idx].len();
                    let (k_max, nblocks_max) = node_maxima[node_idx];
                    let (topo, fft_planner) = (&topo, &fft_planner);
                    handles.push(s.spawn(move || {
                        topo.bind_current_thread(cpu_id);
                        let bfm = BfmPlan::new(
                            &QueryInfo {
                                k_max,
                                nblocks_max,
                                element_count: 0,
                            },
                            nvecs,
                        );
                        let cmax = complex_len(4 * nside);
                        let (ring_ffts, fft_scratch_len) = {
                            let mut planner = lock_unpoisoned(fft_planner);
                            let plans: Vec<RingInverseFft> = rings
                                .iter()
                                .map(|rp| planner.plan_inverse(rp.length))
                                .collect();
                            let max = plans.iter().map(scratch_len).max().unwrap_or(0);
                            (plans, max)
                        };
                        let scratch = CpuScratch {
                            bfm,
                            work_a_l: vec![0.0; nvecs * (lmax + 1)],
                            fft_acc: vec![Complex64::default(); 2 * FFT_CHUNK_SIZE * nmaps * cmax],
                            fft_real: vec![0.0; 4 * nside],
                            fft_scratch: vec![Complex64::default(); fft_scratch_len],
                            ring_ffts,
                        };
                        let work_q = (cpu_pos == 0)
                            .then(|| SharedF64s::new(2 * nm * work_q_stride));
                        (scratch, work_q)
                    }));
                }
            }
            for h in handles {
                let (scratch, wq) = h
                    .join()
                    .map_err(|_| PlanError::Worker("scratch init thread panicked".into()))?;
                scratches.push(scratch);
                work_qs.push(wq);
            }
            Ok(())
        })?;

        /* Assemble the shared plan. */
        let mut nodes = Vec::with_capacity(nnodes);
        {
            let mut wq_it = work_qs.into_iter();
            for (node_idx, (node_id, cpus)) in active.iter().enumerate() {
                let mut work_q = None;
                for _ in cpus {
                    if let Some(w) = wq_it.next().expect("one slot per cpu") {
                        work_q = Some(w);
                    }
                }
                let work_q = work_q.expect("cpu 0 of each node allocates work_q");
                debug_assert_eq!(work_q.len(), 2 * node_ms[node_idx].len() * work_q_stride);
                let m_resources = node_ms[node_idx]
                    .iter()
                    .zip(node_stores[node_idx].drain(..))
                    .map(|(&m, stores)| MResource {
                        m,
                        stores: stores.expect("every im visited by exactly one init thread"),
                    })
                    .collect();
                let (k_max, nblocks_max) = node_maxima[node_idx];
                nodes.push(NodePlan {
                    node_id: *node_id,
                    m_resources,
                    work_q,
                    queue: Mutex::new(0),
                    bus_sem: Semaphore::new(CONCURRENT_MEMORY_BUS_USE),
                    k_max,
                    nblocks_max,
                });
            }
        }

        let cpus: Vec<CpuAssign> = cpu_defs
            .iter()
            .zip(ring_tables)
            .map(|(&(node_idx, cpu_id), ring_pairs)| CpuAssign {
                cpu_id,
                node_idx,
                ring_pairs,
                cpu_lock: Mutex::new(()),
            })
            .collect();

        let mut m_to_phase = vec![(0usize, 0usize); mmax + 1];
        let mut m_index = vec![(0usize, 0usize); mmax + 1];
        for (node_idx, ms) in node_ms.iter().enumerate() {
            for (im, &m) in ms.iter().enumerate() {
                m_to_phase[m] = (node_idx, 2 * im * work_q_stride);
                m_index[m] = (node_idx, im);
            }
        }

        let shared = Arc::new(PlanShared {
            grid,
            nside,
            lmax,
            mmax,
            nmaps,
            nvecs,
            work_q_stride,
            flags,
            resources,
            nodes,
            cpus,
            m_to_phase,
            m_index,
            barrier: Barrier::new(nthreads + 1),
            destructing: AtomicBool::new(false),
            io: ExecIo::new(),
        });

        /* Persistent execute workers, one per CPU, parked at the barrier.
        Each takes ownership of the scratch its init thread built. */
        let mut workers = Vec::with_capacity(nthreads);
        for (cpu_idx, scratch) in scratches.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let topo = Arc::clone(&topo);
            // Spawn failure is resource exhaustion; by policy that is fatal
            // (earlier workers already hold barrier slots, so there is no
            // clean unwind past this point).
            let handle = hard_check(
                thread::Builder::new()
                    .name(format!("bfsht-worker-{cpu_idx}"))
                    .spawn(move || worker_main(&shared, topo.as_ref(), cpu_idx, scratch)),
                "spawn execute worker",
            );
            workers.push(handle);
        }
        shared.barrier.wait(); // creation rendezvous

        info!(
            nside,
            lmax,
            mmax,
            nmaps,
            nthreads,
            nnodes,
            work_q_stride,
            no_resource_copy = flags.no_resource_copy,
            "planned HEALPix synthesis"
        );
        Ok(Self { shared, workers })
    }

    /// Run both stages for one coefficient array.
    ///
    /// `input` holds [`coeff_len`] doubles; `output` holds
    /// `nmaps · 12 · Nside²` doubles and is fully overwritten.
    ///
    /// # Errors
    ///
    /// Buffer length mismatches. Corruption mid-execute aborts the process.
    pub fn execute(&mut self, input: &[f64], output: &mut [f64]) -> Result<(), PlanError> {
        let want_in = coeff_len(self.shared.lmax, self.shared.mmax, self.shared.nmaps);
        if input.len() != want_in {
            return Err(PlanError::Config(format!(
                "input holds {} doubles, geometry needs {want_in}",
                input.len()
            )));
        }
        let want_out = self.shared.nmaps * self.shared.grid.npix();
        if output.len() != want_out {
            return Err(PlanError::Config(format!(
                "output holds {} doubles, geometry needs {want_out}",
                output.len()
            )));
        }

        for node in &self.shared.nodes {
            *lock_unpoisoned(&node.queue) = 0;
        }
        self.shared.io.set(input, output);

        let t0 = Instant::now();
        self.shared.barrier.wait(); // start Legendre
        self.shared.barrier.wait(); // Legendre done, start FFT
        let t_legendre = t0.elapsed();
        self.shared.barrier.wait(); // FFT done
        let t_total = t0.elapsed();

        self.shared.io.clear();
        debug!(
            legendre_us = t_legendre.as_micros() as u64,
            fft_us = (t_total - t_legendre).as_micros() as u64,
            "execute finished"
        );
        Ok(())
    }

    /// FLOPs of one (m, parity) Legendre application:
    /// `2 · element_count · nvecs`.
    ///
    /// # Errors
    ///
    /// Out-of-range indices, an absent matrix, or blob corruption.
    pub fn legendre_flops(&self, m: usize, odd: usize) -> Result<u64, PlanError> {
        if m > self.shared.mmax || odd > 1 {
            return Err(PlanError::Config(format!(
                "no matrix index (m={m}, odd={odd}) in this plan"
            )));
        }
        let (node_idx, im) = self.shared.m_index[m];
        let store = &self.shared.nodes[node_idx].m_resources[im].stores[odd];
        let bytes = store
            .bytes(&self.shared.resources, m, odd)
            .ok_or(PlanError::MissingMatrix { m, odd })?;
        let shape = MatrixShape {
            rows: parity_degree_count(self.shared.lmax, m, odd),
            cols: self.shared.grid.nrings_half(),
        };
        let info = query(bytes, shape, measure_legendre_leaf)?;
        Ok(2 * info.element_count * self.shared.nvecs as u64)
    }

    /// Grid descriptor the plan was built for.
    #[must_use]
    pub fn grid(&self) -> &RingGrid {
        &self.shared.grid
    }

    /// Resolution parameter.
    #[must_use]
    pub fn nside(&self) -> usize {
        self.shared.nside
    }

    /// Maximum degree.
    #[must_use]
    pub fn lmax(&self) -> usize {
        self.shared.lmax
    }

    /// Maximum order.
    #[must_use]
    pub fn mmax(&self) -> usize {
        self.shared.mmax
    }

    /// Maps synthesized per execute.
    #[must_use]
    pub fn nmaps(&self) -> usize {
        self.shared.nmaps
    }

    /// Worker thread count.
    #[must_use]
    pub fn nthreads(&self) -> usize {
        self.workers.len()
    }

    /// Flags the plan was built with.
    #[must_use]
    pub fn flags(&self) -> PlanFlags {
        self.shared.flags
    }
}

impl Drop for SynthPlan {
    fn drop(&mut self) {
        self.shared.destructing.store(true, Ordering::Release);
        self.shared.barrier.wait(); // wake workers so they observe the flag
        for h in self.workers.drain(..) {
            let _ = h.join();
        }
    }
}

/* --------------------------------- workers --------------------------------- */

fn worker_main(
    shared: &Arc<PlanShared>,
    topo: &dyn Topology,
    cpu_idx: usize,
    mut scratch: CpuScratch,
) {
    let cpu = &shared.cpus[cpu_idx];
    topo.bind_current_thread(cpu.cpu_id);
    let node_idx = cpu.node_idx;
    shared.barrier.wait(); // creation rendezvous
    loop {
        shared.barrier.wait(); // start
        if shared.destructing.load(Ordering::Acquire) {
            return;
        }
        legendre_stage::run(shared, node_idx, cpu_idx, &mut scratch);
        shared.barrier.wait(); // Legendre done
        fft_stage::run(shared, cpu_idx, &mut scratch);
        shared.barrier.wait(); // FFT done
    }
}

/* ------------------------------ ring dealing ------------------------------- */

/// Deal `FFT_CHUNK_SIZE`-sized blocks of half-sphere ring-pairs round-robin
/// over the flat CPU order. Full blocks keep chunk boundaries aligned, so
/// only the globally last block can run short.
fn deal_ring_pairs(grid: &RingGrid, ncpus: usize) -> Vec<Vec<RingPair>> {
    let mid = grid.mid_ring();
    let nrings_half = grid.nrings_half();
    let mut tables: Vec<Vec<RingPair>> = vec![Vec::new(); ncpus];
    let mut iring = 0usize;
    'outer: loop {
        for table in &mut tables {
            if iring >= nrings_half {
                break 'outer;
            }
            let stop = (iring + FFT_CHUNK_SIZE).min(nrings_half);
            for j in iring..stop {
                table.push(RingPair {
                    ring_number: j,
                    phi0: grid.phi0(mid + j),
                    offset_top: grid.ring_offset(mid - j),
                    offset_bottom: grid.ring_offset(mid + j),
                    length: grid.ring_len(mid + j),
                });
            }
            iring = stop;
        }
    }
    tables
}

fn cpu_global_index(active: &[(NodeId, Vec<CpuId>)], node_idx: usize, cpu_pos: usize) -> usize {
    active[..node_idx].iter().map(|(_, c)| c.len()).sum::<usize>() + cpu_pos
}

fn touch_node_blobs(
    resources: &ResourceFile,
    ms: &[usize],
    node_idx: usize,
    io_turn: &Mutex<()>,
) {
    // One node streams from the mapping at a time: sequential faults are
    // kind to spinning storage and keep first-touch placement per node.
    let _turn = lock_unpoisoned(io_turn);
    let t0 = Instant::now();
    let mut touched = 0usize;
    let mut acc = 0u8;
    for &m in ms {
        for odd in 0..2 {
            if let Some(bytes) = resources.blob(m, odd) {
                for page in bytes.chunks(4096) {
                    acc ^= page[0];
                }
                touched += bytes.len();
            }
        }
    }
    std::hint::black_box(acc);
    debug!(
        node = node_idx,
        kib = touched >> 10,
        us = t0.elapsed().as_micros() as u64,
        "faulted matrix pages"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coeff_layout_is_contiguous_in_m() {
        let (lmax, nmaps) = (9usize, 2usize);
        for m in 0..lmax {
            let block = coeff_block_start(lmax, nmaps, m);
            let next = coeff_block_start(lmax, nmaps, m + 1);
            assert_eq!(next - block, (lmax - m + 1) * 2 * nmaps);
            assert_eq!(coeff_index(lmax, nmaps, m, m, 0), block);
            assert_eq!(
                coeff_index(lmax, nmaps, m + 1, m, 1),
                block + 2 * nmaps + 2
            );
        }
        assert_eq!(
            coeff_len(lmax, lmax, nmaps),
            coeff_block_start(lmax, nmaps, lmax + 1)
        );
    }

    #[test]
    fn ring_dealing_keeps_chunks_aligned_and_total() {
        let grid = RingGrid::new(8); // nrings_half = 16
        for ncpus in [1usize, 2, 3, 5] {
            let tables = deal_ring_pairs(&grid, ncpus);
            let total: usize = tables.iter().map(Vec::len).sum();
            assert_eq!(total, grid.nrings_half());
            // Every ring appears exactly once.
            let mut seen = vec![false; grid.nrings_half()];
            for t in &tables {
                for rp in t {
                    assert!(!seen[rp.ring_number]);
                    seen[rp.ring_number] = true;
                }
            }
            // At most the single globally-last block may run short, so the
            // per-CPU chunk partition stays aligned to dealt blocks.
            let short: usize = tables
                .iter()
                .flat_map(|t| t.chunks(FFT_CHUNK_SIZE))
                .filter(|c| c.len() < FFT_CHUNK_SIZE)
                .count();
            assert!(short <= 1, "ncpus={ncpus}: {short} short chunks");
        }
    }

    #[test]
    fn equator_pair_is_self_paired() {
        let grid = RingGrid::new(4);
        let tables = deal_ring_pairs(&grid, 1);
        let eq = &tables[0][0];
        assert_eq!(eq.ring_number, 0);
        assert_eq!(eq.offset_top, eq.offset_bottom);
        assert_eq!(eq.length, 4 * grid.nside());
    }
}
