// crates/bfsht-plan/src/legendre_stage.rs

//! Legendre stage: per-node m queue drained by that node's workers.
//!
//! Each pulled m is processed for both parities into its own work_q slab, so
//! any interleaving of workers is correct; the queue cursor only guarantees
//! that no two workers take the same m.

use bfsht_butterfly::{apply_transpose, CoeffView, LegendreKernel, MatrixShape};
use bfsht_resource::parity_degree_count;

use crate::error::PlanError;
use crate::plan::{coeff_block_start, hard_check, CpuScratch, PlanShared};
use crate::sync::{lock_unpoisoned, BusThrottle};

pub(crate) fn run(shared: &PlanShared, node_idx: usize, cpu_idx: usize, scratch: &mut CpuScratch) {
    let node = &shared.nodes[node_idx];
    let nm = node.m_resources.len();
    let nvecs = shared.nvecs;
    let nrings_half = shared.grid.nrings_half();
    let stride = shared.work_q_stride;
    // SAFETY: the driver published the buffers before tripping the start
    // barrier, and holds them until the final barrier.
    let input = unsafe { shared.io.input() };

    loop {
        let im = {
            let mut q = lock_unpoisoned(&node.queue);
            let v = *q;
            if v < nm {
                *q += 1;
            }
            v
        };
        if im >= nm {
            break;
        }

        let mres = &node.m_resources[im];
        let m = mres.m;
        let block = coeff_block_start(shared.lmax, shared.nmaps, m);
        let block_end = coeff_block_start(shared.lmax, shared.nmaps, m + 1);

        for odd in 0..2 {
            let bytes = hard_check(
                mres.stores[odd]
                    .bytes(&shared.resources, m, odd)
                    .ok_or(PlanError::MissingMatrix { m, odd }),
                "fetch matrix blob",
            );
            let shape = MatrixShape {
                rows: parity_degree_count(shared.lmax, m, odd),
                cols: nrings_half,
            };
            // SAFETY: slab (2·im + odd) of this node's work_q belongs to the
            // worker that pulled im; slabs of distinct (im, odd) are disjoint.
            let out = unsafe {
                node.work_q
                    .slice_mut((2 * im + odd) * stride, nvecs * nrings_half)
            };
            let view = CoeffView::new(&input[block + odd * nvecs..block_end], nvecs);
            let mut kernel = LegendreKernel::new(view, &mut scratch.work_a_l);
            let throttle = BusThrottle {
                sem: &node.bus_sem,
                cpu_lock: &shared.cpus[cpu_idx].cpu_lock,
            };
            hard_check(
                apply_transpose(
                    bytes,
                    shape,
                    &mut kernel,
                    out,
                    nvecs,
                    &mut scratch.bfm,
                    &throttle,
                ),
                "apply butterfly matrix",
            );
        }
    }
}
