//! Legendre leaf kernel: payload parsing, strip handling, and the on-the-fly
//! recurrence against direct evaluation.

use bfsht_butterfly::{
    apply_transpose, measure_legendre_leaf, query, AlignedBlobBuf, BfmError, BfmPlan, CoeffView,
    LegendreKernel, MatrixShape, NoThrottle, TYPE_DENSE,
};

fn push_pad16(buf: &mut Vec<u8>) {
    while buf.len() % 16 != 0 {
        buf.push(0);
    }
}

fn push_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_f64s(buf: &mut Vec<u8>, xs: &[f64]) {
    push_pad16(buf);
    for x in xs {
        buf.extend_from_slice(&x.to_le_bytes());
    }
}

fn leaf_header(buf: &mut Vec<u8>, row_start: usize, row_stop: usize) {
    buf.extend_from_slice(&TYPE_DENSE.to_le_bytes());
    push_pad16(buf);
    push_i64(buf, row_start as i64);
    push_i64(buf, row_stop as i64);
}

/// Coefficient block with parity interleaving: row `r` at `2·r·nvecs`.
fn interleaved_rows(rows: &[Vec<f64>], nvecs: usize) -> Vec<f64> {
    let mut data = vec![f64::NAN; 2 * rows.len() * nvecs];
    for (r, row) in rows.iter().enumerate() {
        data[2 * r * nvecs..2 * r * nvecs + nvecs].copy_from_slice(row);
    }
    data
}

fn run_leaf(
    bytes: &[u8],
    data: &[f64],
    rows: usize,
    cols: usize,
    nvecs: usize,
) -> Result<Vec<f64>, BfmError> {
    let blob = AlignedBlobBuf::from_bytes(bytes);
    let mut pack = vec![0.0; rows * nvecs];
    let mut kernel = LegendreKernel::new(CoeffView::new(data, nvecs), &mut pack);
    let mut out = vec![0.0; cols * nvecs];
    let mut plan = BfmPlan::with_levels(0, 0, nvecs);
    apply_transpose(
        blob.as_slice(),
        MatrixShape { rows, cols },
        &mut kernel,
        &mut out,
        nvecs,
        &mut plan,
        &NoThrottle,
    )?;
    Ok(out)
}

#[test]
fn small_dense_leaf_packs_parity_rows() {
    let (nk, ncols, nvecs) = (3usize, 4usize, 2usize);
    // A column-major (nk × ncols).
    let a: Vec<f64> = (0..nk * ncols).map(|i| (i as f64) * 0.5 - 2.0).collect();
    let rows: Vec<Vec<f64>> = (0..nk)
        .map(|r| (0..nvecs).map(|v| (r * nvecs + v) as f64 + 1.0).collect())
        .collect();
    let data = interleaved_rows(&rows, nvecs);

    let mut bytes = Vec::new();
    leaf_header(&mut bytes, 0, nk);
    push_f64s(&mut bytes, &a);

    let out = run_leaf(&bytes, &data, nk, ncols, nvecs).unwrap();
    for c in 0..ncols {
        for v in 0..nvecs {
            let want: f64 = (0..nk).map(|r| a[c * nk + r] * rows[r][v]).sum();
            let got = out[c * nvecs + v];
            assert!((got - want).abs() < 1e-13, "col {c} vec {v}: {got} vs {want}");
        }
    }
}

#[test]
fn recurrence_strip_matches_direct_evaluation() {
    let (nk, ncols, nvecs) = (6usize, 5usize, 2usize);
    let x_squared: Vec<f64> = (0..ncols).map(|c| 0.1 + 0.15 * c as f64).collect();
    let p0: Vec<f64> = (0..ncols).map(|c| 1.0 + 0.01 * c as f64).collect();
    let p1: Vec<f64> = x_squared.iter().map(|t| 0.5 * t + 0.2).collect();
    // Distinct coefficients per step to pin the aux indexing.
    let aux: Vec<f64> = (2..nk)
        .flat_map(|i| {
            let i = i as f64;
            [1.0 + 0.1 * i, -0.8 + 0.05 * i, 0.3 - 0.02 * i]
        })
        .collect();
    let rows: Vec<Vec<f64>> = (0..nk)
        .map(|r| (0..nvecs).map(|v| ((r + 1) as f64) * 0.3 - v as f64).collect())
        .collect();
    let data = interleaved_rows(&rows, nvecs);

    let mut bytes = Vec::new();
    leaf_header(&mut bytes, 0, nk);
    push_i64(&mut bytes, 1); // nstrips
    push_f64s(&mut bytes, &aux);
    push_i64(&mut bytes, 0); // rstart
    push_i64(&mut bytes, ncols as i64); // cstop
    push_f64s(&mut bytes, &x_squared);
    push_f64s(&mut bytes, &p0);
    push_f64s(&mut bytes, &p1);

    let out = run_leaf(&bytes, &data, nk, ncols, nvecs).unwrap();

    for c in 0..ncols {
        // Direct: regenerate P_i and sum.
        let t = x_squared[c];
        let mut p = vec![p0[c], p1[c]];
        for i in 2..nk {
            let (al, be, ga) = (aux[3 * (i - 2)], aux[3 * (i - 2) + 1], aux[3 * (i - 2) + 2]);
            let v = (al * t + ga) * p[i - 1] + be * p[i - 2];
            p.push(v);
        }
        for v in 0..nvecs {
            let want: f64 = (0..nk).map(|r| p[r] * rows[r][v]).sum();
            let got = out[c * nvecs + v];
            assert!((got - want).abs() < 1e-12, "col {c} vec {v}: {got} vs {want}");
        }
    }
}

#[test]
fn strips_mix_recurrence_and_dense_fallback() {
    let (nk, ncols, nvecs) = (6usize, 5usize, 1usize);
    let rows: Vec<Vec<f64>> = (0..nk).map(|r| vec![1.0 + r as f64]).collect();
    let data = interleaved_rows(&rows, nvecs);

    // Strip 0: columns [0, 2), full recurrence over all 6 rows.
    let x_squared = [0.25, 0.36];
    let p0 = [1.0, 1.0];
    let p1 = [0.25, 0.36];
    let aux: Vec<f64> = (2..nk).flat_map(|_| [2.0, -1.0, 0.0]).collect();
    // Strip 1: columns [2, 5), rows 3.. only (nk_strip = 3, dense fallback).
    let a1: Vec<f64> = (0..3 * 3).map(|i| i as f64 * 0.1).collect();

    let mut bytes = Vec::new();
    leaf_header(&mut bytes, 0, nk);
    push_i64(&mut bytes, 2); // nstrips
    push_f64s(&mut bytes, &aux);
    push_i64(&mut bytes, 0);
    push_i64(&mut bytes, 2);
    push_f64s(&mut bytes, &x_squared);
    push_f64s(&mut bytes, &p0);
    push_f64s(&mut bytes, &p1);
    push_i64(&mut bytes, 3); // rstart
    push_i64(&mut bytes, 5); // cstop
    push_f64s(&mut bytes, &a1);

    let out = run_leaf(&bytes, &data, nk, ncols, nvecs).unwrap();

    // Columns 0..2 via the recurrence (Chebyshev-like, α=2, β=−1, γ=0).
    for (c, &t) in x_squared.iter().enumerate() {
        let mut p = vec![1.0, t];
        for i in 2..nk {
            let v: f64 = 2.0 * t * p[i - 1] - p[i - 2];
            p.push(v);
        }
        let want: f64 = (0..nk).map(|r| p[r] * rows[r][0]).sum();
        assert!((out[c] - want).abs() < 1e-12, "col {c}");
    }
    // Columns 2..5 from the dense fallback over rows 3..6.
    for c in 0..3 {
        let want: f64 = (0..3).map(|r| a1[c * 3 + r] * rows[3 + r][0]).sum();
        assert!((out[2 + c] - want).abs() < 1e-12, "col {}", 2 + c);
    }
}

#[test]
fn strips_must_tile_the_leaf_columns() {
    let (nk, ncols) = (6usize, 5usize);
    let data = interleaved_rows(&vec![vec![1.0]; nk], 1);
    let aux: Vec<f64> = (2..nk).flat_map(|_| [2.0, -1.0, 0.0]).collect();

    let mut bytes = Vec::new();
    leaf_header(&mut bytes, 0, nk);
    push_i64(&mut bytes, 1);
    push_f64s(&mut bytes, &aux);
    push_i64(&mut bytes, 0);
    push_i64(&mut bytes, 3); // stops short of ncols = 5
    push_f64s(&mut bytes, &[0.1, 0.2, 0.3]);
    push_f64s(&mut bytes, &[1.0, 1.0, 1.0]);
    push_f64s(&mut bytes, &[0.1, 0.2, 0.3]);

    let err = run_leaf(&bytes, &data, nk, ncols, 1).unwrap_err();
    assert!(matches!(err, BfmError::Dimensions(_)));
}

#[test]
fn measure_agrees_with_apply_consumption() {
    // Odd strip width: the x²/P₀/P₁ arrays each re-align to 16, which the
    // measurement walk must reproduce byte for byte.
    let (nk, ncols, nvecs) = (6usize, 5usize, 1usize);
    let rows: Vec<Vec<f64>> = (0..nk).map(|r| vec![r as f64]).collect();
    let data = interleaved_rows(&rows, nvecs);
    let aux: Vec<f64> = (2..nk).flat_map(|_| [2.0, -1.0, 0.0]).collect();

    let mut bytes = Vec::new();
    leaf_header(&mut bytes, 0, nk);
    push_i64(&mut bytes, 1);
    push_f64s(&mut bytes, &aux);
    push_i64(&mut bytes, 0);
    push_i64(&mut bytes, ncols as i64);
    push_f64s(&mut bytes, &[0.1, 0.2, 0.3, 0.4, 0.5]);
    push_f64s(&mut bytes, &[1.0; 5]);
    push_f64s(&mut bytes, &[0.1, 0.2, 0.3, 0.4, 0.5]);

    let blob = AlignedBlobBuf::from_bytes(&bytes);
    let info = query(
        blob.as_slice(),
        MatrixShape { rows: nk, cols: ncols },
        measure_legendre_leaf,
    )
    .unwrap();
    assert_eq!(info.element_count, (nk * ncols) as u64);
    assert_eq!(info.k_max, 0);
    assert_eq!(info.nblocks_max, 0);

    // And the apply path accepts the same bytes.
    run_leaf(&bytes, &data, nk, ncols, nvecs).unwrap();
}
