//! Fixture writer ↔ loader round trips, plus an end-to-end check that a
//! written blob applied through the butterfly engine reproduces the direct
//! Legendre product.

use bfsht_butterfly::{
    apply_transpose, measure_legendre_leaf, query, BfmPlan, CoeffView, LegendreKernel,
    MatrixShape, NoThrottle,
};
use bfsht_grid::RingGrid;
use bfsht_resource::writer::{normalized_legendre, write_fixture, FixtureSpec};
use bfsht_resource::{parity_degree_count, query_resourcefile, resource_path, ResourceFile};

#[test]
fn header_and_table_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = resource_path(dir.path(), 4);
    let mut spec = FixtureSpec::new(4, 9);
    spec.mmax = 7;
    spec.omit.push((3, 1));
    write_fixture(&path, &spec).unwrap();

    let (nside, lmax) = query_resourcefile(&path).unwrap();
    assert_eq!((nside, lmax), (4, 9));

    let res = ResourceFile::open(&path).unwrap();
    assert_eq!(res.nside(), 4);
    assert_eq!(res.lmax(), 9);
    assert_eq!(res.mmax(), 7);
    assert!(res.blob(3, 1).is_none(), "omitted entry must be absent");
    for m in 0..=7usize {
        for odd in 0..2 {
            if (m, odd) == (3, 1) {
                continue;
            }
            let blob = res.blob(m, odd).expect("blob present");
            assert_eq!(blob.as_ptr() as usize % 16, 0, "blob must be 16-aligned");
        }
    }
}

#[test]
fn missing_file_is_an_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = resource_path(dir.path(), 2);
    assert!(ResourceFile::open(&path).is_err());
    assert!(query_resourcefile(&path).is_err());
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.dat");
    std::fs::write(&path, [0u8; 20]).unwrap();
    assert!(ResourceFile::open(&path).is_err());
}

#[test]
fn written_blobs_reproduce_the_direct_legendre_product() {
    let dir = tempfile::tempdir().unwrap();
    let (nside, lmax) = (4usize, 9usize);
    let path = resource_path(dir.path(), nside);
    write_fixture(&path, &FixtureSpec::new(nside, lmax)).unwrap();
    let res = ResourceFile::open(&path).unwrap();

    let grid = RingGrid::new(nside);
    let mid = grid.mid_ring();
    let xs: Vec<f64> = (0..grid.nrings_half())
        .map(|c| grid.ring_cos_theta(mid - c))
        .collect();
    let nvecs = 2usize;

    for m in 0..=lmax {
        // Coefficient block for this m: degrees l = m..=lmax interleaved by
        // parity, 2·r·nvecs stride as in the planner's layout.
        let ndeg = lmax - m + 1;
        let coeff: Vec<f64> = (0..ndeg * nvecs)
            .map(|i| 0.3 + 0.1 * (i as f64) * if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();

        for odd in 0..2 {
            let nk = parity_degree_count(lmax, m, odd);
            let blob = res.blob(m, odd).expect("fixture writes all entries");
            let shape = MatrixShape {
                rows: nk,
                cols: xs.len(),
            };
            let info = query(blob, shape, measure_legendre_leaf).unwrap();
            let mut plan = BfmPlan::new(&info, nvecs);
            let mut pack = vec![0.0; ndeg * nvecs];
            let view_data = &coeff[odd * nvecs..];
            let mut kernel = LegendreKernel::new(CoeffView::new(view_data, nvecs), &mut pack);
            let mut out = vec![0.0; xs.len() * nvecs];
            apply_transpose(
                blob,
                shape,
                &mut kernel,
                &mut out,
                nvecs,
                &mut plan,
                &NoThrottle,
            )
            .unwrap();

            for (c, &x) in xs.iter().enumerate() {
                let lam: Vec<f64> = normalized_legendre(m, lmax, x)
                    .into_iter()
                    .skip(odd)
                    .step_by(2)
                    .collect();
                for v in 0..nvecs {
                    let want: f64 = (0..nk)
                        .map(|r| lam[r] * coeff[(odd + 2 * r) * nvecs + v])
                        .sum();
                    let got = out[c * nvecs + v];
                    assert!(
                        (got - want).abs() < 1e-11 * want.abs().max(1.0),
                        "m={m} odd={odd} ring={c} vec={v}: {got} vs {want}"
                    );
                }
            }
        }
    }
}
