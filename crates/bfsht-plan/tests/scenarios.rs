//! Closed-form seed scenarios: known coefficient vectors with analytically
//! known maps.

mod utils;

use std::f64::consts::PI;

use bfsht_plan::{coeff_index, coeff_len, PlanSpec, SynthPlan};
use utils::{fixture_context, for_each_pixel};

fn synthesize(plan: &mut SynthPlan, alm: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; plan.nmaps() * plan.grid().npix()];
    plan.execute(alm, &mut out).expect("execute");
    out
}

#[test]
fn zero_coefficients_give_a_zero_map() {
    let (nside, lmax) = (2usize, 3usize);
    let (_dir, ctx) = fixture_context(nside, lmax);
    let mut plan = SynthPlan::plan(&ctx, &PlanSpec::new(nside, lmax)).expect("plan");
    let alm = vec![0.0; coeff_len(lmax, lmax, 1)];
    let out = synthesize(&mut plan, &alm);
    assert_eq!(out.len(), 48);
    assert!(out.iter().all(|&v| v == 0.0));
}

#[test]
fn dc_mode_synthesizes_the_constant_one_map() {
    let (nside, lmax) = (2usize, 3usize);
    let (_dir, ctx) = fixture_context(nside, lmax);
    let mut plan = SynthPlan::plan(&ctx, &PlanSpec::new(nside, lmax)).expect("plan");
    let mut alm = vec![0.0; coeff_len(lmax, lmax, 1)];
    alm[coeff_index(lmax, 1, 0, 0, 0)] = (4.0 * PI).sqrt();
    let out = synthesize(&mut plan, &alm);
    for (i, v) in out.iter().enumerate() {
        assert!((v - 1.0).abs() < 1e-12, "pixel {i}: {v}");
    }
}

#[test]
fn dipole_mode_is_sqrt3_cos_theta() {
    let (nside, lmax) = (4usize, 7usize);
    let (_dir, ctx) = fixture_context(nside, lmax);
    let mut plan = SynthPlan::plan(&ctx, &PlanSpec::new(nside, lmax)).expect("plan");
    let mut alm = vec![0.0; coeff_len(lmax, lmax, 1)];
    alm[coeff_index(lmax, 1, 1, 0, 0)] = 1.0;
    let out = synthesize(&mut plan, &alm);

    let grid = plan.grid().clone();
    let amp = (3.0 / (4.0 * PI)).sqrt();
    for_each_pixel(&grid, |r, _k, p| {
        let want = amp * grid.ring_cos_theta(r);
        assert!(
            (out[p] - want).abs() < 1e-12,
            "ring {r}: {} vs {want}",
            out[p]
        );
    });
}

#[test]
fn sectoral_mode_is_the_real_part_of_y22() {
    let (nside, lmax) = (2usize, 3usize);
    let (_dir, ctx) = fixture_context(nside, lmax);
    let mut plan = SynthPlan::plan(&ctx, &PlanSpec::new(nside, lmax)).expect("plan");
    let mut alm = vec![0.0; coeff_len(lmax, lmax, 1)];
    alm[coeff_index(lmax, 1, 2, 2, 0)] = 1.0; // a_{2,2} = 1 + 0i
    let out = synthesize(&mut plan, &alm);

    let grid = plan.grid().clone();
    // Re Y_{2,2}(θ, φ) = (1/4)·√(15/2π)·sin²θ·cos 2φ, doubled by the ±m sum.
    let amp = 2.0 * 0.25 * (15.0 / (2.0 * PI)).sqrt();
    for_each_pixel(&grid, |r, k, p| {
        let x = grid.ring_cos_theta(r);
        let n = grid.ring_len(r);
        let phi = grid.phi0(r) + 2.0 * PI * k as f64 / n as f64;
        let want = amp * (1.0 - x * x) * (2.0 * phi).cos();
        assert!(
            (out[p] - want).abs() < 1e-12,
            "ring {r} pixel {k}: {} vs {want}",
            out[p]
        );
    });
}

#[test]
fn consecutive_executes_are_bit_identical() {
    let (nside, lmax) = (2usize, 3usize);
    let (_dir, ctx) = fixture_context(nside, lmax);
    let mut plan = SynthPlan::plan(&ctx, &PlanSpec::new(nside, lmax)).expect("plan");
    let mut alm = vec![0.0; coeff_len(lmax, lmax, 1)];
    alm[coeff_index(lmax, 1, 2, 1, 0)] = 0.5;
    alm[coeff_index(lmax, 1, 3, 3, 0) + 1] = -1.5;
    let a = synthesize(&mut plan, &alm);
    let b = synthesize(&mut plan, &alm);
    assert_eq!(a, b);
}
