// crates/bfsht-cli/src/main.rs

//! Operator CLI: inspect resource files, generate fixtures, and run
//! syntheses from the command line.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, Rng as _, SeedableRng};
use tracing_subscriber::EnvFilter;

use bfsht_plan::{coeff_len, PlanFlags, PlanSpec, SynthContext, SynthPlan};
use bfsht_resource::writer::{write_fixture, FixtureSpec};
use bfsht_resource::{query_resourcefile, resource_path};

#[derive(Parser)]
#[command(
    name = "bfsht",
    about = "Butterfly-compressed spherical harmonic synthesis on HEALPix grids"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print (Nside, lmax) from a resource file header.
    Query {
        /// Resource file to inspect.
        file: PathBuf,
    },
    /// Write a test/benchmark resource file under the resource root.
    GenResource {
        /// Grid resolution.
        #[arg(long)]
        nside: usize,
        /// Maximum degree.
        #[arg(long)]
        lmax: usize,
        /// Maximum order (defaults to lmax).
        #[arg(long)]
        mmax: Option<usize>,
        /// Resource root directory.
        #[arg(long)]
        root: PathBuf,
    },
    /// Plan and run a synthesis of random coefficients, printing map stats.
    Synth {
        /// Grid resolution.
        #[arg(long)]
        nside: usize,
        /// Maximum degree.
        #[arg(long)]
        lmax: usize,
        /// Maximum order (defaults to lmax).
        #[arg(long)]
        mmax: Option<usize>,
        /// Resource root directory.
        #[arg(long)]
        root: PathBuf,
        /// Worker threads.
        #[arg(long, default_value_t = 1)]
        threads: usize,
        /// Maps synthesized together.
        #[arg(long, default_value_t = 1)]
        maps: usize,
        /// RNG seed for the coefficients.
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Stream matrices from the mapping instead of copying node-locally.
        #[arg(long)]
        no_resource_copy: bool,
        /// Number of executes to time.
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().cmd {
        Cmd::Query { file } => {
            let (nside, lmax) = query_resourcefile(&file)
                .with_context(|| format!("query {}", file.display()))?;
            println!("Nside = {nside}");
            println!("lmax  = {lmax}");
        }
        Cmd::GenResource {
            nside,
            lmax,
            mmax,
            root,
        } => {
            let mut spec = FixtureSpec::new(nside, lmax);
            spec.mmax = mmax.unwrap_or(lmax);
            let path = resource_path(&root, nside);
            write_fixture(&path, &spec).context("write fixture resource")?;
            println!("wrote {}", path.display());
        }
        Cmd::Synth {
            nside,
            lmax,
            mmax,
            root,
            threads,
            maps,
            seed,
            no_resource_copy,
            repeat,
        } => {
            let mmax = mmax.unwrap_or(lmax);
            let ctx = SynthContext::new(root);
            let spec = PlanSpec {
                nside,
                lmax,
                mmax,
                nmaps: maps,
                nthreads: threads,
                flags: PlanFlags {
                    measure: false,
                    no_resource_copy,
                },
                resource_path: None,
            };
            let t0 = Instant::now();
            let mut plan = SynthPlan::plan(&ctx, &spec).context("plan synthesis")?;
            println!("planned in {:.1} ms", t0.elapsed().as_secs_f64() * 1e3);

            let mut rng = StdRng::seed_from_u64(seed);
            let alm: Vec<f64> = (0..coeff_len(lmax, mmax, maps))
                .map(|_| rng.random_range(-1.0..1.0))
                .collect();
            let mut out = vec![0.0; maps * plan.grid().npix()];
            for i in 0..repeat.max(1) {
                let t = Instant::now();
                plan.execute(&alm, &mut out).context("execute synthesis")?;
                println!(
                    "execute[{i}] {:.2} ms",
                    t.elapsed().as_secs_f64() * 1e3
                );
            }

            let (mut lo, mut hi, mut sq) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
            for &v in &out {
                lo = lo.min(v);
                hi = hi.max(v);
                sq += v * v;
            }
            let rms = (sq / out.len() as f64).sqrt();
            println!("npix = {} × {maps} maps", plan.grid().npix());
            println!("min = {lo:+.6e}  max = {hi:+.6e}  rms = {rms:.6e}");
            for m in [0, mmax / 2, mmax] {
                if let Ok(fl) = plan.legendre_flops(m, 0) {
                    println!("legendre flops(m={m}, even) = {fl}");
                }
            }
        }
    }
    Ok(())
}
