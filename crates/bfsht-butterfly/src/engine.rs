// crates/bfsht-butterfly/src/engine.rs

//! Recursive traversal of the block tree: `query` sizes a blob, and
//! `apply_transpose` streams `Aᵀ · x` into an output slab.
//!
//! Vector-block convention: a slab of `r` rows over `nvecs` vectors stores
//! row `i` contiguously at `i * nvecs` (equivalently, a column-major
//! `nvecs × r` matrix). The engine's output slab has one row per matrix
//! column; a `butterfly` node assembles its column range `[0, cols)` as
//!
//! ```text
//! out[0 .. n_L)      = S_Lᵀ · w_L      w_L = child_Lᵀ · x   (k_L rows)
//! out[n_L .. cols)   = S_Rᵀ · w_R      w_R = child_Rᵀ · x   (k_R rows)
//! ```
//!
//! where `S` is the stored interpolation operator (identity rows on the
//! filter's 0-bits, a dense `k × (n − k)` mix on its 1-bits). Children write
//! into a per-level slice of the scratch arena, so recursion depth times the
//! widest node bounds the arena exactly.

use crate::cursor::Cursor;
use crate::error::BfmError;

/// Block type tag: output range is all zeros, no payload.
pub const TYPE_ZERO: i32 = 0;
/// Block type tag: leaf; payload is interpreted by the leaf kernel.
pub const TYPE_DENSE: i32 = 1;
/// Block type tag: reserved (`hstack`), rejected at this format version.
pub const TYPE_HSTACK: i32 = 2;
/// Block type tag: interior butterfly node.
pub const TYPE_BUTTERFLY: i32 = 3;

/// Dimensions of the matrix a blob describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatrixShape {
    /// Input rows (coefficient entries).
    pub rows: usize,
    /// Output columns (sample points).
    pub cols: usize,
}

/// Sizing information from a [`query`] walk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryInfo {
    /// Widest butterfly node (`k_L + k_R`) anywhere in the tree.
    pub k_max: usize,
    /// Deepest nesting of butterfly nodes (scratch levels needed).
    pub nblocks_max: usize,
    /// Stored matrix elements (dense leaves + interpolation matrices);
    /// `2 · element_count · nvecs` is the per-apply FLOP count.
    pub element_count: u64,
}

/// Leaf application: parse the payload at `cur` and write all
/// `out.len() / nvecs` columns of the output slab.
///
/// `nk` is the row count of the leaf's input context; the payload may narrow
/// it further (the Legendre leaf does). Implementations must leave `cur`
/// positioned directly after their payload so sibling blocks parse correctly.
pub trait LeafKernel {
    /// Apply one leaf.
    ///
    /// # Errors
    ///
    /// Corruption found while parsing the payload.
    fn apply(
        &mut self,
        out: &mut [f64],
        cur: &mut Cursor<'_>,
        nk: usize,
        nvecs: usize,
    ) -> Result<(), BfmError>;
}

/// Scoped throttle around the bandwidth-heaviest step (leaf application).
///
/// The planner hands workers a node-level semaphore plus a per-CPU lock
/// through this seam; tests and single-threaded callers use [`NoThrottle`].
pub trait StreamThrottle {
    /// Run `f` while holding whatever permits the throttle represents.
    fn with<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// Throttle that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoThrottle;

impl StreamThrottle for NoThrottle {
    #[inline]
    fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// Caller-owned scratch arena for one traversal.
///
/// Sized once from a [`QueryInfo`] (worst case over all blobs a worker will
/// touch); no allocation happens inside `apply_transpose`.
#[derive(Debug)]
pub struct BfmPlan {
    arena: Vec<f64>,
    level_len: usize,
}

impl BfmPlan {
    /// Arena for blobs bounded by `info`, applied over `nvecs` vectors.
    #[must_use]
    pub fn new(info: &QueryInfo, nvecs: usize) -> Self {
        let level_len = info.k_max * nvecs;
        Self {
            arena: vec![0.0; level_len * info.nblocks_max],
            level_len,
        }
    }

    /// Arena sized explicitly (tests).
    #[must_use]
    pub fn with_levels(k_max: usize, nlevels: usize, nvecs: usize) -> Self {
        Self::new(
            &QueryInfo {
                k_max,
                nblocks_max: nlevels,
                element_count: 0,
            },
            nvecs,
        )
    }
}

/// Walk `blob` and report scratch sizing plus the stored element count.
///
/// `leaf_measure(cur, nk, ncols)` parses one leaf payload (advancing the
/// cursor past it) and returns its element count.
///
/// # Errors
///
/// Any corruption the walk uncovers.
pub fn query<F>(blob: &[u8], shape: MatrixShape, mut leaf_measure: F) -> Result<QueryInfo, BfmError>
where
    F: FnMut(&mut Cursor<'_>, usize, usize) -> Result<u64, BfmError>,
{
    let mut cur = Cursor::new(blob)?;
    let mut info = QueryInfo::default();
    query_node(
        &mut cur,
        shape.rows,
        shape.cols,
        1,
        &mut info,
        &mut leaf_measure,
    )?;
    Ok(info)
}

fn query_node<F>(
    cur: &mut Cursor<'_>,
    rows: usize,
    cols: usize,
    depth: usize,
    info: &mut QueryInfo,
    leaf_measure: &mut F,
) -> Result<(), BfmError>
where
    F: FnMut(&mut Cursor<'_>, usize, usize) -> Result<u64, BfmError>,
{
    if !cur.is_aligned16() {
        return Err(BfmError::Misaligned);
    }
    match cur.read_i32()? {
        TYPE_ZERO => Ok(()),
        TYPE_DENSE => {
            info.element_count += leaf_measure(cur, rows, cols)?;
            Ok(())
        }
        TYPE_HSTACK => Err(BfmError::ReservedHstack),
        TYPE_BUTTERFLY => {
            let node = ButterflyHeader::parse(cur, cols)?;
            let (_, dl) = parse_interpolation(cur, node.k_l, node.n_l)?;
            let (_, dr) = parse_interpolation(cur, node.k_r, node.n_r)?;
            info.element_count += (dl.len() + dr.len()) as u64;
            info.k_max = info.k_max.max(node.k_l + node.k_r);
            info.nblocks_max = info.nblocks_max.max(depth);
            cur.align16();
            query_node(cur, rows, node.k_l, depth + 1, info, leaf_measure)?;
            cur.align16();
            query_node(cur, rows, node.k_r, depth + 1, info, leaf_measure)
        }
        t => Err(BfmError::UnknownType(t)),
    }
}

/// Compute `out = Aᵀ · x` for the matrix described by `blob`.
///
/// `out` must hold `shape.cols * nvecs` doubles; the input block `x` lives
/// inside `kernel`, which is invoked at every leaf.
///
/// # Errors
///
/// Corruption in the blob, or a leaf kernel failure.
pub fn apply_transpose<K, T>(
    blob: &[u8],
    shape: MatrixShape,
    kernel: &mut K,
    out: &mut [f64],
    nvecs: usize,
    plan: &mut BfmPlan,
    throttle: &T,
) -> Result<(), BfmError>
where
    K: LeafKernel,
    T: StreamThrottle,
{
    if out.len() != shape.cols * nvecs {
        return Err(BfmError::Dimensions("output slab does not match shape"));
    }
    let mut cur = Cursor::new(blob)?;
    let level_len = plan.level_len;
    apply_node(
        &mut cur,
        shape.rows,
        shape.cols,
        out,
        nvecs,
        kernel,
        &mut plan.arena,
        level_len,
        throttle,
    )
}

#[allow(clippy::too_many_arguments)]
fn apply_node<K, T>(
    cur: &mut Cursor<'_>,
    rows: usize,
    cols: usize,
    out: &mut [f64],
    nvecs: usize,
    kernel: &mut K,
    arena: &mut [f64],
    level_len: usize,
    throttle: &T,
) -> Result<(), BfmError>
where
    K: LeafKernel,
    T: StreamThrottle,
{
    debug_assert_eq!(out.len(), cols * nvecs);
    if !cur.is_aligned16() {
        return Err(BfmError::Misaligned);
    }
    match cur.read_i32()? {
        TYPE_ZERO => {
            out.fill(0.0);
            Ok(())
        }
        TYPE_DENSE => throttle.with(|| kernel.apply(out, cur, rows, nvecs)),
        TYPE_HSTACK => Err(BfmError::ReservedHstack),
        TYPE_BUTTERFLY => {
            let node = ButterflyHeader::parse(cur, cols)?;
            let (fl, dl) = parse_interpolation(cur, node.k_l, node.n_l)?;
            let (fr, dr) = parse_interpolation(cur, node.k_r, node.n_r)?;

            let need = (node.k_l + node.k_r) * nvecs;
            if need > level_len {
                return Err(BfmError::Dimensions("node wider than scratch level"));
            }
            if arena.len() < level_len {
                return Err(BfmError::Dimensions("tree deeper than scratch arena"));
            }
            let (level, rest) = arena.split_at_mut(level_len);
            let (w_l, tail) = level.split_at_mut(node.k_l * nvecs);
            let w_r = &mut tail[..node.k_r * nvecs];

            cur.align16();
            apply_node(cur, rows, node.k_l, w_l, nvecs, kernel, rest, level_len, throttle)?;
            cur.align16();
            apply_node(cur, rows, node.k_r, w_r, nvecs, kernel, rest, level_len, throttle)?;

            let (out_l, out_r) = out.split_at_mut(node.n_l * nvecs);
            expand_interpolation(fl, dl, node.k_l, w_l, out_l, nvecs);
            expand_interpolation(fr, dr, node.k_r, w_r, out_r, nvecs);
            Ok(())
        }
        t => Err(BfmError::UnknownType(t)),
    }
}

/// Parsed butterfly node header: `{k_L, n_L, k_R}` as little-endian `i32`
/// directly after the type tag, 16 bytes in total.
struct ButterflyHeader {
    k_l: usize,
    n_l: usize,
    k_r: usize,
    n_r: usize,
}

impl ButterflyHeader {
    fn parse(cur: &mut Cursor<'_>, cols: usize) -> Result<Self, BfmError> {
        let k_l = read_dim(cur)?;
        let n_l = read_dim(cur)?;
        let k_r = read_dim(cur)?;
        if n_l == 0 || n_l >= cols {
            return Err(BfmError::Dimensions("n_L outside (0, cols)"));
        }
        let n_r = cols - n_l;
        if k_l == 0 || k_l > n_l || k_r == 0 || k_r > n_r {
            return Err(BfmError::Dimensions("child width outside (0, n]"));
        }
        Ok(Self { k_l, n_l, k_r, n_r })
    }
}

/// Parse one interpolation operator: a 0/1 filter of length `n` with exactly
/// `k` zeros, then the padded dense `k × (n − k)` matrix in column-major
/// order.
fn parse_interpolation<'a>(
    cur: &mut Cursor<'a>,
    k: usize,
    n: usize,
) -> Result<(&'a [u8], &'a [f64]), BfmError> {
    let filter = cur.read_bytes(n)?;
    let mut zeros = 0usize;
    for &b in filter {
        match b {
            0 => zeros += 1,
            1 => {}
            other => return Err(BfmError::FilterByte(other)),
        }
    }
    if zeros != k {
        return Err(BfmError::Dimensions("filter zero count differs from k"));
    }
    let dense = cur.read_f64s(k * (n - k))?;
    Ok((filter, dense))
}

fn read_dim(cur: &mut Cursor<'_>) -> Result<usize, BfmError> {
    let v = cur.read_i32()?;
    usize::try_from(v).map_err(|_| BfmError::Dimensions("negative node dimension"))
}

/// `out = Sᵀ · w` for one interpolation operator.
///
/// Row `i` of `out` is `w[z_i]` on a 0-bit (the `z_i`-th zero so far) and the
/// dot of dense column `o_i` with `w` on a 1-bit (the `o_i`-th one so far).
fn expand_interpolation(
    filter: &[u8],
    dense: &[f64],
    k: usize,
    w: &[f64],
    out: &mut [f64],
    nvecs: usize,
) {
    debug_assert_eq!(out.len(), filter.len() * nvecs);
    let mut id = 0usize;
    let mut mix = 0usize;
    for (i, &bit) in filter.iter().enumerate() {
        let dst = &mut out[i * nvecs..(i + 1) * nvecs];
        if bit == 0 {
            dst.copy_from_slice(&w[id * nvecs..(id + 1) * nvecs]);
            id += 1;
        } else {
            let col = &dense[mix * k..(mix + 1) * k];
            for (v, d) in dst.iter_mut().enumerate() {
                let mut acc = 0.0;
                for (r, &c) in col.iter().enumerate() {
                    acc += c * w[r * nvecs + v];
                }
                *d = acc;
            }
            mix += 1;
        }
    }
    debug_assert_eq!(id, k);
    debug_assert_eq!(mix, filter.len() - k);
}
