// crates/bfsht-resource/src/file.rs

//! Read-only loader over a memory-mapped resource file.

use std::fs::File;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::error::ResourceError;

const HEADER_LEN: usize = 24;

/// A mapped resource file with its parsed header and blob table.
///
/// Blob slices borrow from the mapping; entries registered with offset 0 are
/// absent (debug/benchmark files) and surface as `None`.
#[derive(Debug)]
pub struct ResourceFile {
    path: PathBuf,
    map: Mmap,
    lmax: usize,
    mmax: usize,
    nside: usize,
    /// `(offset, len)` per `2·m + odd`; `None` when absent.
    table: Vec<Option<(usize, usize)>>,
}

impl ResourceFile {
    /// Map `path` and validate its header and blob table.
    ///
    /// # Errors
    ///
    /// I/O failures, truncation, implausible header fields, or table entries
    /// that fall outside the file or off 16-byte alignment.
    pub fn open(path: &Path) -> Result<Self, ResourceError> {
        let file = File::open(path).map_err(|source| ResourceError::Open {
            path: path.to_owned(),
            source,
        })?;
        // SAFETY: the mapping is read-only and private to this process;
        // resource files are treated as immutable while in use.
        let map = unsafe { Mmap::map(&file) }.map_err(|source| ResourceError::Map {
            path: path.to_owned(),
            source,
        })?;

        let header = |at: usize, field: &'static str| -> Result<usize, ResourceError> {
            let bytes: [u8; 8] = map
                .get(at..at + 8)
                .ok_or_else(|| ResourceError::Truncated {
                    path: path.to_owned(),
                })?
                .try_into()
                .expect("slice length is 8");
            let v = i64::from_le_bytes(bytes);
            usize::try_from(v).map_err(|_| ResourceError::BadHeader {
                path: path.to_owned(),
                field,
                value: v,
            })
        };
        let lmax = header(0, "lmax")?;
        let mmax = header(8, "mmax")?;
        let nside = header(16, "Nside")?;
        if nside == 0 || mmax > lmax {
            return Err(ResourceError::BadHeader {
                path: path.to_owned(),
                field: if nside == 0 { "Nside" } else { "mmax" },
                value: if nside == 0 { 0 } else { mmax as i64 },
            });
        }

        let table_len = 4 * (mmax + 1);
        let table_end = HEADER_LEN + 8 * table_len;
        if map.len() < table_end {
            return Err(ResourceError::Truncated {
                path: path.to_owned(),
            });
        }
        let mut table = Vec::with_capacity(2 * (mmax + 1));
        for m in 0..=mmax {
            for odd in 0..2 {
                let at = HEADER_LEN + 8 * (4 * m + 2 * odd);
                let off = i64::from_le_bytes(map[at..at + 8].try_into().expect("8 bytes"));
                let len = i64::from_le_bytes(map[at + 8..at + 16].try_into().expect("8 bytes"));
                if off == 0 {
                    table.push(None);
                    continue;
                }
                let (off, len) = match (usize::try_from(off), usize::try_from(len)) {
                    (Ok(o), Ok(l)) => (o, l),
                    _ => {
                        return Err(ResourceError::BadTable {
                            path: path.to_owned(),
                            m,
                            odd,
                        })
                    }
                };
                let in_bounds = off
                    .checked_add(len)
                    .is_some_and(|end| end <= map.len());
                if off % 16 != 0 || !in_bounds {
                    return Err(ResourceError::BadTable {
                        path: path.to_owned(),
                        m,
                        odd,
                    });
                }
                table.push(Some((off, len)));
            }
        }

        debug!(
            path = %path.display(),
            lmax, mmax, nside,
            bytes = map.len(),
            "mapped resource file"
        );
        Ok(Self {
            path: path.to_owned(),
            map,
            lmax,
            mmax,
            nside,
            table,
        })
    }

    /// File this mapping came from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum degree of the stored matrices.
    #[inline]
    #[must_use]
    pub fn lmax(&self) -> usize {
        self.lmax
    }

    /// Maximum order of the stored matrices.
    #[inline]
    #[must_use]
    pub fn mmax(&self) -> usize {
        self.mmax
    }

    /// Grid resolution the matrices were computed for.
    #[inline]
    #[must_use]
    pub fn nside(&self) -> usize {
        self.nside
    }

    /// Borrow the blob for `(m, odd)`; `None` when the entry is absent.
    ///
    /// # Panics
    ///
    /// Panics when `m > mmax` or `odd > 1` (caller-side index error, not file
    /// corruption).
    #[must_use]
    pub fn blob(&self, m: usize, odd: usize) -> Option<&[u8]> {
        assert!(m <= self.mmax && odd < 2, "blob index out of range");
        self.table[2 * m + odd].map(|(off, len)| &self.map[off..off + len])
    }
}

/// Read only the 24-byte header of a resource file.
///
/// Returns `(Nside, lmax)`.
///
/// # Errors
///
/// Open/read failures or a short file.
pub fn query_resourcefile(path: &Path) -> Result<(usize, usize), ResourceError> {
    let mut f = File::open(path).map_err(|source| ResourceError::Open {
        path: path.to_owned(),
        source,
    })?;
    let mut header = [0u8; HEADER_LEN];
    f.read_exact(&mut header)
        .map_err(|_| ResourceError::Truncated {
            path: path.to_owned(),
        })?;
    let lmax = i64::from_le_bytes(header[0..8].try_into().expect("8 bytes"));
    let nside = i64::from_le_bytes(header[16..24].try_into().expect("8 bytes"));
    match (usize::try_from(nside), usize::try_from(lmax)) {
        (Ok(n), Ok(l)) => Ok((n, l)),
        _ => Err(ResourceError::BadHeader {
            path: path.to_owned(),
            field: "header",
            value: -1,
        }),
    }
}
