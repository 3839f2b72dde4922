//! URL-to-file resolution and the mapped response body.
//!
//! A successful `GET` resolves to a read-only, private memory mapping of
//! the whole target file. The mapping lives exactly as long as one
//! response; [`FileMap`] unmaps on drop.

use crate::{http::types::HttpCode, limits::MAX_PATH_LEN};
use std::{
    fs::File,
    os::{fd::AsRawFd, unix::fs::MetadataExt},
    path::{Component, Path},
    ptr, slice,
};
use tracing::trace;

/// A read-only `MAP_PRIVATE` mapping of a regular file.
///
/// Zero-length files are represented without a mapping (`mmap` rejects
/// empty ranges); they serve as a header-only response.
#[derive(Debug)]
pub(crate) struct FileMap {
    base: *mut libc::c_void,
    len: usize,
}

// The mapping is immutable after creation and unmapped exactly once, so a
// handle may travel between the I/O thread and a worker.
unsafe impl Send for FileMap {}

impl FileMap {
    fn map(file: &File, len: usize) -> Option<Self> {
        if len == 0 {
            return Some(Self {
                base: ptr::null_mut(),
                len: 0,
            });
        }

        // Safety: len is non-zero and the fd is open for reading; the fd
        // may be closed right after, the mapping stays valid.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return None;
        }
        Some(Self { base, len })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        if self.base.is_null() {
            return &[];
        }
        // Safety: base/len describe a live PROT_READ mapping owned by self.
        unsafe { slice::from_raw_parts(self.base as *const u8, self.len) }
    }
}

impl Drop for FileMap {
    fn drop(&mut self) {
        if !self.base.is_null() {
            // Safety: base/len came from a successful mmap and are unmapped
            // exactly once.
            unsafe {
                libc::munmap(self.base, self.len);
            }
        }
    }
}

/// Resolves `url_path` under `doc_root` and maps the target.
///
/// Outcomes follow the response table: missing file is `NoResource`,
/// missing world-read is `ForbiddenRequest`, and directories, unopenable
/// files, failed mappings, traversal attempts, or over-long paths are all
/// `BadRequest`.
pub(crate) fn resolve(doc_root: &Path, url_path: &str) -> Result<FileMap, HttpCode> {
    // `..` segments could alias files outside doc_root; reject instead of
    // resolving them.
    if Path::new(url_path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(HttpCode::BadRequest);
    }

    let full = doc_root.join(url_path.trim_start_matches('/'));
    if full.as_os_str().len() > MAX_PATH_LEN {
        return Err(HttpCode::BadRequest);
    }

    let meta = match std::fs::metadata(&full) {
        Ok(meta) => meta,
        Err(_) => return Err(HttpCode::NoResource),
    };
    if meta.mode() & libc::S_IROTH == 0 {
        return Err(HttpCode::ForbiddenRequest);
    }
    if meta.is_dir() {
        return Err(HttpCode::BadRequest);
    }

    let file = File::open(&full).map_err(|_| HttpCode::BadRequest)?;
    let map = FileMap::map(&file, meta.len() as usize).ok_or(HttpCode::BadRequest)?;
    trace!(path = %full.display(), size = map.len(), "mapped file");
    Ok(map)
}
