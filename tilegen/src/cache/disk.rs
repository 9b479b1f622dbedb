//! Disk cache with advisory locking and atomic publication.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use fs2::FileExt as _;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::warn;

use super::{Cache, CacheError, CacheKey, CacheResult};

/// How tile paths are laid out under the cache root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirScheme {
    /// `<layer>/<z>/xxx/xxx/yyy/yyy.ext` with x and y padded to six digits
    /// and split in half, keeping every directory reasonably narrow.
    #[default]
    Safe,
    /// `<layer>/<z>/<x>/<y>.ext`, mirroring the tile address.
    Portable,
    /// Microsoft-style quadkey path, three key digits per directory level.
    Quadtile,
}

const DEFAULT_GZIP_EXTENSIONS: &[&str] = &["txt", "text", "json", "xml"];
const DEFAULT_UMASK: u32 = 0o022;
const DEFAULT_STALE_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Caches tiles as files under a root directory.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    umask: u32,
    dirs: DirScheme,
    gzip: HashSet<String>,
    stale_lock_timeout: Duration,
    locks: Mutex<HashMap<PathBuf, File>>,
}

impl DiskCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            umask: DEFAULT_UMASK,
            dirs: DirScheme::default(),
            gzip: DEFAULT_GZIP_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            stale_lock_timeout: DEFAULT_STALE_LOCK_TIMEOUT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_umask(mut self, umask: u32) -> Self {
        self.umask = umask;
        self
    }

    #[must_use]
    pub fn with_dirs(mut self, dirs: DirScheme) -> Self {
        self.dirs = dirs;
        self
    }

    /// File extensions stored gzip-compressed with a trailing `.gz`.
    #[must_use]
    pub fn with_gzip(mut self, extensions: impl IntoIterator<Item = String>) -> Self {
        self.gzip = extensions
            .into_iter()
            .map(|e| e.to_ascii_lowercase())
            .collect();
        self
    }

    #[must_use]
    pub fn with_stale_lock_timeout(mut self, timeout: Duration) -> Self {
        self.stale_lock_timeout = timeout;
        self
    }

    fn is_compressed(&self, key: &CacheKey<'_>) -> bool {
        self.gzip.contains(key.format.file_ext())
    }

    /// Relative path of a tile under the cache root.
    fn tile_path(&self, key: &CacheKey<'_>) -> PathBuf {
        let mut ext = key.format.file_ext().to_string();
        if self.is_compressed(key) {
            ext.push_str(".gz");
        }
        let coord = key.coord;
        let mut path = PathBuf::from(key.layer);
        match self.dirs {
            DirScheme::Portable => {
                path.push(coord.z.to_string());
                path.push(coord.x.to_string());
                path.push(format!("{}.{ext}", coord.y));
            }
            DirScheme::Safe => {
                let x = format!("{:06}", coord.x);
                let y = format!("{:06}", coord.y);
                path.push(coord.z.to_string());
                path.push(&x[..3]);
                path.push(&x[3..]);
                path.push(&y[..3]);
                path.push(format!("{}.{ext}", &y[3..]));
            }
            DirScheme::Quadtile => {
                let quadkey = quadkey(coord);
                let parts: Vec<&str> = quadkey
                    .as_bytes()
                    .chunks(3)
                    .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
                    .collect();
                for part in &parts[..parts.len() - 1] {
                    path.push(part);
                }
                path.push(format!("{}.{ext}", parts[parts.len() - 1]));
            }
        }
        path
    }

    fn full_path(&self, key: &CacheKey<'_>) -> PathBuf {
        self.root.join(self.tile_path(key))
    }

    fn lock_path(&self, key: &CacheKey<'_>) -> PathBuf {
        let mut path = self.full_path(key).into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    /// Create missing parent directories, with permissions honoring the
    /// configured umask.
    fn create_parent_dirs(&self, path: &Path) -> CacheResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let mut missing = Vec::new();
        let mut cursor = parent.to_path_buf();
        while !cursor.exists() {
            missing.push(cursor.clone());
            if !cursor.pop() {
                break;
            }
        }
        fs::create_dir_all(parent).map_err(|e| CacheError::Io(e, parent.to_path_buf()))?;
        #[cfg(unix)]
        for dir in missing {
            use std::os::unix::fs::PermissionsExt as _;
            let permissions = fs::Permissions::from_mode(0o777 & !self.umask);
            if let Err(e) = fs::set_permissions(&dir, permissions) {
                warn!("Unable to set permissions on {}: {e}", dir.display());
            }
        }
        Ok(())
    }

    /// An abandoned lock must not block progress forever: once the lock
    /// file is older than the timeout it is removed so acquisition can
    /// retry. Liveness is judged by file age alone.
    fn break_stale_lock(&self, lock_path: &Path) -> CacheResult<bool> {
        let age = fs::metadata(lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok());
        if age.is_some_and(|age| age > self.stale_lock_timeout) {
            warn!("Breaking stale lock {}", lock_path.display());
            match fs::remove_file(lock_path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
                Err(e) => Err(CacheError::Io(e, lock_path.to_path_buf())),
            }
        } else {
            Ok(false)
        }
    }
}

impl Cache for DiskCache {
    fn lock(&self, key: &CacheKey<'_>) -> CacheResult<()> {
        let lock_path = self.lock_path(key);
        self.create_parent_dirs(&lock_path)?;
        loop {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)
                .map_err(|e| CacheError::Io(e, lock_path.clone()))?;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    self.locks
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(lock_path, file);
                    return Ok(());
                }
                Err(e)
                    if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
                {
                    if !self.break_stale_lock(&lock_path)? {
                        std::thread::sleep(LOCK_POLL_INTERVAL);
                    }
                }
                Err(e) => return Err(CacheError::Io(e, lock_path.clone())),
            }
        }
    }

    fn unlock(&self, key: &CacheKey<'_>) -> CacheResult<()> {
        let lock_path = self.lock_path(key);
        let file = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&lock_path);
        if let Some(file) = file {
            if let Err(e) = fs2::FileExt::unlock(&file) {
                warn!("Unable to release file lock {}: {e}", lock_path.display());
            }
            match fs::remove_file(&lock_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::Io(e, lock_path)),
            }
        }
        Ok(())
    }

    fn read(&self, key: &CacheKey<'_>) -> CacheResult<Option<Vec<u8>>> {
        let path = self.full_path(key);
        if self.is_compressed(key) {
            match File::open(&path) {
                Ok(file) => {
                    let mut body = Vec::new();
                    GzDecoder::new(file)
                        .read_to_end(&mut body)
                        .map_err(|e| CacheError::Io(e, path))?;
                    Ok(Some(body))
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(CacheError::Io(e, path)),
            }
        } else {
            match fs::read(&path) {
                Ok(body) => Ok(Some(body)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(CacheError::Io(e, path)),
            }
        }
    }

    fn save(&self, body: &[u8], key: &CacheKey<'_>) -> CacheResult<()> {
        let path = self.full_path(key);
        self.create_parent_dirs(&path)?;

        // write into a sibling temp file, publish with an atomic rename
        let mut tmp = NamedTempFile::new_in(&self.root)
            .map_err(|e| CacheError::Io(e, self.root.clone()))?;
        if self.is_compressed(key) {
            let mut encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
            encoder
                .write_all(body)
                .map_err(|e| CacheError::Io(e, path.clone()))?;
            encoder
                .try_finish()
                .map_err(|e| CacheError::Io(e, path.clone()))?;
        } else {
            tmp.write_all(body)
                .map_err(|e| CacheError::Io(e, path.clone()))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let permissions = fs::Permissions::from_mode(0o666 & !self.umask);
            tmp.as_file()
                .set_permissions(permissions)
                .map_err(|e| CacheError::Io(e, path.clone()))?;
        }

        match tmp.persist(&path) {
            Ok(_) => Ok(()),
            Err(persist_error) => {
                // a pre-existing destination can defeat rename on some
                // filesystems; unlink it and try once more
                let tmp = persist_error.file;
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::Io(e, path)),
                }
                tmp.persist(&path)
                    .map(|_| ())
                    .map_err(|e| CacheError::Io(e.error, path))
            }
        }
    }

    fn remove(&self, key: &CacheKey<'_>) -> CacheResult<()> {
        let path = self.full_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e, path)),
        }
    }
}

/// Quadkey of a tile: one digit per zoom level plus one, the row bit above
/// the column bit.
fn quadkey(coord: tilegen_tile_utils::TileCoord) -> String {
    let mut key = String::with_capacity(usize::from(coord.z) + 1);
    for i in (0..=u32::from(coord.z)).rev() {
        let x_bit = (coord.x >> i) & 1;
        let y_bit = (coord.y >> i) & 1;
        key.push(char::from(b'0' + u8::try_from((y_bit << 1) | x_bit).unwrap_or(0)));
    }
    key
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tilegen_tile_utils::{Format, TileCoord};

    use super::*;

    fn key(layer: &str, z: u8, x: u32, y: u32, format: Format) -> CacheKey<'_> {
        CacheKey {
            layer,
            coord: TileCoord::new_unchecked(z, x, y),
            format,
        }
    }

    #[rstest]
    #[case(1, 1, 0, "01")]
    #[case(2, 3, 1, "013")]
    #[case(0, 0, 0, "0")]
    #[case(3, 7, 7, "3333")]
    fn quadkey_interleaves_rows_over_columns(
        #[case] z: u8,
        #[case] x: u32,
        #[case] y: u32,
        #[case] expected: &str,
    ) {
        assert_eq!(quadkey(TileCoord::new_unchecked(z, x, y)), expected);
    }

    #[test]
    fn safe_paths_split_padded_coordinates() {
        let cache = DiskCache::new("/tmp/tiles");
        assert_eq!(
            cache.tile_path(&key("L", 12, 656, 1582, Format::Mvt)),
            PathBuf::from("L/12/000/656/001/582.mvt")
        );
    }

    #[test]
    fn portable_paths_mirror_the_tile_address() {
        let cache = DiskCache::new("/tmp/tiles").with_dirs(DirScheme::Portable);
        assert_eq!(
            cache.tile_path(&key("roads", 3, 6, 2, Format::Mvt)),
            PathBuf::from("roads/3/6/2.mvt")
        );
    }

    #[test]
    fn quadtile_paths_group_three_digits_per_directory() {
        let cache = DiskCache::new("/tmp/tiles").with_dirs(DirScheme::Quadtile);
        assert_eq!(
            cache.tile_path(&key("L", 2, 3, 1, Format::Mvt)),
            PathBuf::from("L/013.mvt")
        );
        assert_eq!(
            cache.tile_path(&key("L", 12, 656, 1582, Format::Mvt)),
            PathBuf::from("L/002/301/021/222/0.mvt")
        );
    }

    #[test]
    fn compressed_formats_get_a_gz_suffix() {
        let cache = DiskCache::new("/tmp/tiles").with_dirs(DirScheme::Portable);
        assert_eq!(
            cache.tile_path(&key("water", 1, 0, 0, Format::Json)),
            PathBuf::from("water/1/0/0.json.gz")
        );
        // topojson is not in the default compression set
        assert_eq!(
            cache.tile_path(&key("water", 1, 0, 0, Format::TopoJson)),
            PathBuf::from("water/1/0/0.topojson")
        );
    }

    #[test]
    fn save_read_remove_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(root.path());
        let key = key("earth", 2, 1, 3, Format::Mvt);

        assert_eq!(cache.read(&key).unwrap(), None);
        cache.save(b"tile-bytes", &key).unwrap();
        assert_eq!(cache.read(&key).unwrap().as_deref(), Some(&b"tile-bytes"[..]));
        cache.remove(&key).unwrap();
        assert_eq!(cache.read(&key).unwrap(), None);
        // removing an absent entry is fine
        cache.remove(&key).unwrap();
    }

    #[test]
    fn compressed_round_trip_is_transparent() {
        let root = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(root.path()).with_dirs(DirScheme::Portable);
        let key = key("water", 4, 5, 6, Format::Json);

        cache.save(b"{\"type\":\"FeatureCollection\",\"features\":[]}", &key).unwrap();
        // the stored file is gzip, the read is transparent
        let stored = root.path().join("water/4/5/6.json.gz");
        assert!(stored.exists());
        let raw = fs::read(&stored).unwrap();
        assert!(raw.starts_with(&[0x1f, 0x8b]));
        assert_eq!(
            cache.read(&key).unwrap().as_deref(),
            Some(&b"{\"type\":\"FeatureCollection\",\"features\":[]}"[..])
        );
    }

    #[test]
    fn save_overwrites_atomically() {
        let root = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(root.path());
        let key = key("earth", 0, 0, 0, Format::Mvt);

        cache.save(b"first", &key).unwrap();
        cache.save(b"second", &key).unwrap();
        assert_eq!(cache.read(&key).unwrap().as_deref(), Some(&b"second"[..]));
    }

    #[test]
    fn lock_then_unlock_removes_the_lock_file() {
        let root = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(root.path());
        let key = key("earth", 1, 0, 1, Format::Mvt);

        cache.lock(&key).unwrap();
        let lock_file = cache.lock_path(&key);
        assert!(lock_file.exists());
        cache.unlock(&key).unwrap();
        assert!(!lock_file.exists());
        // relocking after release works
        cache.lock(&key).unwrap();
        cache.unlock(&key).unwrap();
    }

    #[test]
    fn stale_locks_are_broken_after_the_timeout() {
        use fs2::FileExt as _;

        let root = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(root.path()).with_stale_lock_timeout(Duration::ZERO);
        let key = key("earth", 1, 1, 1, Format::Mvt);

        // an abandoned lock: the file is held, but it is older than the
        // timeout, so acquisition may break it
        let lock_file = cache.lock_path(&key);
        fs::create_dir_all(lock_file.parent().unwrap()).unwrap();
        let holder = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_file)
            .unwrap();
        holder.lock_exclusive().unwrap();

        cache.lock(&key).unwrap();
        cache.unlock(&key).unwrap();
        assert!(!lock_file.exists());
    }
}
