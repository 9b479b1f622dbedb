//! Cross-thread behavior of the disk cache: mutual exclusion around a
//! render and atomic publication of saved tiles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tilegen::cache::{Cache, CacheKey, DiskCache};
use tilegen_tile_utils::{Format, TileCoord};

#[test]
fn only_one_contender_renders_a_cold_tile() {
    let root = tempfile::tempdir().unwrap();
    let cache = Arc::new(DiskCache::new(root.path()));
    let renders = Arc::new(AtomicUsize::new(0));
    let coord = TileCoord::new_unchecked(3, 1, 2);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let cache = Arc::clone(&cache);
        let renders = Arc::clone(&renders);
        handles.push(thread::spawn(move || {
            let key = CacheKey {
                layer: "earth",
                coord,
                format: Format::Mvt,
            };
            cache.lock(&key).unwrap();
            let body = match cache.read(&key).unwrap() {
                Some(body) => body,
                None => {
                    renders.fetch_add(1, Ordering::SeqCst);
                    // pretend the render takes a while
                    thread::sleep(Duration::from_millis(50));
                    let body = b"rendered-tile".to_vec();
                    cache.save(&body, &key).unwrap();
                    body
                }
            };
            cache.unlock(&key).unwrap();
            body
        }));
    }

    let bodies: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(renders.load(Ordering::SeqCst), 1);
    assert!(bodies.iter().all(|body| body == b"rendered-tile"));
}

#[test]
fn distinct_keys_do_not_contend() {
    let root = tempfile::tempdir().unwrap();
    let cache = Arc::new(DiskCache::new(root.path()));

    let mut handles = Vec::new();
    for x in 0..4_u32 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            let coord = TileCoord::new_unchecked(4, x, 0);
            let key = CacheKey {
                layer: "earth",
                coord,
                format: Format::Mvt,
            };
            cache.lock(&key).unwrap();
            cache.save(format!("tile-{x}").as_bytes(), &key).unwrap();
            cache.unlock(&key).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for x in 0..4_u32 {
        let key = CacheKey {
            layer: "earth",
            coord: TileCoord::new_unchecked(4, x, 0),
            format: Format::Mvt,
        };
        assert_eq!(
            cache.read(&key).unwrap(),
            Some(format!("tile-{x}").into_bytes())
        );
    }
}

#[test]
fn readers_never_observe_partial_writes() {
    let root = tempfile::tempdir().unwrap();
    let cache = Arc::new(DiskCache::new(root.path()));
    let key = CacheKey {
        layer: "earth",
        coord: TileCoord::new_unchecked(5, 9, 9),
        format: Format::Mvt,
    };

    let first = vec![b'a'; 64 * 1024];
    let second = vec![b'b'; 128 * 1024];
    cache.save(&first, &key).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let cache = Arc::clone(&cache);
        let done = Arc::clone(&done);
        let (first, second) = (first.clone(), second.clone());
        thread::spawn(move || {
            for _ in 0..20 {
                cache.save(&second, &key).unwrap();
                cache.save(&first, &key).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    while !done.load(Ordering::SeqCst) {
        let body = cache.read(&key).unwrap().expect("entry must exist");
        // each observation is one complete version, never a mix
        assert!(body == first || body == second, "partial write observed");
    }
    writer.join().unwrap();
}
