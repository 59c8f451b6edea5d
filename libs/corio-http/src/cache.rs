//! Bounded LRU mmap file cache, per spec.md §4.7.
//!
//! Capacity is fixed at construction; a single mutex guards both the
//! recency order and the path→entry index, matching the single-mutex
//! discipline `corio-runtime::scheduler::Queue` uses for its deque and
//! condvar. spec.md describes the recency order as a doubly-linked list;
//! we use a `VecDeque` instead, since the eviction list only ever needs
//! push-front/pop-back/remove-by-value and the cache's capacity is small
//! enough that an O(n) `remove` on touch is not a real cost (see
//! DESIGN.md).

use memmap2::Mmap;
use mime_guess::Mime;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use corio_error::{Error, HttpStatus, Result};

pub struct CacheEntry {
    mmap: Mmap,
    pub mime: Mime,
}

impl CacheEntry {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.mmap[..]
    }
}

struct State {
    /// Front = most recently used.
    order: VecDeque<PathBuf>,
    entries: HashMap<PathBuf, Arc<CacheEntry>>,
}

pub struct FileCache {
    capacity: usize,
    state: Mutex<State>,
}

impl FileCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                order: VecDeque::new(),
                entries: HashMap::new(),
            }),
        }
    }

    /// Fetch `path` from the cache, mmap-ing and inserting it on miss.
    /// Promotes to most-recently-used either way.
    pub fn get_or_insert(&self, path: &Path) -> Result<Arc<CacheEntry>> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.entries.get(path).cloned() {
                state.touch(path);
                return Ok(entry);
            }
        }

        let file = File::open(path).map_err(|_| Error::http(HttpStatus::NotFound))?;
        // Safety: the mapping is read-only and this process does not
        // truncate or otherwise race the underlying file while it is
        // mapped; a concurrent external truncation could still SIGBUS a
        // reader, which spec.md §9 accepts as an out-of-scope hazard of
        // mmap-based serving.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|_| Error::http(HttpStatus::InternalServerError))?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let entry = Arc::new(CacheEntry { mmap, mime });

        let mut state = self.state.lock().unwrap();
        state.insert(path.to_path_buf(), entry.clone(), self.capacity);
        Ok(entry)
    }
}

impl State {
    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            let path = self.order.remove(pos).unwrap();
            self.order.push_front(path);
        }
    }

    fn insert(&mut self, path: PathBuf, entry: Arc<CacheEntry>, capacity: usize) {
        if self.entries.contains_key(&path) {
            self.touch(&path);
            return;
        }
        while self.order.len() >= capacity {
            if let Some(lru) = self.order.pop_back() {
                self.entries.remove(&lru);
            } else {
                break;
            }
        }
        self.order.push_front(path.clone());
        self.entries.insert(path, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(name: &str, contents: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("corio-http-cache-test-{name}-{}", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn caches_and_evicts_lru() {
        let cache = FileCache::new(2);
        let a = write_tmp("a", b"aaaa");
        let b = write_tmp("b", b"bbbb");
        let c = write_tmp("c", b"cccc");

        cache.get_or_insert(&a).unwrap();
        cache.get_or_insert(&b).unwrap();
        // Touch `a` so `b` becomes the LRU entry.
        cache.get_or_insert(&a).unwrap();
        cache.get_or_insert(&c).unwrap();

        let state = cache.state.lock().unwrap();
        assert!(state.entries.contains_key(&a));
        assert!(state.entries.contains_key(&c));
        assert!(!state.entries.contains_key(&b));

        drop(state);
        let _ = std::fs::remove_file(a);
        let _ = std::fs::remove_file(b);
        let _ = std::fs::remove_file(c);
    }
}
