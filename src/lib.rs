/*
 * Copyright 2021 Luca Fulchir <luker@fenrirproject.org>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! A fixed-capacity admission cache implementing W-TinyLFU: a small
//! Window-LRU absorbs new arrivals, a Segmented LRU (probation +
//! protected) holds the resident set, and a 4-bit Count-Min Sketch behind
//! a per-epoch Bloom doorkeeper decides whether a candidate evicted from
//! the window deserves to displace an established resident.
//!
//! # Single thread
//! This is designed for single-thread use only. There is no internal
//! synchronization: every `get`/`add`/`remove` call must be serialized by
//! the caller, and reads must be serialized against writes. The
//! recommended external composition is a single mutex wrapping every
//! entrypoint. Contributions are welcome for multithread support.
//!
//! # Admission, not just eviction
//! A plain LRU admits everything and evicts the coldest resident. This
//! cache instead makes every admission decision earn its place: a key
//! freshly evicted from the window must out-frequency the SLRU victim
//! (by Count-Min estimate) *and* have been seen at least once already
//! this epoch (by the doorkeeper) before it is allowed to displace
//! anyone. This keeps one-off scan traffic from flushing a working set
//! that is still hot.
//!
//! ```
//! use wtlfu_cache::Cache;
//!
//! let mut cache: Cache<&str, &str> = Cache::new(100, 10_000);
//! cache.add("hello", "world");
//! assert_eq!(cache.get(&"hello"), Some(&"world"));
//! ```
//!
//! Builder form, for callbacks and adaptive sizing:
//!
//! ```
//! use wtlfu_cache::CacheBuilder;
//!
//! let mut cache = CacheBuilder::new(100, 10_000)
//!     .on_evict(|k: &str, v: i32| println!("evicted {k}={v}"))
//!     .adaptive(false)
//!     .build();
//! cache.add("a", 1);
//! ```

mod cache;
mod doorkeeper;
mod entry;
mod error;
mod list;
mod sizer;
mod sketch;
mod slru;
mod window;

pub use cache::{Cache, CacheBuilder};
pub use error::Error;
