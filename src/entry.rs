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

//! The payload carried by every list node: a resident key/value pair plus
//! the bookkeeping the coordinator needs without re-hashing or re-deriving
//! anything from the list topology alone.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Segment {
    Window,
    Probation,
    Protected,
}

pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) keyh: u64,
    pub(crate) segment: Segment,
}
