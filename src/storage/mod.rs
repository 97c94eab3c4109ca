// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Storage backend module
//
// Raw logs are the source of truth; caches only shorten restarts and can be
// rebuilt from the logs at any time.

pub mod backend;
pub mod filesystem;

pub use backend::{StorageBackend, StoredLog};
pub use filesystem::{cache_file_name, log_file_name, FilesystemBackend};
