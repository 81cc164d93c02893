// Copyright 2025 Google LLC
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

use std::time;

// The symlink most Unixes point at the active zoneinfo entry.
pub const LOCALTIME_PATH: &str = "/etc/localtime";

// Debian-family plain text timezone name, kept in sync with the
// localtime symlink by the distro tooling.
pub const TIMEZONE_FILE_PATH: &str = "/etc/timezone";

// Sub-databases inside zoneinfo that are not part of the zone name.
pub const ZONEINFO_SUB_DBS: [&str; 2] = ["posix/", "right/"];

// How long to let filesystem activity settle before re-reading the
// timezone. A `timedatectl` run touches several paths back to back and
// should come out as a single delivery.
pub const DELIVER_DEBOUNCE: time::Duration = time::Duration::from_millis(100);
