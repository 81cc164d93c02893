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

//! End to end checks against the real public API. The `TZ` variable
//! overrides whatever the host machine is actually configured with,
//! which keeps these hermetic without faking out /etc.

use ntest::timeout;
use std::env;

// One test rather than several: set_var is process wide, and the test
// harness runs tests in the same process concurrently.
#[test]
#[timeout(30000)]
fn query_honors_tz_var() {
    let cases = vec![
        ("America/New_York", "America/New_York"),
        (":Europe/Lisbon", "Europe/Lisbon"),
        ("/usr/share/zoneinfo/Asia/Tokyo", "Asia/Tokyo"),
    ];

    for (val, expected) in cases.into_iter() {
        // Safety: no other thread in this test binary touches the
        // environment
        unsafe { env::set_var("TZ", val) };
        let zone = tzwatch::current().unwrap();
        assert_eq!(zone.as_str(), expected, "TZ={val:?}");
    }
}

#[test]
#[timeout(30000)]
fn subscribe_cancel_roundtrip() {
    let mut sub = tzwatch::Subscription::subscribe().unwrap();
    assert!(sub.is_active());

    sub.cancel();
    assert!(!sub.is_active());

    // a second cancel is a no-op
    sub.cancel();
    assert!(!sub.is_active());
}
