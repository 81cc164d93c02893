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

/*! tzwatch reports the operating system's current timezone identifier
and streams a fresh identifier every time the system timezone changes.

The one-shot query reads the host's timezone state directly (the `TZ`
environment variable, the `/etc/localtime` symlink, or the Debian
`/etc/timezone` file). The subscription half installs kernel file
watches over those paths and re-queries whenever the filesystem
activity settles, so the stream always carries whatever the host
currently reports rather than anything parsed out of a raw event.

```no_run
# fn main() -> anyhow::Result<()> {
let zone = tzwatch::current()?;
println!("local timezone: {zone}");

let mut sub = tzwatch::Subscription::subscribe()?;
while let Ok(zone) = sub.changes().recv() {
    println!("timezone changed to {zone}");
}
sub.cancel();
# Ok(())
# }
```

tzwatch does not install a tracing subscriber; it only emits events
through the `tracing` facade. Embedders that want its logs should
install their own subscriber.
*/

mod consts;
mod timezone;
mod watcher;

pub use timezone::{QueryError, TimezoneId, current};
pub use watcher::{SubscribeError, Subscription};
