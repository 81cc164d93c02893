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

/*! Live subscription to host timezone changes.

The host announces a timezone change by rewriting `/etc/localtime`,
typically an atomic rename of a fresh symlink over the old one, and on
Debian-family systems by rewriting `/etc/timezone` as well. A
[`Subscription`] installs kernel file watches over both paths, lets
each burst of filesystem activity settle, then re-queries the current
identifier and delivers it over a channel. The events themselves are
only ever treated as a change trigger; their payload is never parsed.
*/

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _, event::ModifyKind,
    recommended_watcher,
};
use tracing::{debug, error, instrument, warn};

use crate::{
    consts,
    timezone::{self, QueryError, TimezoneId},
};

/// Error raised when a subscription could not be established.
///
/// Nothing lingers after this error: either every watch was installed
/// and the worker thread started, or no registration exists at all.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("installing filesystem watches: {0}")]
    Watch(#[from] notify::Error),

    #[error("spawning the watcher thread: {0}")]
    Spawn(#[source] io::Error),
}

/// One active request for ongoing timezone change notifications.
///
/// A `Subscription` owns its host registration outright: the kernel
/// watches and the worker thread servicing them live exactly as long
/// as the subscription does, and independent subscriptions do not
/// share state. Dropping a subscription cancels it.
pub struct Subscription {
    /// For asking the worker to shut down.
    ctl_tx: Sender<Command>,

    /// Worker thread handle, present while the subscription is active.
    worker: Option<JoinHandle<()>>,

    /// Receiving half of the delivery channel.
    changes_rx: Receiver<TimezoneId>,

    /// For observing worker progress from tests.
    #[cfg(test)]
    debug_rx: Receiver<()>,
}

impl Subscription {
    /// Subscribes to timezone changes with the default debounce window.
    ///
    /// # Errors
    /// Returns [`SubscribeError`] if the kernel watches could not be
    /// installed or the worker thread could not be spawned.
    pub fn subscribe() -> Result<Self, SubscribeError> {
        Self::with_debounce(consts::DELIVER_DEBOUNCE)
    }

    /// Subscribes to timezone changes, collapsing filesystem activity
    /// within `debounce` of itself into a single delivery.
    pub fn with_debounce(debounce: Duration) -> Result<Self, SubscribeError> {
        let targets =
            vec![PathBuf::from(consts::LOCALTIME_PATH), PathBuf::from(consts::TIMEZONE_FILE_PATH)];
        Self::spawn(targets, timezone::current, debounce)
    }

    /// Installs watches over `targets` and starts the worker that
    /// turns settled filesystem activity into `query` results. The
    /// watches are armed synchronously, before this returns.
    fn spawn<Q>(targets: Vec<PathBuf>, query: Q, debounce: Duration) -> Result<Self, SubscribeError>
    where
        Q: FnMut() -> Result<TimezoneId, QueryError> + Send + 'static,
    {
        let (notify_tx, notify_rx) = unbounded();
        let (ctl_tx, ctl_rx) = unbounded();
        let (changes_tx, changes_rx) = unbounded();

        #[cfg(test)]
        let (debug_tx, debug_rx) = unbounded();

        let mut watcher = recommended_watcher(notify_tx)?;
        let mut paths = HashMap::with_capacity(targets.len());
        for target in targets {
            let armed = watch_nearest(&mut watcher, &target)?;
            paths.insert(target, armed);
        }

        let mut inner = Worker {
            debounce,
            deliver_deadline: None,
            query,
            changes_tx,
            watcher,
            notify_rx,
            ctl_rx,
            paths,
            #[cfg(test)]
            debug_tx,
        };
        let worker = thread::Builder::new()
            .name("tz-watcher".to_string())
            .spawn(move || {
                if let Err(err) = inner.run() {
                    error!("timezone watcher thread returned error: {:?}", err);
                }
            })
            .map_err(SubscribeError::Spawn)?;

        Ok(Self {
            ctl_tx,
            worker: Some(worker),
            changes_rx,
            #[cfg(test)]
            debug_rx,
        })
    }

    /// The delivery channel. Identifiers arrive in the order the host
    /// raised the underlying change notifications.
    pub fn changes(&self) -> &Receiver<TimezoneId> {
        &self.changes_rx
    }

    /// Cancels the subscription, deregistering the kernel watches.
    ///
    /// Blocks until the worker thread has exited, so once this returns
    /// no further identifier can arrive on [`Subscription::changes`],
    /// whatever the kernel raises afterwards. Values delivered before
    /// the cancel remain readable. Calling cancel again is a no-op.
    pub fn cancel(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Err(err) = self.ctl_tx.send(Command::Shutdown) {
            // worker already exited on its own
            debug!("watcher thread already gone: {:?}", err);
        }
        if worker.join().is_err() {
            warn!("timezone watcher thread panicked");
        }
    }

    /// True from subscribe until [`Subscription::cancel`] runs,
    /// explicitly or via drop.
    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Worker is idle and ready for the next event. Debug/test only.
    #[cfg(test)]
    fn worker_ready(&self) {
        self.debug_rx.recv().unwrap();
        debug!("worker ready");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Messages from a `Subscription` to its worker.
enum Command {
    Shutdown,
}

struct Worker<Q> {
    /// time to let filesystem activity settle before querying
    debounce: Duration,
    /// deadline for the pending delivery, if any
    deliver_deadline: Option<Instant>,

    /// re-reads the current timezone identifier
    query: Q,
    /// sending half of the delivery channel
    changes_tx: Sender<TimezoneId>,

    /// underlying notify-rs watcher
    watcher: RecommendedWatcher,
    /// raw filesystem events
    notify_rx: Receiver<notify::Result<Event>>,
    /// shutdown requests from the owning `Subscription`
    ctl_rx: Receiver<Command>,

    /// target path -> (watched ancestor, first component beneath it)
    paths: HashMap<PathBuf, (PathBuf, PathBuf)>,

    /// for sending out debug info
    #[cfg(test)]
    debug_tx: Sender<()>,
}

/// Outcomes of selecting channels in the worker thread
enum Outcome {
    /// A notify event occurred
    Event(notify::Result<Event>),
    /// The debounce window closed, time to query and deliver
    Deadline,
    /// Explicit shutdown, or any channel disconnected
    Shutdown,
}

impl<Q> Worker<Q> {
    /// get the next event to work on
    fn select(&self) -> Outcome {
        // only impose a deadline if a delivery is pending
        let deadline = self
            .deliver_deadline
            .map(crossbeam_channel::at)
            .unwrap_or_else(crossbeam_channel::never);

        #[cfg(test)]
        {
            // drain anything already actionable first so the debug_tx
            // send below really means "about to block"
            if let Ok(res) = self.notify_rx.try_recv() {
                return Outcome::Event(res);
            }
            if self.ctl_rx.try_recv().is_ok() {
                return Outcome::Shutdown;
            }
            if deadline.try_recv().is_ok() {
                return Outcome::Deadline;
            }
            self.debug_tx.send(()).unwrap();
        }

        select! {
            recv(self.notify_rx) -> res => res.map(Outcome::Event).unwrap_or(Outcome::Shutdown),
            recv(self.ctl_rx) -> res => res.map(|Command::Shutdown| Outcome::Shutdown).unwrap_or(Outcome::Shutdown),
            recv(deadline) -> _ => Outcome::Deadline,
        }
    }

    /// Schedule a delivery for when the debounce window closes. An
    /// already pending deadline is kept, so a burst of events becomes
    /// one delivery.
    fn schedule_delivery(&mut self) {
        self.deliver_deadline =
            self.deliver_deadline.or_else(|| Some(Instant::now() + self.debounce));
        debug!("delivery due at {:?}", self.deliver_deadline);
    }

    /// Re-installs the watches named by `rearm`. Returns whether any
    /// target ended up directly watched again, which counts as a
    /// change: the usual `timedatectl` sequence renames a fresh
    /// symlink over `/etc/localtime`, and the watch has to chase the
    /// new inode.
    fn rearm(&mut self, rearm: Rearm) -> bool {
        let targets: Vec<PathBuf> = match rearm {
            Rearm::Paths(targets) => targets,
            Rearm::All => self.paths.keys().cloned().collect(),
        };
        let mut deliver = false;
        for target in targets {
            if let Some((watched, _)) = self.paths.get(&target) {
                if let Err(err) = self.watcher.unwatch(watched) {
                    // expected when the watched inode was removed, the
                    // kernel drops such watches on its own
                    debug!("unwatch {}: {:?}", watched.display(), err);
                }
            }
            match watch_nearest(&mut self.watcher, &target) {
                Ok(armed) => {
                    deliver |= armed.0 == target;
                    self.paths.insert(target, armed);
                }
                Err(err) => {
                    error!("re-arming watch on {}: {:?}", target.display(), err);
                    // don't lose the change we did see
                    deliver = true;
                }
            }
        }
        deliver
    }
}

impl<Q> Worker<Q>
where
    Q: FnMut() -> Result<TimezoneId, QueryError>,
{
    /// Event loop. Only returns once a shutdown is requested or the
    /// subscriber goes away.
    #[instrument(skip_all)]
    fn run(&mut self) -> Result<()> {
        loop {
            match self.select() {
                Outcome::Event(res) => {
                    debug!("event: {:?}", res);
                    let (rearm, mut deliver) = match res {
                        Err(err) => {
                            error!("notify error: {:?}", err);
                            (Rearm::All, false)
                        }
                        Ok(event) => classify_event(event, &self.paths),
                    };
                    deliver |= self.rearm(rearm);
                    if deliver {
                        self.schedule_delivery();
                    }
                }
                Outcome::Deadline => {
                    self.deliver_deadline = None;
                    if !self.deliver() {
                        break;
                    }
                }
                Outcome::Shutdown => {
                    debug!("stopping timezone watcher thread");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Queries the current timezone and pushes it to the subscriber.
    /// Returns false once the subscriber is gone.
    fn deliver(&mut self) -> bool {
        match (self.query)() {
            Ok(zone) => {
                debug!("delivering {}", zone);
                self.changes_tx.send(zone).is_ok()
            }
            Err(err) => {
                // The change itself still happened, we just could not
                // read the resulting identifier. This delivery is
                // dropped; the next change queries afresh.
                warn!("timezone query failed during change delivery: {:?}", err);
                true
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Rearm {
    /// re-install the watches for these targets
    Paths(Vec<PathBuf>),
    /// notify lost track of the world, re-install everything
    All,
}

/// Decides which watches need re-arming and whether the event means
/// the timezone may have changed.
fn classify_event(event: Event, paths: &HashMap<PathBuf, (PathBuf, PathBuf)>) -> (Rearm, bool) {
    if event.need_rescan() {
        debug!("rescan requested");
        return (Rearm::All, true);
    }

    // the event names one of the target files directly
    let names_target = event.paths.iter().any(|p| paths.contains_key(p));

    match event.kind {
        // a path component appeared, vanished, or was renamed over
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            let stale = paths
                .iter()
                .filter(|(_, (watched, step))| {
                    event.paths.iter().any(|p| p == watched || p == step)
                })
                .map(|(target, _)| target.to_owned())
                .collect();
            (Rearm::Paths(stale), names_target)
        }
        EventKind::Modify(_) => (Rearm::Paths(vec![]), names_target),
        _ => {
            debug!("ignoring {:?}", event);
            (Rearm::Paths(vec![]), false)
        }
    }
}

/// Walks up from `target` until a path accepts a watch. Returns the
/// watched ancestor and the component of `target` directly beneath it,
/// which is the path create/remove/rename events will name when the
/// target springs into existence. When `target` itself exists both
/// returned paths are the target.
fn watch_nearest(
    watcher: &mut RecommendedWatcher,
    target: &Path,
) -> Result<(PathBuf, PathBuf), notify::Error> {
    let mut last_err = None;
    for ancestor in target.ancestors() {
        match watcher.watch(ancestor, RecursiveMode::NonRecursive) {
            Ok(()) => {
                let rest =
                    target.strip_prefix(ancestor).expect("ancestor is a prefix of target");
                let step = ancestor.join(rest.iter().next().unwrap_or_default());
                debug!("armed watch on {} (step {})", ancestor.display(), step.display());
                return Ok((ancestor.to_owned(), step));
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| notify::Error::generic("no watchable ancestor")))
}
