// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Named event channels and the device readiness barrier.
//
// A channel latches `fired` on its first fire and caches the arguments, so a
// `subscribe_once` arriving later runs immediately.  Every subscriber runs on
// every fire in registration order; a subscriber returning `false` only marks
// the fire as failed.  A one-shot channel (`deviceReady`) ignores every fire
// after the first.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use callbridge_core::error::panic_message;

/// Fired once the page's DOM is loaded.
pub const DOM_READY: &str = "domReady";
/// Fired by the host once native code can accept calls.
pub const NATIVE_READY: &str = "nativeReady";
/// Fired exactly once after DOM and native (and any extra gates) are ready.
pub const DEVICE_READY: &str = "deviceReady";
pub const PAUSE: &str = "pause";
pub const RESUME: &str = "resume";

/// Ids are unique across every channel in the process.
static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

/// Stable handle for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn fresh() -> Self {
        Self(NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Handler = Rc<RefCell<dyn FnMut(&[Value]) -> bool>>;

struct Subscriber {
    id: SubscriberId,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct ChannelState {
    subscribers: Vec<Subscriber>,
    fired: bool,
    last_args: Vec<Value>,
}

/// A named publish/subscribe channel.
pub struct Channel {
    name: String,
    one_shot: bool,
    state: RefCell<ChannelState>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            one_shot: false,
            state: RefCell::new(ChannelState::default()),
        }
    }

    /// A channel that can fire only once; later fires are no-ops.
    pub fn one_shot(name: impl Into<String>) -> Self {
        Self {
            one_shot: true,
            ..Self::new(name)
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_fired(&self) -> bool {
        self.state.borrow().fired
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.borrow().subscribers.len()
    }

    /// Subscribe a repeating handler.  Returning `false` marks the fire as
    /// failed without stopping the remaining subscribers.
    pub fn subscribe(&self, handler: impl FnMut(&[Value]) -> bool + 'static) -> SubscriberId {
        self.subscribe_with_id(SubscriberId::fresh(), handler)
    }

    /// Subscribe under a caller-chosen id.  Re-using an id replaces that
    /// subscription's handler in place.
    pub fn subscribe_with_id(
        &self,
        id: SubscriberId,
        handler: impl FnMut(&[Value]) -> bool + 'static,
    ) -> SubscriberId {
        self.insert(id, false, Rc::new(RefCell::new(handler)));
        id
    }

    /// Subscribe for a single invocation.
    ///
    /// If the channel already fired, `handler` runs now with the cached
    /// arguments and `None` is returned.
    pub fn subscribe_once(
        &self,
        handler: impl FnMut(&[Value]) -> bool + 'static,
    ) -> Option<SubscriberId> {
        let cached = {
            let state = self.state.borrow();
            state.fired.then(|| state.last_args.clone())
        };

        match cached {
            Some(args) => {
                let handler: Handler = Rc::new(RefCell::new(handler));
                self.invoke(SubscriberId::fresh(), &handler, &args);
                None
            }
            None => {
                let id = SubscriberId::fresh();
                self.insert(id, true, Rc::new(RefCell::new(handler)));
                Some(id)
            }
        }
    }

    /// Remove a subscription.  Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != id);
        before != state.subscribers.len()
    }

    /// Invoke every current subscriber in registration order.
    ///
    /// Returns `false` if any subscriber returned `false` or panicked, or if
    /// a one-shot channel has already fired.
    pub fn fire(&self, args: &[Value]) -> bool {
        let snapshot: Vec<(SubscriberId, Handler)> = {
            let mut state = self.state.borrow_mut();
            if self.one_shot && state.fired {
                debug!(channel = %self.name, "one-shot channel already fired; ignored");
                return false;
            }
            state.fired = true;
            state.last_args = args.to_vec();
            state
                .subscribers
                .iter()
                .map(|s| (s.id, Rc::clone(&s.handler)))
                .collect()
        };

        debug!(channel = %self.name, subscribers = snapshot.len(), "firing channel");

        let mut ok = true;
        for (id, handler) in snapshot {
            // Earlier subscribers may have unsubscribed later ones.
            let still_subscribed = {
                let mut state = self.state.borrow_mut();
                match state.subscribers.iter().position(|s| s.id == id) {
                    Some(pos) if state.subscribers[pos].once => {
                        state.subscribers.remove(pos);
                        true
                    }
                    Some(_) => true,
                    None => false,
                }
            };
            if still_subscribed && !self.invoke(id, &handler, args) {
                ok = false;
            }
        }
        ok
    }

    /// Run `on_all` exactly once, after every channel in `channels` has
    /// fired at least once.  Channels that already fired count immediately;
    /// an empty list runs `on_all` now.
    pub fn join(channels: &[Rc<Channel>], on_all: impl FnOnce() + 'static) {
        if channels.is_empty() {
            on_all();
            return;
        }

        let remaining = Rc::new(Cell::new(channels.len()));
        let on_all: Rc<RefCell<Option<Box<dyn FnOnce()>>>> =
            Rc::new(RefCell::new(Some(Box::new(on_all))));

        for channel in channels {
            let remaining = Rc::clone(&remaining);
            let on_all = Rc::clone(&on_all);
            channel.subscribe_once(move |_| {
                remaining.set(remaining.get().saturating_sub(1));
                if remaining.get() == 0 {
                    let callback = on_all.borrow_mut().take();
                    if let Some(callback) = callback {
                        callback();
                    }
                }
                true
            });
        }
    }

    fn insert(&self, id: SubscriberId, once: bool, handler: Handler) {
        let mut state = self.state.borrow_mut();
        if let Some(existing) = state.subscribers.iter_mut().find(|s| s.id == id) {
            existing.once = once;
            existing.handler = handler;
        } else {
            state.subscribers.push(Subscriber { id, once, handler });
        }
    }

    fn invoke(&self, id: SubscriberId, handler: &Handler, args: &[Value]) -> bool {
        let Ok(mut f) = handler.try_borrow_mut() else {
            warn!(channel = %self.name, subscriber = %id, "re-entrant fire skipped for subscriber");
            return true;
        };
        match catch_unwind(AssertUnwindSafe(|| (*f)(args))) {
            Ok(keep_going) => keep_going,
            Err(caught) => {
                error!(
                    channel = %self.name,
                    subscriber = %id,
                    error = %panic_message(caught.as_ref()),
                    "channel subscriber panicked"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("one_shot", &self.one_shot)
            .field("fired", &state.fired)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Channel set
// ---------------------------------------------------------------------------

/// All channels of one bridge, created on first use.
#[derive(Debug)]
pub struct ChannelSet {
    channels: RefCell<HashMap<String, Rc<Channel>>>,
}

impl ChannelSet {
    /// A set holding the lifecycle channels.
    pub fn new() -> Self {
        let set = Self {
            channels: RefCell::new(HashMap::new()),
        };
        set.channels
            .borrow_mut()
            .insert(DEVICE_READY.to_owned(), Rc::new(Channel::one_shot(DEVICE_READY)));
        for name in [DOM_READY, NATIVE_READY, PAUSE, RESUME] {
            set.get(name);
        }
        set
    }

    pub fn get(&self, name: &str) -> Rc<Channel> {
        Rc::clone(
            self.channels
                .borrow_mut()
                .entry(name.to_owned())
                .or_insert_with(|| Rc::new(Channel::new(name))),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.borrow().contains_key(name)
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    WaitingForDomAndNative,
    Ready,
}

/// The one-way transition that fires `deviceReady`.
#[derive(Debug, Clone)]
pub struct Readiness {
    state: Rc<Cell<ReadinessState>>,
}

impl Readiness {
    /// Join `domReady`, `nativeReady` and every channel named in `gates`
    /// into a single `deviceReady` fire.
    pub fn install(channels: &ChannelSet, gates: &[String]) -> Self {
        let state = Rc::new(Cell::new(ReadinessState::WaitingForDomAndNative));

        let mut waiting_on = vec![channels.get(DOM_READY), channels.get(NATIVE_READY)];
        waiting_on.extend(gates.iter().map(|gate| channels.get(gate)));
        let names: Vec<String> = waiting_on.iter().map(|c| c.name().to_owned()).collect();
        debug!(channels = ?names, "deviceReady waits on");

        let device_ready = channels.get(DEVICE_READY);
        let transition = Rc::clone(&state);
        Channel::join(&waiting_on, move || {
            if transition.get() == ReadinessState::Ready {
                return;
            }
            transition.set(ReadinessState::Ready);
            info!("device ready");
            device_ready.fire(&[]);
        });

        Self { state }
    }

    pub fn state(&self) -> ReadinessState {
        self.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn FnMut(&[Value]) -> bool>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |label: &str| -> Box<dyn FnMut(&[Value]) -> bool> {
            let sink = Rc::clone(&sink);
            let label = label.to_owned();
            Box::new(move |_| {
                sink.borrow_mut().push(label.clone());
                true
            })
        };
        (log, make)
    }

    #[test]
    fn fire_runs_subscribers_in_order_despite_false() {
        let channel = Channel::new("test");
        let (log, make) = recorder();
        channel.subscribe(make("A"));
        let mut b = make("B");
        channel.subscribe(move |args| {
            b(args);
            false
        });
        channel.subscribe(make("C"));

        assert!(!channel.fire(&[]));
        assert_eq!(*log.borrow(), ["A", "B", "C"]);
    }

    #[test]
    fn late_subscribe_once_runs_immediately_with_cached_args() {
        let channel = Channel::new("test");
        channel.fire(&[json!("cached")]);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = channel.subscribe_once(move |args| {
            sink.borrow_mut().extend_from_slice(args);
            true
        });

        assert!(id.is_none());
        assert_eq!(*seen.borrow(), [json!("cached")]);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn subscribe_once_runs_only_once() {
        let channel = Channel::new("test");
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        channel.subscribe_once(move |_| {
            c.set(c.get() + 1);
            true
        });

        channel.fire(&[]);
        channel.fire(&[]);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let channel = Channel::new("test");
        let id = channel.subscribe(|_| true);
        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_removed_mid_fire_is_skipped() {
        let channel = Rc::new(Channel::new("test"));
        let (log, make) = recorder();
        let victim = SubscriberId::fresh();

        let ch = Rc::clone(&channel);
        channel.subscribe(move |_| {
            ch.unsubscribe(victim);
            true
        });
        channel.subscribe_with_id(victim, make("victim"));

        channel.fire(&[]);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn reusing_an_id_replaces_the_handler() {
        let channel = Channel::new("test");
        let (log, make) = recorder();
        let id = SubscriberId::fresh();
        channel.subscribe_with_id(id, make("old"));
        channel.subscribe_with_id(id, make("new"));

        channel.fire(&[]);
        assert_eq!(*log.borrow(), ["new"]);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_others() {
        let channel = Channel::new("test");
        let (log, make) = recorder();
        channel.subscribe(|_| panic!("subscriber bug"));
        channel.subscribe(make("after"));

        assert!(!channel.fire(&[]));
        assert_eq!(*log.borrow(), ["after"]);
    }

    #[test]
    fn join_of_nothing_runs_now() {
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        Channel::join(&[], move || r.set(true));
        assert!(ran.get());
    }

    #[test]
    fn join_counts_already_fired_channels() {
        let a = Rc::new(Channel::new("a"));
        let b = Rc::new(Channel::new("b"));
        a.fire(&[]);

        let ran = Rc::new(Cell::new(0));
        let r = Rc::clone(&ran);
        Channel::join(&[Rc::clone(&a), Rc::clone(&b)], move || r.set(r.get() + 1));
        assert_eq!(ran.get(), 0);

        b.fire(&[]);
        b.fire(&[]);
        a.fire(&[]);
        assert_eq!(ran.get(), 1);
    }

    fn device_ready_counter(channels: &ChannelSet) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        channels.get(DEVICE_READY).subscribe(move |_| {
            c.set(c.get() + 1);
            true
        });
        count
    }

    #[test]
    fn device_ready_fires_once_in_either_order() {
        for order in [[DOM_READY, NATIVE_READY], [NATIVE_READY, DOM_READY]] {
            let channels = ChannelSet::new();
            let readiness = Readiness::install(&channels, &[]);
            let count = device_ready_counter(&channels);

            channels.get(order[0]).fire(&[]);
            assert_eq!(readiness.state(), ReadinessState::WaitingForDomAndNative);
            channels.get(order[1]).fire(&[]);
            assert!(readiness.is_ready());

            channels.get(DOM_READY).fire(&[]);
            channels.get(NATIVE_READY).fire(&[]);
            assert_eq!(count.get(), 1);
        }
    }

    #[test]
    fn device_ready_cannot_be_fired_again_by_hand() {
        let channels = ChannelSet::new();
        let readiness = Readiness::install(&channels, &[]);
        let count = device_ready_counter(&channels);
        let device_ready = channels.get(DEVICE_READY);
        assert!(device_ready.is_one_shot());

        channels.get(DOM_READY).fire(&[]);
        channels.get(NATIVE_READY).fire(&[]);
        assert!(readiness.is_ready());

        assert!(!device_ready.fire(&[json!("again")]));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn pause_and_resume_repeat() {
        let channels = ChannelSet::new();
        let pause = channels.get(PAUSE);
        assert!(!pause.is_one_shot());
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        pause.subscribe(move |_| {
            c.set(c.get() + 1);
            true
        });
        pause.fire(&[]);
        pause.fire(&[]);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn ready_gates_hold_device_ready() {
        let channels = ChannelSet::new();
        let readiness = Readiness::install(&channels, &["pluginsReady".to_owned()]);
        let count = device_ready_counter(&channels);

        channels.get(DOM_READY).fire(&[]);
        channels.get(NATIVE_READY).fire(&[]);
        assert!(!readiness.is_ready());

        channels.get("pluginsReady").fire(&[]);
        assert!(readiness.is_ready());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn lifecycle_channels_exist_up_front() {
        let channels = ChannelSet::new();
        for name in [DOM_READY, NATIVE_READY, DEVICE_READY, PAUSE, RESUME] {
            assert!(channels.contains(name));
        }
        assert!(!channels.contains("custom"));
        channels.get("custom");
        assert!(channels.contains("custom"));
    }
}
