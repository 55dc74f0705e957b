//! Broadcast event source with explicit subscription handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Callback invoked for every event emitted on a bus.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Object-safe view of a bus used by [`Subscription`] to remove itself.
trait ListenerSet: Send + Sync {
	fn remove(&self, id: u64) -> bool;
	fn contains(&self, id: u64) -> bool;
}

struct BusInner<E> {
	listeners: Mutex<Vec<(u64, Listener<E>)>>,
	next_id: AtomicU64,
}

impl<E: 'static> ListenerSet for BusInner<E> {
	fn remove(&self, id: u64) -> bool {
		let mut listeners = self.listeners.lock();
		let before = listeners.len();
		listeners.retain(|(slot, _)| *slot != id);
		listeners.len() != before
	}

	fn contains(&self, id: u64) -> bool {
		self.listeners.lock().iter().any(|(slot, _)| *slot == id)
	}
}

/// Many-listener event source.
///
/// Listeners run on the emitting thread, in registration order, outside the
/// bus lock. A listener may therefore subscribe or unsubscribe (itself
/// included) while an event is being delivered; such changes take effect for
/// the next event.
pub struct EventBus<E> {
	inner: Arc<BusInner<E>>,
}

impl<E: 'static> EventBus<E> {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(BusInner {
				listeners: Mutex::new(Vec::new()),
				next_id: AtomicU64::new(1),
			}),
		}
	}

	/// Registers `listener` until the returned handle is unsubscribed or dropped.
	pub fn subscribe(&self, listener: Listener<E>) -> Subscription {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.listeners.lock().push((id, listener));
		let inner: Arc<dyn ListenerSet> = self.inner.clone();
		Subscription {
			source: Some(Arc::downgrade(&inner)),
			id,
		}
	}

	/// Delivers `event` to every listener registered at the time of the call.
	pub fn emit(&self, event: &E) {
		let snapshot: Vec<Listener<E>> = self.inner.listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
		for listener in snapshot {
			listener(event);
		}
	}

	pub fn listener_count(&self) -> usize {
		self.inner.listeners.lock().len()
	}
}

impl<E: 'static> Default for EventBus<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E> fmt::Debug for EventBus<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventBus")
			.field("listeners", &self.inner.listeners.lock().len())
			.finish()
	}
}

/// Handle owning one listener registration.
///
/// Dropping the handle removes the registration. [`Subscription::unsubscribe`]
/// may be called any number of times; only the first call has an effect.
/// Removing a registration whose bus is already gone is a no-op.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
	source: Option<Weak<dyn ListenerSet>>,
	id: u64,
}

impl Subscription {
	/// A handle that owns nothing.
	pub fn inert() -> Self {
		Self { source: None, id: 0 }
	}

	/// Removes the registration. Returns true if this call removed it.
	pub fn unsubscribe(&mut self) -> bool {
		let Some(source) = self.source.take() else {
			return false;
		};
		source.upgrade().is_some_and(|set| set.remove(self.id))
	}

	/// Whether the registration is still attached to a live bus.
	pub fn is_active(&self) -> bool {
		self.source
			.as_ref()
			.and_then(Weak::upgrade)
			.is_some_and(|set| set.contains(self.id))
	}

	/// Gives up ownership, leaving the listener attached for the bus lifetime.
	pub fn detach(mut self) {
		self.source = None;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.unsubscribe();
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.is_active())
			.finish()
	}
}
