use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::channel::oneshot;

use crate::util::ListenerRegistration;

use super::batch;

static NEXT_OBSERVABLE_ID: AtomicU64 = AtomicU64::new(1);

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;
type Hook = Arc<dyn Fn() + Send + Sync + 'static>;

/// A shared, observable value cell.
///
/// Observers are notified after every write (once per [`super::transaction`]).
/// Hooks registered with [`Observable::on_become_observed`] and
/// [`Observable::on_become_unobserved`] fire when the number of observers
/// moves from zero to one and back.
///
/// Callbacks always run with no internal lock held, so they may read or
/// write any observable, including this one. An observer that writes back
/// cuts the current round short: observers not yet reached see only the
/// newer value.
///
/// Hooks of one observable run one at a time and in the order the observer
/// count changed, even when observers come and go on several threads. A
/// transition raised while a hook is running is dispatched after that hook
/// returns.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

struct ObservableInner<T> {
    id: u64,
    value: RwLock<T>,
    /// Bumped on every write.
    version: AtomicU64,
    observers: Mutex<BTreeMap<u64, Observer<T>>>,
    became_observed: Mutex<BTreeMap<u64, Hook>>,
    became_unobserved: Mutex<BTreeMap<u64, Hook>>,
    /// Observed (`true`) and unobserved transitions awaiting their hooks,
    /// pushed while the observer map is locked.
    transitions: Mutex<VecDeque<bool>>,
    dispatching: AtomicBool,
    next_registration_id: AtomicU64,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                id: NEXT_OBSERVABLE_ID.fetch_add(1, Ordering::SeqCst),
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                observers: Mutex::new(BTreeMap::new()),
                became_observed: Mutex::new(BTreeMap::new()),
                became_unobserved: Mutex::new(BTreeMap::new()),
                transitions: Mutex::new(VecDeque::new()),
                dispatching: AtomicBool::new(false),
                next_registration_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.read().unwrap().clone()
    }

    /// Reads the value in place.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read().unwrap())
    }

    pub fn set(&self, value: T) {
        {
            let mut current = self.inner.value.write().unwrap();
            *current = value;
            self.inner.version.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.notify();
    }

    /// Mutates the value in place. `f` must not touch this observable.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut current = self.inner.value.write().unwrap();
            let result = f(&mut current);
            self.inner.version.fetch_add(1, Ordering::SeqCst);
            result
        };
        self.inner.notify();
        result
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().unwrap().len()
    }

    /// Registers `observer` for every subsequent write. It is not called with
    /// the current value.
    pub fn observe<F>(&self, observer: F) -> ListenerRegistration
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        {
            let mut observers = self.inner.observers.lock().unwrap();
            observers.insert(id, Arc::new(observer));
            if observers.len() == 1 {
                self.inner.transitions.lock().unwrap().push_back(true);
            }
        }
        self.inner.dispatch_transitions();

        let weak: Weak<ObservableInner<T>> = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut observers = inner.observers.lock().unwrap();
                if observers.remove(&id).is_some() && observers.is_empty() {
                    inner.transitions.lock().unwrap().push_back(false);
                }
            }
            inner.dispatch_transitions();
        })
    }

    pub fn on_become_observed<F>(&self, hook: F) -> ListenerRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register_hook(|inner| &inner.became_observed, Arc::new(hook))
    }

    pub fn on_become_unobserved<F>(&self, hook: F) -> ListenerRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register_hook(|inner| &inner.became_unobserved, Arc::new(hook))
    }

    /// Resolves once `predicate` holds for the current value.
    ///
    /// The observer is attached before the current value is checked, so a
    /// write racing with the call cannot be missed. While pending, the wait
    /// counts as an observer.
    pub async fn when<P>(&self, predicate: P)
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        let (sender, receiver) = oneshot::channel::<()>();
        let sender = Mutex::new(Some(sender));
        let matcher = Arc::clone(&predicate);
        let registration = self.observe(move |value| {
            if (*matcher)(value) {
                if let Some(sender) = sender.lock().unwrap().take() {
                    let _ = sender.send(());
                }
            }
        });

        if !self.with(|value| (*predicate)(value)) {
            let _ = receiver.await;
        }
        registration.detach();
    }

    fn register_hook(
        &self,
        select: fn(&ObservableInner<T>) -> &Mutex<BTreeMap<u64, Hook>>,
        hook: Hook,
    ) -> ListenerRegistration {
        let id = self.inner.next_id();
        select(&self.inner).lock().unwrap().insert(id, hook);
        let weak: Weak<ObservableInner<T>> = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            if let Some(inner) = weak.upgrade() {
                select(&inner).lock().unwrap().remove(&id);
            }
        })
    }
}

impl<T> ObservableInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn next_id(&self) -> u64 {
        self.next_registration_id.fetch_add(1, Ordering::SeqCst)
    }

    fn notify(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let notify = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.deliver();
            }
        });
        if let Some(notify) = batch::schedule(self.id, notify) {
            notify();
        }
    }

    fn deliver(&self) {
        let observers: Vec<Observer<T>> = self.observers.lock().unwrap().values().cloned().collect();
        if observers.is_empty() {
            return;
        }
        let (value, version) = {
            let value = self.value.read().unwrap();
            (value.clone(), self.version.load(Ordering::SeqCst))
        };
        for observer in observers {
            // A newer write notifies every observer itself.
            if self.version.load(Ordering::SeqCst) != version {
                return;
            }
            observer(&value);
        }
    }

    /// Runs queued transition hooks in order. Only one caller drains the
    /// queue at a time; the others return and leave their entries to it.
    fn dispatch_transitions(&self) {
        loop {
            if self.dispatching.swap(true, Ordering::SeqCst) {
                return;
            }
            loop {
                let next = self.transitions.lock().unwrap().pop_front();
                match next {
                    Some(true) => run_hooks(&self.became_observed),
                    Some(false) => run_hooks(&self.became_unobserved),
                    None => break,
                }
            }
            self.dispatching.store(false, Ordering::SeqCst);
            // An entry pushed between the last pop and the release would
            // otherwise be stranded.
            if self.transitions.lock().unwrap().is_empty() {
                return;
            }
        }
    }
}

fn run_hooks(hooks: &Mutex<BTreeMap<u64, Hook>>) {
    let hooks: Vec<Hook> = hooks.lock().unwrap().values().cloned().collect();
    for hook in hooks {
        hook();
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.read().unwrap())
            .finish()
    }
}
