//! Hook registry shared by several independent users inside one process
//!
//! Each user gets its own [`SharedInstance`] whose hooks are enabled and disabled independently. A
//! hook of the client stays placed as long as at least one instance has it enabled.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::binding::ProcessBinding;
use crate::browser::BrowserManager;
use crate::error::{BindingError, Result};
use crate::hook::Decision;

use super::{
    Event, HookEntry, HookManager, HookManagerOptions, HooksConfigBuilder, NosHook,
    ObservableHook,
};

/// Amount of instances having each hook enabled
type EnableCounts = Arc<Mutex<HashMap<&'static str, usize>>>;

lazy_static! {
    /// Registry of the current process
    static ref GLOBAL: SharedHookManager = SharedHookManager::new();
}

/// Owner of the underlying [`HookManager`]
pub struct SharedHookManager {
    /// Created by the first instance
    manager: Mutex<Option<Arc<HookManager>>>,
    /// Enables per hook
    counts: EnableCounts,
}

impl SharedHookManager {
    /// Creates a registry without hooks
    pub fn new() -> Self {
        Self {
            manager: Mutex::new(None),
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registry of the current process, created on first use
    pub fn global() -> &'static SharedHookManager {
        &GLOBAL
    }

    /// Whether the first instance was created
    pub fn is_initialized(&self) -> bool {
        self.manager.lock().is_some()
    }

    /// Creates an instance, enabling the hooks `options` asks for
    ///
    /// The first instance creates the hooks of the client with the patterns of its `options`; the
    /// error returned next to it reports the hooks that could not be created. Later instances reuse
    /// those hooks and only get an error when enabling fails.
    pub fn initialize_instance(
        &self,
        binding: &ProcessBinding,
        browser: &BrowserManager,
        options: &HookManagerOptions,
    ) -> (SharedInstance, Result<()>) {
        let mut errors = Vec::new();
        let manager = {
            let mut manager = self.manager.lock();
            match manager.as_ref() {
                Some(manager) => manager.clone(),
                None => {
                    // placement is decided by the instances
                    let created = Arc::new(HookManager::new(
                        HooksConfigBuilder::from_options(options.clone()).hook_none().build(),
                    ));
                    if let Err(e) = created.initialize(binding, browser) {
                        errors.push(e);
                    }
                    *manager = Some(created.clone());
                    created
                }
            }
        };

        let hooks: Vec<Arc<SharedHook>> = manager
            .entries()
            .into_iter()
            .map(|entry| Arc::new(SharedHook::new(entry, self.counts.clone())))
            .collect();
        for hook in &hooks {
            let wanted = options.by_name(hook.name()).map_or(false, |o| o.hook);
            if wanted {
                if let Err(e) = hook.enable() {
                    errors.push(e);
                }
            }
        }

        (SharedInstance { manager, hooks }, BindingError::aggregate(errors))
    }
}

impl Default for SharedHookManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Handlers of one instance, forwarded from the underlying hook
struct Forwarding {
    /// `Arc<Event<H::Args>>` of the forwarded hook type
    event: Arc<dyn Any + Send + Sync>,
    /// Removes the forwarding handler from the underlying hook
    detach: Box<dyn FnOnce() + Send>,
}

/// Hook as seen by one instance
pub struct SharedHook {
    /// Underlying hook
    entry: HookEntry,
    /// Whether this instance has the hook enabled
    enabled: Arc<AtomicBool>,
    /// Enables of every instance
    counts: EnableCounts,
    /// Own event, created on first use
    forwarding: Mutex<Option<Forwarding>>,
}

impl SharedHook {
    /// Wraps `entry` for one instance
    fn new(entry: HookEntry, counts: EnableCounts) -> Self {
        Self {
            entry,
            enabled: Arc::new(AtomicBool::new(false)),
            counts,
            forwarding: Mutex::new(None),
        }
    }

    /// The underlying hook as `H`, e.g. to call its original function or wrapper
    ///
    /// Handlers subscribed on the underlying hook are shared by every instance; subscribe
    /// through [`SharedHook::called`] instead.
    pub fn downcast<H: NosHook + 'static>(&self) -> Option<Arc<H>> {
        self.entry.downcast()
    }

    /// Event of this instance, raised only while this instance has the hook enabled
    ///
    /// `None` if the hook is not an `H`.
    pub fn called<H: ObservableHook + 'static>(&self) -> Option<Arc<Event<H::Args>>> {
        let mut forwarding = self.forwarding.lock();
        if let Some(forwarding) = forwarding.as_ref() {
            return forwarding.event.clone().downcast::<Event<H::Args>>().ok();
        }

        let hook = self.downcast::<H>()?;
        let event = Arc::new(Event::<H::Args>::new());
        let id = {
            let event = event.clone();
            let enabled = self.enabled.clone();
            hook.called().subscribe(move |args| {
                if enabled.load(Ordering::SeqCst) {
                    event.dispatch(args)
                } else {
                    Decision::Continue
                }
            })
        };
        *forwarding = Some(Forwarding {
            event: event.clone(),
            detach: Box::new(move || {
                hook.called().unsubscribe(id);
            }),
        });
        Some(event)
    }

    /// Whether the underlying hook is placed, possibly by another instance
    pub fn is_placed(&self) -> bool {
        self.entry.hook().is_enabled()
    }
}

impl Drop for SharedHook {
    fn drop(&mut self) {
        if let Some(forwarding) = self.forwarding.get_mut().take() {
            (forwarding.detach)();
        }
    }
}

impl NosHook for SharedHook {
    fn name(&self) -> &'static str {
        self.entry.hook().name()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_usable(&self) -> bool {
        self.entry.hook().is_usable()
    }

    fn enable(&self) -> Result<()> {
        let mut counts = self.counts.lock();
        if self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let count = counts.entry(self.name()).or_insert(0);
        if *count == 0 {
            self.entry.hook().enable()?;
        }
        *count += 1;
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        let mut counts = self.counts.lock();
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let count = counts.entry(self.name()).or_insert(1);
        if *count == 1 {
            self.entry.hook().disable()?;
        }
        *count -= 1;
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Hooks of one user of the shared registry
///
/// Dropping the instance disables its hooks.
pub struct SharedInstance {
    /// Underlying registry
    manager: Arc<HookManager>,
    /// Hooks of this instance
    hooks: Vec<Arc<SharedHook>>,
}

impl SharedInstance {
    /// Underlying registry, toggling hooks through it bypasses the counting
    pub fn manager(&self) -> &Arc<HookManager> {
        &self.manager
    }

    /// Hooks of this instance
    pub fn hooks(&self) -> &[Arc<SharedHook>] {
        &self.hooks
    }

    /// The hook called `name`
    pub fn get_by_name(&self, name: &str) -> Option<Arc<SharedHook>> {
        self.hooks.iter().find(|h| h.name() == name).cloned()
    }

    /// Enables the hooks among `names`
    pub fn enable(&self, names: &[&str]) -> Result<()> {
        self.apply(|h| names.contains(&h.name()), |h| h.enable())
    }

    /// Disables the hooks among `names`
    pub fn disable(&self, names: &[&str]) -> Result<()> {
        self.apply(|h| names.contains(&h.name()), |h| h.disable())
    }

    /// Enables every hook
    pub fn enable_all(&self) -> Result<()> {
        self.apply(|_| true, |h| h.enable())
    }

    /// Disables every hook
    pub fn disable_all(&self) -> Result<()> {
        self.apply(|_| true, |h| h.disable())
    }

    /// Runs `action` on the selected hooks, collecting the failures
    fn apply(
        &self,
        select: impl Fn(&SharedHook) -> bool,
        action: impl Fn(&SharedHook) -> Result<()>,
    ) -> Result<()> {
        let errors = self
            .hooks
            .iter()
            .filter(|h| select(h))
            .filter_map(|h| action(h).err())
            .collect();
        BindingError::aggregate(errors)
    }
}

impl Drop for SharedInstance {
    fn drop(&mut self) {
        if let Err(e) = self.disable_all() {
            log::warn!("Could not disable the hooks of a shared instance: {e}");
        }
    }
}
