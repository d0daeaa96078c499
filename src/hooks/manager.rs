//! Registry of the hooks of the catalog

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use crate::binding::ProcessBinding;
use crate::browser::BrowserManager;
use crate::error::{BindingError, Result};

use super::{
    names, EntityFocusHook, EntityFollowHook, EntityUnfollowHook, HookContext, HookEntry,
    HookManagerOptions, NosHook, PacketReceiveHook, PacketSendHook, PeriodicHook, PetWalkHook,
    PlayerWalkHook,
};

/// Creates a hook of the catalog
pub type HookFactory = fn(&HookContext<'_>) -> Result<HookEntry>;

/// Named entry of the catalog
#[derive(Clone, Copy)]
pub struct CatalogEntry {
    /// Name of the created hook
    pub name: &'static str,
    /// Creates the hook
    pub factory: HookFactory,
}

impl CatalogEntry {
    /// Creates an entry
    pub const fn new(name: &'static str, factory: HookFactory) -> Self {
        Self { name, factory }
    }
}

/// Entry creating the hook `H` through `create`
macro_rules! entry {
    ($name:expr, $hook:ty) => {
        CatalogEntry::new($name, |context| {
            Ok(HookEntry::new(Arc::new(<$hook>::create(context)?)))
        })
    };
}

/// Hooks of the client, in initialization order
const DEFAULT_CATALOG: [CatalogEntry; 8] = [
    entry!(names::PACKET_SEND, PacketSendHook),
    entry!(names::PACKET_RECEIVE, PacketReceiveHook),
    entry!(names::PLAYER_WALK, PlayerWalkHook),
    entry!(names::PET_WALK, PetWalkHook),
    entry!(names::ENTITY_FOLLOW, EntityFollowHook),
    entry!(names::ENTITY_UNFOLLOW, EntityUnfollowHook),
    entry!(names::ENTITY_FOCUS, EntityFocusHook),
    entry!(names::PERIODIC, PeriodicHook),
];

/// Registry of the hooks
///
/// Nothing is hooked until [`HookManager::initialize`] is called. Every query other than
/// [`HookManager::is_initialized`] panics before that, as it's a programming error.
pub struct HookManager {
    /// Options passed to the factories
    options: HookManagerOptions,
    /// Hooks to create
    catalog: Vec<CatalogEntry>,
    /// Created hooks, `None` before initialization
    hooks: RwLock<Option<Vec<HookEntry>>>,
}

impl HookManager {
    /// Creates a registry of the whole catalog
    pub fn new(options: HookManagerOptions) -> Self {
        Self::with_catalog(options, Self::default_catalog())
    }

    /// Creates a registry of the given hooks
    pub fn with_catalog(options: HookManagerOptions, catalog: Vec<CatalogEntry>) -> Self {
        Self {
            options,
            catalog,
            hooks: RwLock::new(None),
        }
    }

    /// Every hook of the client
    pub fn default_catalog() -> Vec<CatalogEntry> {
        DEFAULT_CATALOG.to_vec()
    }

    /// Creates every hook of the catalog
    ///
    /// A failing hook does not stop the others; the failures are returned together and the
    /// successfully created hooks stay registered. Later calls do nothing.
    pub fn initialize(&self, binding: &ProcessBinding, browser: &BrowserManager) -> Result<()> {
        let mut hooks = self.hooks.write();
        if hooks.is_some() {
            return Ok(());
        }

        let context = HookContext {
            binding,
            browser,
            options: &self.options,
        };
        let mut created = Vec::with_capacity(self.catalog.len());
        let mut errors = Vec::new();
        for entry in &self.catalog {
            match panic::catch_unwind(AssertUnwindSafe(|| (entry.factory)(&context))) {
                Ok(Ok(hook)) => {
                    log::info!("Loaded hook {}", entry.name);
                    created.push(hook);
                }
                Ok(Err(e)) => {
                    log::warn!("Could not load hook {}: {e}", entry.name);
                    errors.push(e);
                }
                Err(payload) => {
                    let error = BindingError::from_panic(payload);
                    log::error!("Loading hook {} panicked: {error}", entry.name);
                    errors.push(error);
                }
            }
        }
        *hooks = Some(created);

        BindingError::aggregate(errors)
    }

    /// Whether [`HookManager::initialize`] was called
    pub fn is_initialized(&self) -> bool {
        self.hooks.read().is_some()
    }

    /// Registered hooks, panics before initialization
    fn loaded(&self) -> MappedRwLockReadGuard<'_, Vec<HookEntry>> {
        RwLockReadGuard::map(self.hooks.read(), |hooks| match hooks {
            Some(hooks) => hooks,
            None => panic!("Could not get a hook. Did you forget to call HookManager::initialize?"),
        })
    }

    /// Every registered hook with access to its concrete type
    pub fn entries(&self) -> Vec<HookEntry> {
        self.loaded().clone()
    }

    /// Every registered hook
    pub fn hooks(&self) -> Vec<Arc<dyn NosHook>> {
        self.loaded().iter().map(|e| e.hook().clone()).collect()
    }

    /// The registered hook of type `H`
    pub fn get<H: NosHook + 'static>(&self) -> Option<Arc<H>> {
        self.loaded().iter().find_map(HookEntry::downcast::<H>)
    }

    /// The registered hook called `name`
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn NosHook>> {
        self.loaded()
            .iter()
            .find(|e| e.hook().name() == name)
            .map(|e| e.hook().clone())
    }

    /// Whether the hook of type `H` was created
    pub fn is_hook_loaded<H: NosHook + 'static>(&self) -> bool {
        self.get::<H>().is_some()
    }

    /// Whether the hook of type `H` was created and its wrapper can be used
    pub fn is_hook_usable<H: NosHook + 'static>(&self) -> bool {
        self.get::<H>().map_or(false, |h| h.is_usable())
    }

    /// The packet send hook
    pub fn packet_send(&self) -> Option<Arc<PacketSendHook>> {
        self.get()
    }

    /// The packet receive hook
    pub fn packet_receive(&self) -> Option<Arc<PacketReceiveHook>> {
        self.get()
    }

    /// The walk hook of the character
    pub fn player_walk(&self) -> Option<Arc<PlayerWalkHook>> {
        self.get()
    }

    /// The walk hook of pets
    pub fn pet_walk(&self) -> Option<Arc<PetWalkHook>> {
        self.get()
    }

    /// The follow hook
    pub fn entity_follow(&self) -> Option<Arc<EntityFollowHook>> {
        self.get()
    }

    /// The unfollow hook
    pub fn entity_unfollow(&self) -> Option<Arc<EntityUnfollowHook>> {
        self.get()
    }

    /// The focus hook
    pub fn entity_focus(&self) -> Option<Arc<EntityFocusHook>> {
        self.get()
    }

    /// The periodic hook
    pub fn periodic(&self) -> Option<Arc<PeriodicHook>> {
        self.get()
    }

    /// Enables the registered hooks among `names`; unknown names are ignored
    pub fn enable(&self, names: &[&str]) -> Result<()> {
        self.apply(|hook| names.contains(&hook.name()), |hook| hook.enable())
    }

    /// Disables the registered hooks among `names`; unknown names are ignored
    pub fn disable(&self, names: &[&str]) -> Result<()> {
        self.apply(|hook| names.contains(&hook.name()), |hook| hook.disable())
    }

    /// Enables every registered hook
    pub fn enable_all(&self) -> Result<()> {
        self.apply(|_| true, |hook| hook.enable())
    }

    /// Disables every registered hook
    pub fn disable_all(&self) -> Result<()> {
        self.apply(|_| true, |hook| hook.disable())
    }

    /// Runs `action` on the selected hooks, collecting the failures
    fn apply(
        &self,
        select: impl Fn(&dyn NosHook) -> bool,
        action: impl Fn(&dyn NosHook) -> Result<()>,
    ) -> Result<()> {
        // the lock is released before touching the hooks
        let mut errors = Vec::new();
        for hook in self.hooks() {
            if !select(hook.as_ref()) {
                continue;
            }
            if let Err(e) = action(hook.as_ref()) {
                log::warn!("Could not toggle hook {}: {e}", hook.name());
                errors.push(e);
            }
        }
        BindingError::aggregate(errors)
    }
}
