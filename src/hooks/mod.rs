//! # Hooks
//!
//! Catalog of the hooked client functions. Every hook reports intercepted calls through an
//! [`Event`] whose handlers may cancel the call, can replay the original function without the
//! replay being reported and, when the needed object bindings are loaded, offers a wrapper calling
//! the function the way the client does.

use std::any::Any;
use std::sync::Arc;

use crate::binding::ProcessBinding;
use crate::browser::BrowserManager;
use crate::error::Result;

/// Implements [`NosHook`] and [`ObservableHook`] for a hook built around a [`CancelableHook`]
/// stored in `core`
macro_rules! nos_hook {
    ($hook:ty, $args:ty, |$this:pat_param| $usable:expr) => {
        impl $crate::hooks::ObservableHook for $hook {
            type Args = $args;

            fn called(&self) -> &$crate::hooks::Event<$args> {
                self.core.called()
            }
        }

        impl $crate::hooks::NosHook for $hook {
            fn name(&self) -> &'static str {
                self.core.name()
            }

            fn is_enabled(&self) -> bool {
                self.core.is_enabled()
            }

            fn is_usable(&self) -> bool {
                let $this = self;
                $usable
            }

            fn enable(&self) -> $crate::error::Result<()> {
                self.core.enable()
            }

            fn disable(&self) -> $crate::error::Result<()> {
                self.core.disable()
            }
        }
    };
}

pub mod cancelable;
pub mod entity;
pub mod event;
pub mod manager;
pub mod network;
pub mod options;
pub mod periodic;
pub mod shared;
pub mod walk;

pub use cancelable::CancelableHook;
pub use entity::{
    EntityEventArgs, EntityFocusHook, EntityFocuser, EntityFollowHook, EntityFollower,
    EntityUnfollowHook, EntityUnfollower, MapObject,
};
pub use event::{Event, SubscriptionId};
pub use manager::{CatalogEntry, HookManager};
pub use network::{
    AnsiString, PacketEventArgs, PacketReceiveHook, PacketReceiver, PacketSendHook, PacketSender,
};
pub use options::{HookManagerOptions, HookOptions, HookOptionsBuilder, HooksConfigBuilder};
pub use periodic::PeriodicHook;
pub use shared::{SharedHook, SharedHookManager, SharedInstance};
pub use walk::{
    PetWalkEventArgs, PetWalkHook, PetWalker, PlayerWalkHook, PlayerWalker, WalkEventArgs,
};

/// Names of the hooks of the catalog
pub mod names {
    /// Packet send function of the network manager
    pub const PACKET_SEND: &str = "NetworkManager.PacketSend";
    /// Packet receive function of the network manager
    pub const PACKET_RECEIVE: &str = "NetworkManager.PacketReceive";
    /// Walk function of the character
    pub const PLAYER_WALK: &str = "CharacterManager.Walk";
    /// Walk function of pets and partners
    pub const PET_WALK: &str = "PetManager.Walk";
    /// Follow function of the character
    pub const ENTITY_FOLLOW: &str = "CharacterManager.EntityFollow";
    /// Unfollow function of the character
    pub const ENTITY_UNFOLLOW: &str = "CharacterManager.EntityUnfollow";
    /// Focus function of the unit manager
    pub const ENTITY_FOCUS: &str = "UnitManager.EntityFocus";
    /// Function called once per frame on the game thread
    pub const PERIODIC: &str = "Periodic";
}

/// Common interface of the hooks of the catalog
pub trait NosHook: Send + Sync {
    /// Name of the hook
    fn name(&self) -> &'static str;

    /// Whether calls are routed through the handlers
    fn is_enabled(&self) -> bool;

    /// Whether the wrapper of the hook can be used, i.e. the object bindings it needs are loaded
    fn is_usable(&self) -> bool;

    /// Routes calls through the handlers
    fn enable(&self) -> Result<()>;

    /// Restores the original function
    fn disable(&self) -> Result<()>;
}

/// Hook reporting its intercepted calls through an [`Event`]
pub trait ObservableHook: NosHook {
    /// Arguments of an intercepted call
    type Args: Send + Sync + 'static;

    /// Event raised on every call of the client
    fn called(&self) -> &Event<Self::Args>;
}

/// Registered hook, kept both as [`NosHook`] and as its concrete type
#[derive(Clone)]
pub struct HookEntry {
    /// Common interface
    hook: Arc<dyn NosHook>,
    /// Concrete hook, for lookups by type
    any: Arc<dyn Any + Send + Sync>,
}

impl HookEntry {
    /// Registers `hook`
    pub fn new<H: NosHook + 'static>(hook: Arc<H>) -> Self {
        Self {
            hook: hook.clone(),
            any: hook,
        }
    }

    /// Common interface of the hook
    pub fn hook(&self) -> &Arc<dyn NosHook> {
        &self.hook
    }

    /// The hook as `H`, if it is one
    pub fn downcast<H: NosHook + 'static>(&self) -> Option<Arc<H>> {
        self.any.clone().downcast::<H>().ok()
    }
}

/// Everything a hook needs to be created
pub struct HookContext<'a> {
    /// The bound process
    pub binding: &'a ProcessBinding,
    /// Object bindings used by the wrappers
    pub browser: &'a BrowserManager,
    /// Options of the catalog
    pub options: &'a HookManagerOptions,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::binding::tests::fake_binding;
    use crate::browser::{BrowserManager, BrowserOptions};
    use crate::hooks::{HookContext, HookEntry, HookManagerOptions, HooksConfigBuilder};
    use crate::hooks::{PeriodicHook, PlayerWalkHook};

    #[test]
    /// Entries hand out the concrete hook only for its own type
    fn test_entry_downcast() {
        let (binding, _) = fake_binding(&[(0x30, &[0x55, 0x8b, 0xec, 0x53, 0x56, 0x83, 0xc4])]);
        let browser = BrowserManager::new(BrowserOptions::default());
        let _ = browser.initialize(&binding);
        let options = HooksConfigBuilder::from_options(HookManagerOptions::default()).build();
        let context = HookContext {
            binding: &binding,
            browser: &browser,
            options: &options,
        };

        let entry = HookEntry::new(Arc::new(PeriodicHook::create(&context).unwrap()));
        assert_eq!(entry.hook().name(), "Periodic");
        assert!(entry.downcast::<PeriodicHook>().is_some());
        assert!(entry.downcast::<PlayerWalkHook>().is_none());
    }
}
