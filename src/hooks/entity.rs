//! Follow, unfollow and focus hooks

use std::sync::Arc;

use crate::browser::{PlayerManager, UnitManager};
use crate::error::Result;
use crate::wrapper::convention::{FunctionDescriptor, Register};

use super::{names, CancelableHook, Event, HookContext};

/// Entity of the current map, e.g. a monster, a player or an item lying on the ground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapObject {
    /// Address of the object in the client
    pub address: usize,
}

impl MapObject {
    /// Wraps a raw pointer, `None` for null
    pub fn from_address(address: usize) -> Option<Self> {
        (address != 0).then_some(Self { address })
    }
}

/// An entity is about to be followed, unfollowed or focused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityEventArgs {
    /// Manager the call was issued on
    pub manager: usize,
    /// The entity, absent for unfollows and when the focus is cleared
    pub entity: Option<MapObject>,
}

/// Address passed to the client for an optional entity
fn entity_address(entity: Option<MapObject>) -> usize {
    entity.map_or(0, |e| e.address)
}

/// Hook of the follow function of the character
pub struct EntityFollowHook {
    /// Shared core
    core: CancelableHook<EntityEventArgs>,
    /// Object controlling the character
    player: Option<Arc<PlayerManager>>,
}

impl EntityFollowHook {
    /// `(manager: eax, entity: edx, unknown: ecx, unknown: stack)`
    pub const DESCRIPTOR: FunctionDescriptor =
        FunctionDescriptor::register(&[Register::Eax, Register::Edx, Register::Ecx], 4);

    /// Locates and hooks the function
    pub fn create(context: &HookContext<'_>) -> Result<Self> {
        let core = CancelableHook::create(
            context.binding,
            names::ENTITY_FOLLOW,
            Self::DESCRIPTOR,
            &context.options.entity_follow,
            true,
            |args| {
                Some(EntityEventArgs {
                    manager: *args.first()?,
                    entity: MapObject::from_address(*args.get(1)?),
                })
            },
        )?;
        Ok(Self {
            core,
            player: context.browser.player_manager(),
        })
    }

    /// Handlers of follows
    pub fn called(&self) -> &Event<EntityEventArgs> {
        self.core.called()
    }

    /// Calls the original function
    pub fn original(&self, player_manager: usize, entity: Option<MapObject>) -> Result<usize> {
        self.core
            .call_original(&[player_manager, entity_address(entity), 0, 1])
    }

    /// Follows entities, if the player manager is loaded
    pub fn wrapper(&self) -> Option<EntityFollower<'_>> {
        self.player.clone().map(|player| EntityFollower { hook: self, player })
    }
}

nos_hook!(EntityFollowHook, EntityEventArgs, |hook| hook.player.is_some());

/// Makes the character follow entities
pub struct EntityFollower<'a> {
    /// Hook whose original function is called
    hook: &'a EntityFollowHook,
    /// Object controlling the character
    player: Arc<PlayerManager>,
}

impl EntityFollower<'_> {
    /// Starts following `entity`
    pub fn follow(&self, entity: Option<MapObject>) -> Result<()> {
        self.hook.original(self.player.address()?, entity)?;
        Ok(())
    }
}

/// Hook of the unfollow function of the character
pub struct EntityUnfollowHook {
    /// Shared core
    core: CancelableHook<EntityEventArgs>,
    /// Object controlling the character
    player: Option<Arc<PlayerManager>>,
}

impl EntityUnfollowHook {
    /// `(manager: eax, unknown: edx)`
    pub const DESCRIPTOR: FunctionDescriptor =
        FunctionDescriptor::register(&[Register::Eax, Register::Edx], 2);

    /// Locates and hooks the function
    pub fn create(context: &HookContext<'_>) -> Result<Self> {
        let core = CancelableHook::create(
            context.binding,
            names::ENTITY_UNFOLLOW,
            Self::DESCRIPTOR,
            &context.options.entity_unfollow,
            true,
            |args| {
                Some(EntityEventArgs {
                    manager: *args.first()?,
                    entity: None,
                })
            },
        )?;
        Ok(Self {
            core,
            player: context.browser.player_manager(),
        })
    }

    /// Handlers of unfollows
    pub fn called(&self) -> &Event<EntityEventArgs> {
        self.core.called()
    }

    /// Calls the original function
    pub fn original(&self, player_manager: usize) -> Result<usize> {
        self.core.call_original(&[player_manager, 0])
    }

    /// Stops following, if the player manager is loaded
    pub fn wrapper(&self) -> Option<EntityUnfollower<'_>> {
        self.player.clone().map(|player| EntityUnfollower { hook: self, player })
    }
}

nos_hook!(EntityUnfollowHook, EntityEventArgs, |hook| hook.player.is_some());

/// Makes the character stop following
pub struct EntityUnfollower<'a> {
    /// Hook whose original function is called
    hook: &'a EntityUnfollowHook,
    /// Object controlling the character
    player: Arc<PlayerManager>,
}

impl EntityUnfollower<'_> {
    /// Stops following the current entity
    pub fn unfollow(&self) -> Result<()> {
        self.hook.original(self.player.address()?)?;
        Ok(())
    }
}

/// Hook of the focus function of the unit manager
pub struct EntityFocusHook {
    /// Shared core
    core: CancelableHook<EntityEventArgs>,
    /// Object holding the focus
    unit: Option<Arc<UnitManager>>,
}

impl EntityFocusHook {
    /// `(manager: eax, entity: edx)`
    pub const DESCRIPTOR: FunctionDescriptor =
        FunctionDescriptor::register(&[Register::Eax, Register::Edx], 2);

    /// Locates and hooks the function
    pub fn create(context: &HookContext<'_>) -> Result<Self> {
        let core = CancelableHook::create(
            context.binding,
            names::ENTITY_FOCUS,
            Self::DESCRIPTOR,
            &context.options.entity_focus,
            true,
            |args| {
                Some(EntityEventArgs {
                    manager: *args.first()?,
                    entity: MapObject::from_address(*args.get(1)?),
                })
            },
        )?;
        Ok(Self {
            core,
            unit: context.browser.unit_manager(),
        })
    }

    /// Handlers of focus changes
    pub fn called(&self) -> &Event<EntityEventArgs> {
        self.core.called()
    }

    /// Calls the original function
    pub fn original(&self, unit_manager: usize, entity: Option<MapObject>) -> Result<usize> {
        self.core
            .call_original(&[unit_manager, entity_address(entity)])
    }

    /// Changes the focus, if the unit manager is loaded
    pub fn wrapper(&self) -> Option<EntityFocuser<'_>> {
        self.unit.clone().map(|unit| EntityFocuser { hook: self, unit })
    }
}

nos_hook!(EntityFocusHook, EntityEventArgs, |hook| hook.unit.is_some());

/// Changes the focused entity
pub struct EntityFocuser<'a> {
    /// Hook whose original function is called
    hook: &'a EntityFocusHook,
    /// Object holding the focus
    unit: Arc<UnitManager>,
}

impl EntityFocuser<'_> {
    /// Focuses `entity`, `None` clears the focus
    pub fn focus(&self, entity: Option<MapObject>) -> Result<()> {
        self.hook.original(self.unit.address()?, entity)?;
        Ok(())
    }
}
