//! Walk hooks of the character and of pets

use std::sync::Arc;

use crate::browser::PlayerManager;
use crate::error::Result;
use crate::wrapper::convention::{FunctionDescriptor, Register};

use super::{names, CancelableHook, Event, HookContext};

/// Packs map coordinates the way the walk functions expect them
fn position(x: u16, y: u16) -> usize {
    ((y as usize) << 16) | x as usize
}

/// Splits a packed position into `(x, y)`
fn coordinates(position: usize) -> (u16, u16) {
    ((position & 0xffff) as u16, ((position >> 16) & 0xffff) as u16)
}

/// The character is about to walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkEventArgs {
    /// Player manager the walk was issued on
    pub player_manager: usize,
    /// Target x coordinate
    pub x: u16,
    /// Target y coordinate
    pub y: u16,
}

/// Hook of the walk function of the character
pub struct PlayerWalkHook {
    /// Shared core
    core: CancelableHook<WalkEventArgs>,
    /// Object controlling the character
    player: Option<Arc<PlayerManager>>,
}

impl PlayerWalkHook {
    /// `(manager: eax, position: edx, unknown: ecx, unknown: stack)`
    pub const DESCRIPTOR: FunctionDescriptor =
        FunctionDescriptor::register(&[Register::Eax, Register::Edx, Register::Ecx], 4);

    /// Locates and hooks the function
    pub fn create(context: &HookContext<'_>) -> Result<Self> {
        let core = CancelableHook::create(
            context.binding,
            names::PLAYER_WALK,
            Self::DESCRIPTOR,
            &context.options.player_walk,
            true,
            |args| {
                let (x, y) = coordinates(*args.get(1)?);
                Some(WalkEventArgs {
                    player_manager: *args.first()?,
                    x,
                    y,
                })
            },
        )?;
        Ok(Self {
            core,
            player: context.browser.player_manager(),
        })
    }

    /// Handlers of walks; cancelling keeps the character in place
    pub fn called(&self) -> &Event<WalkEventArgs> {
        self.core.called()
    }

    /// Calls the original function
    pub fn original(&self, player_manager: usize, x: u16, y: u16) -> Result<usize> {
        self.core
            .call_original(&[player_manager, position(x, y), 0, 1])
    }

    /// Walks the character, if the player manager is loaded
    pub fn wrapper(&self) -> Option<PlayerWalker<'_>> {
        self.player.clone().map(|player| PlayerWalker { hook: self, player })
    }
}

nos_hook!(PlayerWalkHook, WalkEventArgs, |hook| hook.player.is_some());

/// Walks the character
pub struct PlayerWalker<'a> {
    /// Hook whose original function is called
    hook: &'a PlayerWalkHook,
    /// Object controlling the character
    player: Arc<PlayerManager>,
}

impl PlayerWalker<'_> {
    /// Walks to `(x, y)`; returns whether the client accepted the walk
    pub fn walk(&self, x: u16, y: u16) -> Result<bool> {
        Ok(self.hook.original(self.player.address()?, x, y)? == 1)
    }
}

/// A pet or partner is about to walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PetWalkEventArgs {
    /// Manager of the walking pet
    pub pet_manager: usize,
    /// Target x coordinate
    pub x: u16,
    /// Target y coordinate
    pub y: u16,
}

/// Hook of the walk function of pets and partners
pub struct PetWalkHook {
    /// Shared core
    core: CancelableHook<PetWalkEventArgs>,
}

impl PetWalkHook {
    /// `(pet: eax, position: edx, unknown: ecx, unknown: stack, unknown: stack)`
    pub const DESCRIPTOR: FunctionDescriptor =
        FunctionDescriptor::register(&[Register::Eax, Register::Edx, Register::Ecx], 5);

    /// Locates and hooks the function
    pub fn create(context: &HookContext<'_>) -> Result<Self> {
        let core = CancelableHook::create(
            context.binding,
            names::PET_WALK,
            Self::DESCRIPTOR,
            &context.options.pet_walk,
            true,
            |args| {
                let (x, y) = coordinates(*args.get(1)?);
                Some(PetWalkEventArgs {
                    pet_manager: *args.first()?,
                    x,
                    y,
                })
            },
        )?;
        Ok(Self { core })
    }

    /// Handlers of pet walks; cancelling keeps the pet in place
    pub fn called(&self) -> &Event<PetWalkEventArgs> {
        self.core.called()
    }

    /// Calls the original function
    pub fn original(&self, pet_manager: usize, x: u16, y: u16) -> Result<usize> {
        self.core
            .call_original(&[pet_manager, position(x, y), 0, 1, 1])
    }

    /// Walks pets; the pet is passed on every call so no object binding is needed
    pub fn wrapper(&self) -> Option<PetWalker<'_>> {
        Some(PetWalker { hook: self })
    }
}

nos_hook!(PetWalkHook, PetWalkEventArgs, |_| true);

/// Walks pets and partners
pub struct PetWalker<'a> {
    /// Hook whose original function is called
    hook: &'a PetWalkHook,
}

impl PetWalker<'_> {
    /// Walks the pet managed by `pet_manager` to `(x, y)`; returns whether the client accepted it
    pub fn walk(&self, pet_manager: usize, x: u16, y: u16) -> Result<bool> {
        Ok(self.hook.original(pet_manager, x, y)? == 1)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::binding::tests::{fake_binding, BASE};
    use crate::browser::{BrowserManager, BrowserOptions, PointerOptions};
    use crate::hook::Decision;
    use crate::hooks::walk::{coordinates, position, PetWalkHook, PlayerWalkHook, WalkEventArgs};
    use crate::hooks::{HookContext, HooksConfigBuilder, NosHook};
    use crate::memory::MemoryExt;

    /// Entry shared by both walk functions in the fake module
    const WALK_CODE: [u8; 6] = [0x55, 0x8b, 0xec, 0x83, 0xc4, 0xec];
    /// `mov eax, [global]` locating the player manager
    const PLAYER_CODE: [u8; 7] = [0xa1, 0, 0, 0, 0, 0xe8, 0x92];

    #[test]
    /// Positions pack y into the high word
    fn test_position() {
        assert_eq!(position(0x12, 0x34), 0x0034_0012);
        assert_eq!(coordinates(0x0034_0012), (0x12, 0x34));
    }

    #[test]
    /// Handlers see the decoded coordinates, the wrapper walks through the player manager
    fn test_player_walk() {
        let (binding, interceptor) = fake_binding(&[(0x20, &WALK_CODE), (0x100, &PLAYER_CODE)]);
        binding.memory().write_pointer(BASE + 0x101, BASE + 0x800).unwrap();
        binding.memory().write_pointer(BASE + 0x800, BASE + 0x900).unwrap();
        let browser = BrowserManager::new(BrowserOptions {
            player_manager: PointerOptions::new("A1 ?? ?? ?? ?? E8 92", &[1, 0]),
            ..Default::default()
        });
        let _ = browser.initialize(&binding);
        let options = HooksConfigBuilder::new()
            .hook_player_walk(|b| b.pattern("55 8B EC 83 C4 EC"))
            .build();
        let context = HookContext {
            binding: &binding,
            browser: &browser,
            options: &options,
        };
        let hook = PlayerWalkHook::create(&context).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let walks = seen.clone();
        hook.called().subscribe(move |args| {
            walks.lock().push(*args);
            Decision::Cancel
        });

        let function = interceptor.function("CharacterManager.Walk");
        assert_eq!(function.call(&[BASE + 0x900, position(10, 20), 0, 1]), 0);
        assert_eq!(
            *seen.lock(),
            vec![WalkEventArgs {
                player_manager: BASE + 0x900,
                x: 10,
                y: 20
            }]
        );

        assert!(hook.is_usable());
        assert!(hook.wrapper().unwrap().walk(30, 40).unwrap());
        assert_eq!(function.original_calls(), vec![vec![BASE + 0x900, position(30, 40), 0, 1]]);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    /// Pets are walked without any object binding
    fn test_pet_walk() {
        let (binding, interceptor) = fake_binding(&[(0x20, &WALK_CODE)]);
        let browser = BrowserManager::new(BrowserOptions::default());
        let _ = browser.initialize(&binding);
        let options = HooksConfigBuilder::new()
            .hook_pet_walk(|b| b.pattern("55 8B EC 83 C4 EC"))
            .build();
        let context = HookContext {
            binding: &binding,
            browser: &browser,
            options: &options,
        };
        let hook = PetWalkHook::create(&context).unwrap();
        assert!(hook.is_usable());

        assert!(hook.wrapper().unwrap().walk(0x1234, 5, 6).unwrap());
        let function = interceptor.function("PetManager.Walk");
        assert_eq!(function.original_calls(), vec![vec![0x1234, position(5, 6), 0, 1, 1]]);
        assert_eq!(function.descriptor.stack_arguments(), 2);
    }
}
