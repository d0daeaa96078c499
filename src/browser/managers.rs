//! Manager objects of the client located through static pointers

use serde::{Deserialize, Serialize};

use crate::binding::ProcessBinding;
use crate::error::Result;
use crate::memory::StaticPointer;

/// Where to find a manager object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerOptions {
    /// Pattern of an instruction referencing the global variable of the manager
    pub pattern: String,
    /// Offsets walked from the start of the match, see [`crate::memory::follow_offsets`]
    pub offsets: Vec<isize>,
}

impl PointerOptions {
    /// Creates new options
    pub fn new(pattern: &str, offsets: &[isize]) -> Self {
        Self {
            pattern: pattern.to_string(),
            offsets: offsets.to_vec(),
        }
    }

    /// Locates the pattern and builds the pointer chain
    fn locate(&self, binding: &ProcessBinding, name: &str) -> Result<StaticPointer> {
        let address = binding.find_pattern(name, &self.pattern)?;
        let pointer = StaticPointer::new(binding.memory().clone(), address, self.offsets.clone());
        log::debug!("Located {name}: {pointer:?}");
        Ok(pointer)
    }
}

/// Object sending and receiving packets
#[derive(Debug, Clone)]
pub struct NetworkManager {
    /// Chain leading to the object
    pointer: StaticPointer,
}

impl NetworkManager {
    /// Name of the binding
    pub const NAME: &'static str = "NetworkManager";
    /// Offset of the object handling received packets
    pub const RECEIVE_OBJECT_OFFSET: isize = 0x34;

    /// Locates the manager
    pub fn create(binding: &ProcessBinding, options: &PointerOptions) -> Result<Self> {
        Ok(Self {
            pointer: options.locate(binding, Self::NAME)?,
        })
    }

    /// Current address of the manager, passed to the send function
    pub fn address(&self) -> Result<usize> {
        Ok(self.pointer.resolve()?)
    }

    /// Current address of the object passed to the receive function
    pub fn receive_object(&self) -> Result<usize> {
        Ok(self.pointer.then(Self::RECEIVE_OBJECT_OFFSET).resolve()?)
    }
}

/// Object holding the entities of the map and the current focus
#[derive(Debug, Clone)]
pub struct UnitManager {
    /// Chain leading to the object
    pointer: StaticPointer,
}

impl UnitManager {
    /// Name of the binding
    pub const NAME: &'static str = "UnitManager";

    /// Locates the manager
    pub fn create(binding: &ProcessBinding, options: &PointerOptions) -> Result<Self> {
        Ok(Self {
            pointer: options.locate(binding, Self::NAME)?,
        })
    }

    /// Current address of the manager
    pub fn address(&self) -> Result<usize> {
        Ok(self.pointer.resolve()?)
    }
}

/// Object controlling the character of the player
#[derive(Debug, Clone)]
pub struct PlayerManager {
    /// Chain leading to the object
    pointer: StaticPointer,
}

impl PlayerManager {
    /// Name of the binding
    pub const NAME: &'static str = "CharacterManager";

    /// Locates the manager
    pub fn create(binding: &ProcessBinding, options: &PointerOptions) -> Result<Self> {
        Ok(Self {
            pointer: options.locate(binding, Self::NAME)?,
        })
    }

    /// Current address of the manager
    pub fn address(&self) -> Result<usize> {
        Ok(self.pointer.resolve()?)
    }
}
