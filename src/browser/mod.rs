//! # Browser
//!
//! Bindings to the manager objects of the client. Wrappers of hooks need them to supply the leading
//! argument of the native functions, e.g. the network manager for sending packets.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::binding::ProcessBinding;
use crate::error::{BindingError, Result};

pub mod managers;

pub use managers::{NetworkManager, PlayerManager, PointerOptions, UnitManager};

/// Fields of [`PointerOptions`] given in a configuration file
#[derive(Default, Deserialize)]
#[serde(default)]
struct PartialPointerOptions {
    /// Pattern of an instruction referencing the global variable of the manager
    pattern: Option<String>,
    /// Offsets walked from the start of the match
    offsets: Option<Vec<isize>>,
}

impl PartialPointerOptions {
    /// Overrides the given fields of `options`
    fn apply(self, options: &mut PointerOptions) {
        if let Some(pattern) = self.pattern {
            options.pattern = pattern;
        }
        if let Some(offsets) = self.offsets {
            options.offsets = offsets;
        }
    }
}

/// Object bindings given in a configuration file, merged onto the defaults of each binding
#[derive(Default, Deserialize)]
#[serde(default)]
struct PartialBrowserOptions {
    /// Location of the network manager
    network_manager: PartialPointerOptions,
    /// Location of the unit manager
    unit_manager: PartialPointerOptions,
    /// Location of the player manager
    player_manager: PartialPointerOptions,
}

impl From<PartialBrowserOptions> for BrowserOptions {
    fn from(partial: PartialBrowserOptions) -> Self {
        let mut options = Self::default();
        partial.network_manager.apply(&mut options.network_manager);
        partial.unit_manager.apply(&mut options.unit_manager);
        partial.player_manager.apply(&mut options.player_manager);
        options
    }
}

/// Options of every object binding
///
/// When deserialized, missing bindings and missing fields of a binding keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PartialBrowserOptions")]
pub struct BrowserOptions {
    /// Location of the network manager, three pointers down from the operand of a
    /// `mov eax, [global]`
    pub network_manager: PointerOptions,
    /// Location of the unit manager
    pub unit_manager: PointerOptions,
    /// Location of the player manager
    pub player_manager: PointerOptions,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            network_manager: PointerOptions::new(
                "A1 ?? ?? ?? ?? 8B 00 BA ?? ?? ?? ?? E8 ?? ?? ?? ?? E9 ?? ?? ?? ?? A1 ?? ?? ?? ?? 8B 00 8B 40 40",
                &[1, 0, 0],
            ),
            unit_manager: PointerOptions::new(
                "A1 ?? ?? ?? ?? E8 ?? ?? ?? ?? 33 C0 5A 59 59 64 89 10 68 ?? ?? ?? ?? 8D 45 F0 BA",
                &[1, 0],
            ),
            player_manager: PointerOptions::new(
                "33 C9 8B 55 FC A1 ?? ?? ?? ?? E8 ?? ?? ?? ??",
                &[6, 0],
            ),
        }
    }
}

/// Loaded object bindings; absent entries failed to load
#[derive(Default)]
struct Modules {
    /// Network manager
    network: Option<Arc<NetworkManager>>,
    /// Unit manager
    unit: Option<Arc<UnitManager>>,
    /// Player manager
    player: Option<Arc<PlayerManager>>,
}

/// Registry of the object bindings
pub struct BrowserManager {
    /// Where to find the objects
    options: BrowserOptions,
    /// `None` until initialized
    modules: RwLock<Option<Modules>>,
}

impl BrowserManager {
    /// Creates the registry, nothing is located before [`BrowserManager::initialize`]
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            modules: RwLock::new(None),
        }
    }

    /// Locates every object
    ///
    /// Objects that can't be located are skipped and reported together; later calls do nothing.
    pub fn initialize(&self, binding: &ProcessBinding) -> Result<()> {
        let mut modules = self.modules.write();
        if modules.is_some() {
            return Ok(());
        }

        let mut errors = Vec::new();
        let loaded = Modules {
            network: load(NetworkManager::NAME, &mut errors, || {
                NetworkManager::create(binding, &self.options.network_manager)
            }),
            unit: load(UnitManager::NAME, &mut errors, || {
                UnitManager::create(binding, &self.options.unit_manager)
            }),
            player: load(PlayerManager::NAME, &mut errors, || {
                PlayerManager::create(binding, &self.options.player_manager)
            }),
        };
        *modules = Some(loaded);

        BindingError::aggregate(errors)
    }

    /// Whether [`BrowserManager::initialize`] was called
    pub fn is_initialized(&self) -> bool {
        self.modules.read().is_some()
    }

    /// Loaded modules, panics when called before initialization
    fn modules(&self) -> MappedRwLockReadGuard<'_, Modules> {
        RwLockReadGuard::map(self.modules.read(), |modules| match modules {
            Some(modules) => modules,
            None => panic!(
                "Could not get an object binding. Did you forget to call BrowserManager::initialize?"
            ),
        })
    }

    /// The network manager, if it was located
    pub fn network_manager(&self) -> Option<Arc<NetworkManager>> {
        self.modules().network.clone()
    }

    /// The unit manager, if it was located
    pub fn unit_manager(&self) -> Option<Arc<UnitManager>> {
        self.modules().unit.clone()
    }

    /// The player manager, if it was located
    pub fn player_manager(&self) -> Option<Arc<PlayerManager>> {
        self.modules().player.clone()
    }

    /// Whether the object called `name` was located
    pub fn is_module_loaded(&self, name: &str) -> bool {
        let modules = self.modules();
        match name {
            NetworkManager::NAME => modules.network.is_some(),
            UnitManager::NAME => modules.unit.is_some(),
            PlayerManager::NAME => modules.player.is_some(),
            _ => false,
        }
    }
}

/// Runs the creation of a module, turning failures into [`BindingError::CouldNotInitializeModule`]
fn load<T>(
    name: &str,
    errors: &mut Vec<BindingError>,
    create: impl FnOnce() -> Result<T>,
) -> Option<Arc<T>> {
    let error = match panic::catch_unwind(AssertUnwindSafe(create)) {
        Ok(Ok(module)) => return Some(Arc::new(module)),
        Ok(Err(e)) => e,
        Err(payload) => BindingError::from_panic(payload),
    };
    log::warn!("Could not initialize {name}: {error}");
    errors.push(BindingError::CouldNotInitializeModule {
        module: name.to_string(),
        source: Box::new(error),
    });
    None
}

#[cfg(test)]
mod tests {
    use crate::binding::tests::{fake_binding, BASE};
    use crate::browser::{BrowserManager, BrowserOptions, PointerOptions};
    use crate::error::BindingError;
    use crate::memory::MemoryExt;

    /// `mov eax, [global]` followed by a recognizable tail
    const UNIT_CODE: [u8; 7] = [0xa1, 0, 0, 0, 0, 0xe8, 0x90];

    /// Options locating only the unit manager
    fn options() -> BrowserOptions {
        BrowserOptions {
            unit_manager: PointerOptions::new("A1 ?? ?? ?? ?? E8 90", &[1, 0]),
            ..Default::default()
        }
    }

    #[test]
    /// A single field of a binding overrides the default of that binding only
    fn test_partial_options_from_json() {
        let json = r#"{ "player_manager": { "offsets": [7, 0] } }"#;
        let options: BrowserOptions = serde_json::from_str(json).unwrap();
        let defaults = BrowserOptions::default();

        assert_eq!(options.player_manager.offsets, [7, 0]);
        assert_eq!(options.player_manager.pattern, defaults.player_manager.pattern);
        assert_eq!(options.network_manager, defaults.network_manager);
        assert_eq!(options.unit_manager, defaults.unit_manager);
    }

    #[test]
    /// Located objects are re-resolved on every access
    fn test_unit_manager() {
        let (binding, _) = fake_binding(&[(0x100, &UNIT_CODE)]);
        let memory = binding.memory().clone();
        // the operand points at a global holding the object
        memory.write_pointer(BASE + 0x101, BASE + 0x800).unwrap();
        memory.write_pointer(BASE + 0x800, BASE + 0x900).unwrap();

        let browser = BrowserManager::new(options());
        match browser.initialize(&binding) {
            Err(BindingError::Aggregate(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(browser.is_module_loaded("UnitManager"));
        assert!(!browser.is_module_loaded("NetworkManager"));
        assert!(browser.network_manager().is_none());

        let unit = browser.unit_manager().unwrap();
        assert_eq!(unit.address().unwrap(), BASE + 0x900);

        // the client created a new object
        memory.write_pointer(BASE + 0x800, BASE + 0xa00).unwrap();
        assert_eq!(unit.address().unwrap(), BASE + 0xa00);

        // a second initialization does nothing
        assert!(browser.initialize(&binding).is_ok());
    }

    #[test]
    /// Failures name the module
    fn test_could_not_initialize() {
        let (binding, _) = fake_binding(&[]);
        let browser = BrowserManager::new(BrowserOptions::default());

        match browser.initialize(&binding) {
            Err(BindingError::Aggregate(errors)) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().all(|e| matches!(
                    e,
                    BindingError::CouldNotInitializeModule { .. }
                )));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "Did you forget to call BrowserManager::initialize?")]
    /// Querying before initialization is a programming error
    fn test_not_initialized() {
        BrowserManager::new(BrowserOptions::default()).network_manager();
    }
}
