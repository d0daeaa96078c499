//! Options of the hook catalog and a fluent builder for them

use serde::{Deserialize, Serialize};

use super::names;

/// Where to find a hooked function and whether to hook it right away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOptions {
    /// Name of the hook
    pub name: String,
    /// Whether the hook is enabled as soon as it is created
    pub hook: bool,
    /// Byte pattern locating the function
    pub pattern: String,
    /// Offset from the start of the pattern match to the entry of the function
    pub offset: isize,
}

impl HookOptions {
    /// Creates options for the hook `name`
    pub fn new(name: &str, hook: bool, pattern: &str, offset: isize) -> Self {
        Self {
            name: name.to_string(),
            hook,
            pattern: pattern.to_string(),
            offset,
        }
    }
}

/// Fields of [`HookOptions`] given in a configuration file
#[derive(Default, Deserialize)]
#[serde(default)]
struct PartialHookOptions {
    /// Name of the hook
    name: Option<String>,
    /// Whether the hook is enabled as soon as it is created
    hook: Option<bool>,
    /// Byte pattern locating the function
    pattern: Option<String>,
    /// Offset from the start of the pattern match to the entry of the function
    offset: Option<isize>,
}

impl PartialHookOptions {
    /// Overrides the given fields of `options`
    fn apply(self, options: &mut HookOptions) {
        if let Some(name) = self.name {
            options.name = name;
        }
        if let Some(hook) = self.hook {
            options.hook = hook;
        }
        if let Some(pattern) = self.pattern {
            options.pattern = pattern;
        }
        if let Some(offset) = self.offset {
            options.offset = offset;
        }
    }
}

/// Hooks given in a configuration file, merged onto the defaults of the catalog
#[derive(Default, Deserialize)]
#[serde(default)]
struct PartialHookManagerOptions {
    /// Packet send function of the network manager
    packet_send: PartialHookOptions,
    /// Packet receive function of the network manager
    packet_receive: PartialHookOptions,
    /// Walk function of the character
    player_walk: PartialHookOptions,
    /// Walk function of pets and partners
    pet_walk: PartialHookOptions,
    /// Follow function of the character
    entity_follow: PartialHookOptions,
    /// Unfollow function of the character
    entity_unfollow: PartialHookOptions,
    /// Focus function of the unit manager
    entity_focus: PartialHookOptions,
    /// Function called once per frame on the game thread
    periodic: PartialHookOptions,
}

impl From<PartialHookManagerOptions> for HookManagerOptions {
    fn from(partial: PartialHookManagerOptions) -> Self {
        let mut options = Self::default();
        partial.packet_send.apply(&mut options.packet_send);
        partial.packet_receive.apply(&mut options.packet_receive);
        partial.player_walk.apply(&mut options.player_walk);
        partial.pet_walk.apply(&mut options.pet_walk);
        partial.entity_follow.apply(&mut options.entity_follow);
        partial.entity_unfollow.apply(&mut options.entity_unfollow);
        partial.entity_focus.apply(&mut options.entity_focus);
        partial.periodic.apply(&mut options.periodic);
        options
    }
}

/// Options of every hook of the catalog
///
/// When deserialized, missing hooks and missing fields of a hook keep the defaults of that hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PartialHookManagerOptions")]
pub struct HookManagerOptions {
    /// Packet send function of the network manager
    pub packet_send: HookOptions,
    /// Packet receive function of the network manager
    pub packet_receive: HookOptions,
    /// Walk function of the character
    pub player_walk: HookOptions,
    /// Walk function of pets and partners
    pub pet_walk: HookOptions,
    /// Follow function of the character
    pub entity_follow: HookOptions,
    /// Unfollow function of the character
    pub entity_unfollow: HookOptions,
    /// Focus function of the unit manager
    pub entity_focus: HookOptions,
    /// Function called once per frame on the game thread
    pub periodic: HookOptions,
}

impl Default for HookManagerOptions {
    fn default() -> Self {
        Self {
            packet_send: HookOptions::new(names::PACKET_SEND, true, "53 56 8B F2 8B D8 EB 04", 0),
            packet_receive: HookOptions::new(
                names::PACKET_RECEIVE,
                true,
                "55 8B EC 83 C4 ?? 53 56 57 33 C9 89 4D ?? 89 4D ?? 89 55 ?? 8B D8 8B 45 ??",
                0,
            ),
            player_walk: HookOptions::new(
                names::PLAYER_WALK,
                false,
                "55 8B EC 83 C4 EC 53 56 57 66 89 4D FA",
                0,
            ),
            pet_walk: HookOptions::new(
                names::PET_WALK,
                false,
                "55 8B EC 83 C4 E4 53 56 57 8B F9 89 55 FC 8B D8 C6 45 FB 00",
                0,
            ),
            entity_follow: HookOptions::new(
                names::ENTITY_FOLLOW,
                false,
                "55 8B EC 51 53 56 57 88 4D FF 8B F2 8B F8",
                0,
            ),
            entity_unfollow: HookOptions::new(
                names::ENTITY_UNFOLLOW,
                false,
                "80 78 14 00 74 1A",
                0,
            ),
            // the pattern starts inside the preceding function
            entity_focus: HookOptions::new(
                names::ENTITY_FOCUS,
                false,
                "73 00 00 00 55 8B EC B9 05 00 00 00",
                4,
            ),
            periodic: HookOptions::new(names::PERIODIC, true, "55 8B EC 53 56 83 C4", 0),
        }
    }
}

impl HookManagerOptions {
    /// Options of the hook called `name`, see [`names`]
    pub fn by_name(&self, name: &str) -> Option<&HookOptions> {
        match name {
            names::PACKET_SEND => Some(&self.packet_send),
            names::PACKET_RECEIVE => Some(&self.packet_receive),
            names::PLAYER_WALK => Some(&self.player_walk),
            names::PET_WALK => Some(&self.pet_walk),
            names::ENTITY_FOLLOW => Some(&self.entity_follow),
            names::ENTITY_UNFOLLOW => Some(&self.entity_unfollow),
            names::ENTITY_FOCUS => Some(&self.entity_focus),
            names::PERIODIC => Some(&self.periodic),
            _ => None,
        }
    }

    /// Options of every hook, in catalog order
    pub fn all_mut(&mut self) -> [&mut HookOptions; 8] {
        [
            &mut self.packet_send,
            &mut self.packet_receive,
            &mut self.player_walk,
            &mut self.pet_walk,
            &mut self.entity_follow,
            &mut self.entity_unfollow,
            &mut self.entity_focus,
            &mut self.periodic,
        ]
    }
}

/// Fluent configuration of [`HookOptions`]
pub struct HookOptionsBuilder {
    /// Options being built
    options: HookOptions,
}

impl HookOptionsBuilder {
    /// Starts from existing options
    pub fn new(options: HookOptions) -> Self {
        Self { options }
    }

    /// Sets whether the hook is enabled right after creation
    pub fn hook(mut self, hook: bool) -> Self {
        self.options.hook = hook;
        self
    }

    /// Sets the pattern locating the function
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.options.pattern = pattern.to_string();
        self
    }

    /// Sets the offset from the pattern match to the function entry
    pub fn offset(mut self, offset: isize) -> Self {
        self.options.offset = offset;
        self
    }

    /// Finishes the configuration
    pub fn build(self) -> HookOptions {
        self.options
    }
}

/// Fluent configuration of which hooks are enabled
///
/// ```
/// use nosbind::hooks::HooksConfigBuilder;
///
/// let options = HooksConfigBuilder::new()
///     .hook_none()
///     .hook_periodic(|b| b)
///     .hook_player_walk(|b| b.offset(2))
///     .build();
/// assert!(options.periodic.hook);
/// assert!(options.player_walk.hook);
/// assert!(!options.packet_send.hook);
/// ```
#[derive(Default)]
pub struct HooksConfigBuilder {
    /// Options being built
    options: HookManagerOptions,
}

impl HooksConfigBuilder {
    /// Starts from the default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing options
    pub fn from_options(options: HookManagerOptions) -> Self {
        Self { options }
    }

    /// Disables every hook
    pub fn hook_none(mut self) -> Self {
        self.options.all_mut().into_iter().for_each(|o| o.hook = false);
        self
    }

    /// Enables every hook
    pub fn hook_all(mut self) -> Self {
        self.options.all_mut().into_iter().for_each(|o| o.hook = true);
        self
    }

    /// Enables the packet send and receive hooks
    pub fn hook_networking(mut self) -> Self {
        self.options.packet_send.hook = true;
        self.options.packet_receive.hook = true;
        self
    }

    /// Enables the packet send hook and applies `configure`
    pub fn hook_packet_send(
        self,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        self.configure(|o| &mut o.packet_send, configure)
    }

    /// Enables the packet receive hook and applies `configure`
    pub fn hook_packet_receive(
        self,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        self.configure(|o| &mut o.packet_receive, configure)
    }

    /// Enables the character walk hook and applies `configure`
    pub fn hook_player_walk(
        self,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        self.configure(|o| &mut o.player_walk, configure)
    }

    /// Enables the pet walk hook and applies `configure`
    pub fn hook_pet_walk(
        self,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        self.configure(|o| &mut o.pet_walk, configure)
    }

    /// Enables the entity follow hook and applies `configure`
    pub fn hook_entity_follow(
        self,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        self.configure(|o| &mut o.entity_follow, configure)
    }

    /// Enables the entity unfollow hook and applies `configure`
    pub fn hook_entity_unfollow(
        self,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        self.configure(|o| &mut o.entity_unfollow, configure)
    }

    /// Enables the entity focus hook and applies `configure`
    pub fn hook_entity_focus(
        self,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        self.configure(|o| &mut o.entity_focus, configure)
    }

    /// Enables the periodic hook and applies `configure`
    pub fn hook_periodic(
        self,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        self.configure(|o| &mut o.periodic, configure)
    }

    /// Enables the selected hook, then lets `configure` adjust it
    fn configure(
        mut self,
        select: fn(&mut HookManagerOptions) -> &mut HookOptions,
        configure: impl FnOnce(HookOptionsBuilder) -> HookOptionsBuilder,
    ) -> Self {
        let options = select(&mut self.options);
        let builder = HookOptionsBuilder::new(options.clone()).hook(true);
        *options = configure(builder).build();
        self
    }

    /// Finishes the configuration
    pub fn build(self) -> HookManagerOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use crate::hooks::options::{HookManagerOptions, HooksConfigBuilder};

    #[test]
    /// Networking and periodic hooks are enabled by default
    fn test_defaults() {
        let options = HookManagerOptions::default();

        assert!(options.packet_send.hook);
        assert!(options.packet_receive.hook);
        assert!(options.periodic.hook);
        assert!(!options.player_walk.hook);
        assert_eq!(options.entity_focus.offset, 4);
        assert_eq!(options.periodic.name, "Periodic");
        assert_eq!(options.by_name("UnitManager.EntityFocus"), Some(&options.entity_focus));
        assert!(options.by_name("Unknown").is_none());
    }

    #[test]
    /// Configuring a hook enables it unless the closure says otherwise
    fn test_builder() {
        let options = HooksConfigBuilder::new()
            .hook_none()
            .hook_networking()
            .hook_pet_walk(|b| b.pattern("AA BB").offset(-2))
            .hook_periodic(|b| b.hook(false))
            .build();

        assert!(options.packet_send.hook);
        assert!(options.pet_walk.hook);
        assert_eq!(options.pet_walk.pattern, "AA BB");
        assert_eq!(options.pet_walk.offset, -2);
        assert!(!options.periodic.hook);
        assert!(!options.entity_follow.hook);

        let all = HooksConfigBuilder::new().hook_all().build();
        assert!(all.entity_unfollow.hook && all.entity_focus.hook);
    }

    #[test]
    /// A single field of a hook overrides the defaults of that hook only
    fn test_partial_hook_from_json() {
        let json = r#"{ "player_walk": { "hook": true }, "entity_focus": { "offset": 6 } }"#;
        let options: HookManagerOptions = serde_json::from_str(json).unwrap();
        let defaults = HookManagerOptions::default();

        assert!(options.player_walk.hook);
        assert_eq!(options.player_walk.name, "CharacterManager.Walk");
        assert_eq!(options.player_walk.pattern, defaults.player_walk.pattern);
        assert_eq!(options.entity_focus.offset, 6);
        assert_eq!(options.entity_focus.pattern, defaults.entity_focus.pattern);
        assert!(!options.entity_focus.hook);
        assert_eq!(options.periodic, defaults.periodic);
    }

    #[test]
    /// Serialized options load back unchanged
    fn test_json_round_trip() {
        let options = HooksConfigBuilder::new().hook_all().hook_pet_walk(|b| b.offset(3)).build();
        let json = serde_json::to_string(&options).unwrap();

        assert_eq!(serde_json::from_str::<HookManagerOptions>(&json).unwrap(), options);
    }

    #[test]
    /// Options load from partial JSON
    fn test_from_json() {
        let json = r#"{
            "periodic": { "name": "Periodic", "hook": false, "pattern": "55 8B EC", "offset": 1 }
        }"#;
        let options: HookManagerOptions = serde_json::from_str(json).unwrap();

        assert!(!options.periodic.hook);
        assert_eq!(options.periodic.pattern, "55 8B EC");
        assert_eq!(options.periodic.offset, 1);
        // untouched hooks keep their defaults
        assert_eq!(options.packet_send, HookManagerOptions::default().packet_send);
    }
}
